//! Query-string handling shared by the list endpoints: whitelisted ordering,
//! search terms and page-number pagination.

use serde::Serialize;

use super::error::{FieldErrors, PerformanceError};
use crate::core::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTerm<F> {
    pub field: F,
    pub direction: Direction,
}

impl<F> OrderTerm<F> {
    pub fn asc(field: F) -> Self {
        Self {
            field,
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: F) -> Self {
        Self {
            field,
            direction: Direction::Desc,
        }
    }
}

/// Decodes `a=1&b=two+words` into ordered pairs. Malformed escapes are kept verbatim.
pub fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    let Some(query) = query else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Last occurrence wins, blank values count as absent.
pub fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .rev()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

pub const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";

pub fn int_filter(params: &[(String, String)], name: &str, errors: &mut FieldErrors) -> Option<i32> {
    let raw = param(params, name)?;
    match raw.parse::<i32>() {
        Ok(id) => Some(id),
        Err(_) => {
            errors.add(name, INVALID_CHOICE);
            None
        }
    }
}

pub fn choice_filter<T: std::str::FromStr>(
    params: &[(String, String)],
    name: &str,
    errors: &mut FieldErrors,
) -> Option<T> {
    let raw = param(params, name)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.add(
                name,
                format!("Select a valid choice. {} is not one of the available choices.", raw),
            );
            None
        }
    }
}

/// Splits on whitespace and commas; every term must match.
pub fn search_terms(params: &[(String, String)]) -> Vec<String> {
    param(params, "search")
        .map(|raw| {
            raw.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|term| !term.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Terms outside the whitelist are ignored; an empty result falls back to `default`.
pub fn ordering<F: Copy>(
    params: &[(String, String)],
    lookup: impl Fn(&str) -> Option<F>,
    default: OrderTerm<F>,
) -> Vec<OrderTerm<F>> {
    let terms: Vec<OrderTerm<F>> = param(params, "ordering")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter_map(|term| match term.strip_prefix('-') {
                    Some(name) => lookup(name).map(OrderTerm::desc),
                    None => lookup(term).map(OrderTerm::asc),
                })
                .collect()
        })
        .unwrap_or_default();

    if terms.is_empty() {
        vec![default]
    } else {
        terms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
    /// `page=last`; `page` is filled in by `resolve`.
    pub last: bool,
}

impl PageRequest {
    pub fn from_params(params: &[(String, String)], config: &AppConfig) -> Result<Self, PerformanceError> {
        let page = match param(params, "page") {
            None | Some("last") => None,
            Some(raw) => Some(
                raw.parse::<u32>()
                    .ok()
                    .filter(|p| *p > 0)
                    .ok_or_else(invalid_page)?,
            ),
        };
        let last = matches!(param(params, "page"), Some("last"));

        let page_size = param(params, "page_size")
            .and_then(|raw| raw.parse::<u32>().ok())
            .filter(|size| *size > 0)
            .map(|size| size.min(config.max_page_size))
            .unwrap_or(config.default_page_size);

        Ok(Self {
            page: page.unwrap_or(1),
            page_size,
            last,
        })
    }

    /// `page=last` is resolved once the total count is known.
    pub fn resolve(&mut self, count: i64) -> Result<(), PerformanceError> {
        let pages = num_pages(count, self.page_size);
        if self.last {
            self.page = pages;
            self.last = false;
        }
        if self.page > pages {
            return Err(invalid_page());
        }
        Ok(())
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

fn num_pages(count: i64, page_size: u32) -> u32 {
    let size = i64::from(page_size.max(1));
    let pages = (count.max(0) + size - 1) / size;
    u32::try_from(pages).unwrap_or(u32::MAX).max(1)
}

fn invalid_page() -> PerformanceError {
    PerformanceError::NotFound("Invalid page.".to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(
        count: i64,
        results: Vec<T>,
        request: &PageRequest,
        path: &str,
        params: &[(String, String)],
    ) -> Self {
        let pages = num_pages(count, request.page_size);
        let next = (request.page < pages).then(|| page_link(path, params, Some(request.page + 1)));
        let previous = (request.page > 1).then(|| {
            let target = request.page - 1;
            page_link(path, params, (target > 1).then_some(target))
        });
        Self {
            count,
            next,
            previous,
            results,
        }
    }
}

/// Rebuilds the request URL with `page` replaced; `None` drops it (first page).
fn page_link(path: &str, params: &[(String, String)], page: Option<u32>) -> String {
    let mut pairs: Vec<String> = params
        .iter()
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect();
    if let Some(page) = page {
        pairs.push(format!("page={}", page));
    }
    if pairs.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, pairs.join("&"))
    }
}
