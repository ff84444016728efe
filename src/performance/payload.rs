//! Write-payload validation shared by both record types.
//!
//! A payload is read field by field; every problem is collected so the client
//! gets the full list of offending fields in one response.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::str::FromStr;

use super::decimal::{parse_decimal, DecimalSpec};
use super::error::{FieldErrors, PerformanceError, NON_FIELD_ERRORS};
use bigdecimal::BigDecimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    /// PUT: required fields must be supplied again.
    Replace,
    /// PATCH: nothing is required.
    Partial,
}

impl WriteMode {
    fn requires_all(self) -> bool {
        !matches!(self, Self::Partial)
    }
}

#[derive(Debug)]
pub struct FieldSet {
    pub writable: &'static [&'static str],
    pub read_only: &'static [&'static str],
}

#[derive(Debug)]
pub struct Payload {
    fields: Map<String, Value>,
    mode: WriteMode,
    errors: FieldErrors,
}

impl Payload {
    pub fn parse(body: &[u8], mode: WriteMode, field_set: &FieldSet) -> Result<Self, PerformanceError> {
        let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Map::new())
        } else {
            serde_json::from_slice(body).map_err(|e| {
                PerformanceError::Validation(FieldErrors::single(
                    NON_FIELD_ERRORS,
                    format!("JSON parse error - {}", e),
                ))
            })?
        };

        let Value::Object(fields) = value else {
            return Err(PerformanceError::Validation(FieldErrors::single(
                NON_FIELD_ERRORS,
                "Invalid data. Expected a dictionary.",
            )));
        };

        let mut errors = FieldErrors::new();
        for key in fields.keys() {
            if field_set.read_only.contains(&key.as_str()) {
                errors.add(key, "This field is read-only.");
            } else if !field_set.writable.contains(&key.as_str()) {
                errors.add(key, "Unknown field.");
            }
        }

        Ok(Self { fields, mode, errors })
    }

    /// Non-null field without a default. Absent is an error unless the write is partial.
    pub fn required<T>(&mut self, field: &str, parse: impl Fn(&Value) -> Result<T, String>) -> Option<T> {
        match self.fields.remove(field) {
            None => {
                if self.mode.requires_all() {
                    self.errors.add(field, "This field is required.");
                }
                None
            }
            Some(value) => self.non_null(field, &value, parse),
        }
    }

    /// Non-null field with a default. Absent means "keep the stored value or default".
    pub fn defaulted<T>(&mut self, field: &str, parse: impl Fn(&Value) -> Result<T, String>) -> Option<T> {
        let value = self.fields.remove(field)?;
        self.non_null(field, &value, parse)
    }

    /// Nullable field. `Some(None)` clears the stored value.
    pub fn nullable<T>(&mut self, field: &str, parse: impl Fn(&Value) -> Result<T, String>) -> Option<Option<T>> {
        match self.fields.remove(field)? {
            Value::Null => Some(None),
            value => match parse(&value) {
                Ok(parsed) => Some(Some(parsed)),
                Err(message) => {
                    self.errors.add(field, message);
                    None
                }
            },
        }
    }

    fn non_null<T>(&mut self, field: &str, value: &Value, parse: impl Fn(&Value) -> Result<T, String>) -> Option<T> {
        if value.is_null() {
            self.errors.add(field, "This field may not be null.");
            return None;
        }
        match parse(value) {
            Ok(parsed) => Some(parsed),
            Err(message) => {
                self.errors.add(field, message);
                None
            }
        }
    }

    pub fn finish(self) -> Result<(), PerformanceError> {
        self.errors.into_result()
    }
}

// ============================================================================
// Field parsers
// ============================================================================

pub fn text(max_len: Option<usize>, allow_blank: bool) -> impl Fn(&Value) -> Result<String, String> {
    move |value| {
        let raw = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return Err("Not a valid string.".to_string()),
        };
        if raw.is_empty() && !allow_blank {
            return Err("This field may not be blank.".to_string());
        }
        if let Some(max) = max_len {
            if raw.chars().count() > max {
                return Err(format!("Ensure this field has no more than {} characters.", max));
            }
        }
        Ok(raw)
    }
}

pub fn date(value: &Value) -> Result<NaiveDate, String> {
    value
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        .ok_or_else(|| "Date has wrong format. Use one of these formats instead: YYYY-MM-DD.".to_string())
}

pub fn decimal(column: DecimalSpec) -> impl Fn(&Value) -> Result<BigDecimal, String> {
    move |value| parse_decimal(value, column)
}

pub fn pk(value: &Value) -> Result<i32, String> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match id.and_then(|id| i32::try_from(id).ok()) {
        Some(id) => Ok(id),
        None => Err(format!(
            "Incorrect type. Expected pk value, received {}.",
            json_type_name(value)
        )),
    }
}

pub fn choice<T: FromStr<Err = String>>(value: &Value) -> Result<T, String> {
    match value {
        Value::String(s) => s.parse(),
        other => Err(format!("\"{}\" is not a valid choice.", other)),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "float",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
