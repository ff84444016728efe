use axum::{
    body::Bytes,
    extract::{OriginalUri, Path, State},
    http::StatusCode,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use log::info;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use super::decimal::{format_decimal, PERCENT};
use super::error::{FieldErrors, PerformanceError};
use super::listing::{
    choice_filter, int_filter, ordering, query_pairs, search_terms, Direction, OrderTerm, Page, PageRequest,
};
use super::payload::{self, FieldSet, Payload, WriteMode};
use super::store::EmployeeName;
use super::{employee_names, ensure_employees, ensure_filter_choices, parse_id, require_capability};
use crate::core::shared::enums::ReviewStatus;
use crate::core::shared::schema::performance_reviews;
use crate::core::shared::state::AppState;
use crate::security::{Actor, PERFORMANCE_MANAGE, PERFORMANCE_VIEW};

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = performance_reviews, treat_none_as_null = true)]
pub struct ReviewData {
    pub employee_id: i32,
    pub review_date: NaiveDate,
    pub reviewer_id: Option<i32>,
    pub review_period_start: NaiveDate,
    pub review_period_end: NaiveDate,
    pub score: BigDecimal,
    pub feedback: String,
    pub goal_progress: BigDecimal,
    pub strengths: Option<String>,
    pub areas_for_improvement: Option<String>,
    pub recommendations: Option<String>,
    pub status: ReviewStatus,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = performance_reviews)]
pub struct ReviewRecord {
    pub review_id: i32,
    #[diesel(embed)]
    pub data: ReviewData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const REVIEW_FIELDS: FieldSet = FieldSet {
    writable: &[
        "employee",
        "review_date",
        "reviewer",
        "review_period_start",
        "review_period_end",
        "score",
        "feedback",
        "goal_progress",
        "strengths",
        "areas_for_improvement",
        "recommendations",
        "status",
    ],
    read_only: &[
        "review_id",
        "employee_name",
        "reviewer_name",
        "created_at",
        "updated_at",
    ],
};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReviewPatch {
    pub employee: Option<i32>,
    pub review_date: Option<NaiveDate>,
    pub reviewer: Option<Option<i32>>,
    pub review_period_start: Option<NaiveDate>,
    pub review_period_end: Option<NaiveDate>,
    pub score: Option<BigDecimal>,
    pub feedback: Option<String>,
    pub goal_progress: Option<BigDecimal>,
    pub strengths: Option<Option<String>>,
    pub areas_for_improvement: Option<Option<String>>,
    pub recommendations: Option<Option<String>>,
    pub status: Option<ReviewStatus>,
}

impl ReviewPatch {
    pub fn parse(body: &[u8], mode: WriteMode) -> Result<Self, PerformanceError> {
        let mut payload = Payload::parse(body, mode, &REVIEW_FIELDS)?;
        let patch = Self {
            employee: payload.required("employee", payload::pk),
            review_date: payload.required("review_date", payload::date),
            reviewer: payload.nullable("reviewer", payload::pk),
            review_period_start: payload.required("review_period_start", payload::date),
            review_period_end: payload.required("review_period_end", payload::date),
            score: payload.required("score", payload::decimal(PERCENT)),
            feedback: payload.required("feedback", payload::text(None, false)),
            goal_progress: payload.defaulted("goal_progress", payload::decimal(PERCENT)),
            strengths: payload.nullable("strengths", payload::text(None, true)),
            areas_for_improvement: payload.nullable("areas_for_improvement", payload::text(None, true)),
            recommendations: payload.nullable("recommendations", payload::text(None, true)),
            status: payload.defaulted("status", payload::choice::<ReviewStatus>),
        };
        payload.finish()?;
        Ok(patch)
    }

    pub fn apply(self, data: &mut ReviewData) {
        if let Some(employee) = self.employee {
            data.employee_id = employee;
        }
        if let Some(review_date) = self.review_date {
            data.review_date = review_date;
        }
        if let Some(reviewer) = self.reviewer {
            data.reviewer_id = reviewer;
        }
        if let Some(start) = self.review_period_start {
            data.review_period_start = start;
        }
        if let Some(end) = self.review_period_end {
            data.review_period_end = end;
        }
        if let Some(score) = self.score {
            data.score = score;
        }
        if let Some(feedback) = self.feedback {
            data.feedback = feedback;
        }
        if let Some(goal_progress) = self.goal_progress {
            data.goal_progress = goal_progress;
        }
        if let Some(strengths) = self.strengths {
            data.strengths = strengths;
        }
        if let Some(areas) = self.areas_for_improvement {
            data.areas_for_improvement = areas;
        }
        if let Some(recommendations) = self.recommendations {
            data.recommendations = recommendations;
        }
        if let Some(status) = self.status {
            data.status = status;
        }
    }

    pub fn into_new(self) -> Result<ReviewData, PerformanceError> {
        match (
            self.employee,
            self.review_date,
            self.review_period_start,
            self.review_period_end,
            self.score,
            self.feedback,
        ) {
            (
                Some(employee_id),
                Some(review_date),
                Some(review_period_start),
                Some(review_period_end),
                Some(score),
                Some(feedback),
            ) => Ok(ReviewData {
                employee_id,
                review_date,
                reviewer_id: self.reviewer.flatten(),
                review_period_start,
                review_period_end,
                score,
                feedback,
                goal_progress: self
                    .goal_progress
                    .unwrap_or_else(|| BigDecimal::from(0).with_scale(2)),
                strengths: self.strengths.flatten(),
                areas_for_improvement: self.areas_for_improvement.flatten(),
                recommendations: self.recommendations.flatten(),
                status: self.status.unwrap_or_default(),
            }),
            (employee, review_date, start, end, score, feedback) => {
                let mut errors = FieldErrors::new();
                let present = [
                    ("employee", employee.is_some()),
                    ("review_date", review_date.is_some()),
                    ("review_period_start", start.is_some()),
                    ("review_period_end", end.is_some()),
                    ("score", score.is_some()),
                    ("feedback", feedback.is_some()),
                ];
                for (field, _) in present.iter().filter(|(_, present)| !present) {
                    errors.add(field, "This field is required.");
                }
                Err(PerformanceError::Validation(errors))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOrderField {
    ReviewDate,
    CreatedAt,
}

impl ReviewOrderField {
    pub fn from_param(name: &str) -> Option<Self> {
        match name {
            "review_date" => Some(Self::ReviewDate),
            "created_at" => Some(Self::CreatedAt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewFilter {
    pub employee: Option<i32>,
    pub reviewer: Option<i32>,
    pub status: Option<ReviewStatus>,
    pub search: Vec<String>,
    pub ordering: Vec<OrderTerm<ReviewOrderField>>,
}

impl Default for ReviewFilter {
    fn default() -> Self {
        Self {
            employee: None,
            reviewer: None,
            status: None,
            search: Vec::new(),
            ordering: vec![OrderTerm::desc(ReviewOrderField::ReviewDate)],
        }
    }
}

impl ReviewFilter {
    /// An unknown reviewer id is not an error; it simply matches nothing.
    pub fn from_params(params: &[(String, String)]) -> Result<Self, PerformanceError> {
        let mut errors = FieldErrors::new();
        let employee = int_filter(params, "employee", &mut errors);
        let reviewer = int_filter(params, "reviewer", &mut errors);
        let status = choice_filter::<ReviewStatus>(params, "status", &mut errors);
        errors.into_result()?;

        Ok(Self {
            employee,
            reviewer,
            status,
            search: search_terms(params),
            ordering: ordering(
                params,
                ReviewOrderField::from_param,
                OrderTerm::desc(ReviewOrderField::ReviewDate),
            ),
        })
    }

    pub fn matches(&self, record: &ReviewRecord, employee: Option<&EmployeeName>) -> bool {
        if self.employee.is_some_and(|id| id != record.data.employee_id) {
            return false;
        }
        if self.reviewer.is_some() && self.reviewer != record.data.reviewer_id {
            return false;
        }
        if self.status.is_some_and(|status| status != record.data.status) {
            return false;
        }
        self.search
            .iter()
            .all(|term| employee.is_some_and(|name| name.matches(&term.to_lowercase())))
    }

    pub fn compare(&self, a: &ReviewRecord, b: &ReviewRecord) -> Ordering {
        self.ordering
            .iter()
            .map(|term| {
                let ord = match term.field {
                    ReviewOrderField::ReviewDate => a.data.review_date.cmp(&b.data.review_date),
                    ReviewOrderField::CreatedAt => a.created_at.cmp(&b.created_at),
                };
                match term.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            })
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| b.review_id.cmp(&a.review_id))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewView {
    pub review_id: i32,
    pub employee: i32,
    pub employee_name: Option<String>,
    pub review_date: NaiveDate,
    pub reviewer: Option<i32>,
    pub reviewer_name: Option<String>,
    pub review_period_start: NaiveDate,
    pub review_period_end: NaiveDate,
    pub score: String,
    pub feedback: String,
    pub goal_progress: String,
    pub strengths: Option<String>,
    pub areas_for_improvement: Option<String>,
    pub recommendations: Option<String>,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewView {
    pub fn new(record: ReviewRecord, names: &HashMap<i32, String>) -> Self {
        let data = record.data;
        Self {
            review_id: record.review_id,
            employee: data.employee_id,
            employee_name: names.get(&data.employee_id).cloned(),
            review_date: data.review_date,
            reviewer: data.reviewer_id,
            reviewer_name: data.reviewer_id.and_then(|id| names.get(&id).cloned()),
            review_period_start: data.review_period_start,
            review_period_end: data.review_period_end,
            score: format_decimal(&data.score),
            feedback: data.feedback,
            goal_progress: format_decimal(&data.goal_progress),
            strengths: data.strengths,
            areas_for_improvement: data.areas_for_improvement,
            recommendations: data.recommendations,
            status: data.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

fn referenced_ids(data: &ReviewData) -> impl Iterator<Item = i32> {
    std::iter::once(data.employee_id).chain(data.reviewer_id)
}

async fn render(state: &AppState, records: Vec<ReviewRecord>) -> Result<Vec<ReviewView>, PerformanceError> {
    let ids: Vec<i32> = records.iter().flat_map(|r| referenced_ids(&r.data)).collect();
    let names = employee_names(state, &ids).await?;
    Ok(records.into_iter().map(|r| ReviewView::new(r, &names)).collect())
}

async fn render_one(state: &AppState, record: ReviewRecord) -> Result<ReviewView, PerformanceError> {
    let ids: Vec<i32> = referenced_ids(&record.data).collect();
    let names = employee_names(state, &ids).await?;
    Ok(ReviewView::new(record, &names))
}

async fn check_references(state: &AppState, data: &ReviewData) -> Result<(), PerformanceError> {
    ensure_employees(
        state,
        &[("employee", Some(data.employee_id)), ("reviewer", data.reviewer_id)],
    )
    .await
}

pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    OriginalUri(uri): OriginalUri,
) -> Result<Json<Page<ReviewView>>, PerformanceError> {
    require_capability(&state, &actor, PERFORMANCE_VIEW).await?;

    let params = query_pairs(uri.query());
    let filter = ReviewFilter::from_params(&params)?;
    ensure_filter_choices(&state, &[("employee", filter.employee), ("reviewer", filter.reviewer)]).await?;
    let mut page = PageRequest::from_params(&params, &state.config)?;

    let count = state.store.count_reviews(&filter).await?;
    page.resolve(count)?;
    let records = state.store.list_reviews(&filter, page.offset(), page.limit()).await?;
    let results = render(&state, records).await?;

    Ok(Json(Page::new(count, results, &page, uri.path(), &params)))
}

pub async fn get_review(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<ReviewView>, PerformanceError> {
    require_capability(&state, &actor, PERFORMANCE_VIEW).await?;
    let review_id = parse_id(&id)?;

    let record = state.store.get_review(review_id).await?.ok_or_else(not_found)?;
    Ok(Json(render_one(&state, record).await?))
}

pub async fn create_review(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    body: Bytes,
) -> Result<(StatusCode, Json<ReviewView>), PerformanceError> {
    require_capability(&state, &actor, PERFORMANCE_MANAGE).await?;

    let data = ReviewPatch::parse(&body, WriteMode::Create)?.into_new()?;
    check_references(&state, &data).await?;

    let record = state.store.insert_review(data).await?;
    info!(
        "Created performance review: employee {} ({})",
        record.data.employee_id, record.review_id
    );

    Ok((StatusCode::CREATED, Json(render_one(&state, record).await?)))
}

pub async fn update_review(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ReviewView>, PerformanceError> {
    write_review(&state, &actor, &id, &body, WriteMode::Replace).await
}

pub async fn partial_update_review(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ReviewView>, PerformanceError> {
    write_review(&state, &actor, &id, &body, WriteMode::Partial).await
}

async fn write_review(
    state: &AppState,
    actor: &Actor,
    id: &str,
    body: &[u8],
    mode: WriteMode,
) -> Result<Json<ReviewView>, PerformanceError> {
    require_capability(state, actor, PERFORMANCE_MANAGE).await?;
    let review_id = parse_id(id)?;

    let stored = state.store.get_review(review_id).await?.ok_or_else(not_found)?;
    let patch = ReviewPatch::parse(body, mode)?;

    let mut data = stored.data;
    patch.apply(&mut data);
    check_references(state, &data).await?;

    let record = state
        .store
        .update_review(review_id, data)
        .await?
        .ok_or_else(not_found)?;
    info!(
        "Updated performance review: employee {} ({})",
        record.data.employee_id, record.review_id
    );

    Ok(Json(render_one(state, record).await?))
}

pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<StatusCode, PerformanceError> {
    require_capability(&state, &actor, PERFORMANCE_MANAGE).await?;
    let review_id = parse_id(&id)?;

    if !state.store.delete_review(review_id).await? {
        return Err(not_found());
    }
    info!("Deleted performance review: {review_id}");
    Ok(StatusCode::NO_CONTENT)
}

fn not_found() -> PerformanceError {
    PerformanceError::NotFound("Not found.".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn full_body() -> serde_json::Value {
        json!({
            "employee": 1,
            "review_date": "2024-06-30",
            "reviewer": 2,
            "review_period_start": "2024-01-01",
            "review_period_end": "2024-06-30",
            "score": "4.50",
            "feedback": "Solid half year"
        })
    }

    fn record(review_id: i32, review_date: NaiveDate, reviewer: Option<i32>) -> ReviewRecord {
        let data = ReviewPatch::parse(full_body().to_string().as_bytes(), WriteMode::Create)
            .unwrap()
            .into_new()
            .unwrap();
        let at = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        ReviewRecord {
            review_id,
            data: ReviewData {
                review_date,
                reviewer_id: reviewer,
                ..data
            },
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_create_defaults() {
        let data = ReviewPatch::parse(full_body().to_string().as_bytes(), WriteMode::Create)
            .unwrap()
            .into_new()
            .unwrap();
        assert_eq!(data.status, ReviewStatus::Draft);
        assert_eq!(data.goal_progress, dec("0.00"));
        assert_eq!(data.score, dec("4.50"));
        assert_eq!(data.reviewer_id, Some(2));
        assert_eq!(data.strengths, None);
    }

    #[test]
    fn test_create_reports_every_missing_field() {
        let err = ReviewPatch::parse(b"{}", WriteMode::Create).unwrap_err();
        let errors = match err {
            PerformanceError::Validation(errors) => errors,
            other => panic!("unexpected {:?}", other),
        };
        let fields: Vec<&str> = errors.fields().collect();
        assert_eq!(
            fields,
            vec![
                "employee",
                "feedback",
                "review_date",
                "review_period_end",
                "review_period_start",
                "score"
            ]
        );
    }

    #[test]
    fn test_score_bounds() {
        let mut body = full_body();
        body["score"] = json!("1000");
        let err = ReviewPatch::parse(body.to_string().as_bytes(), WriteMode::Create).unwrap_err();
        match err {
            PerformanceError::Validation(errors) => assert!(errors.contains("score")),
            other => panic!("unexpected {:?}", other),
        }

        body["score"] = json!("4.555");
        assert!(ReviewPatch::parse(body.to_string().as_bytes(), WriteMode::Create).is_err());
    }

    #[test]
    fn test_blank_feedback_rejected() {
        let mut body = full_body();
        body["feedback"] = json!("   ");
        assert!(ReviewPatch::parse(body.to_string().as_bytes(), WriteMode::Create).is_err());
    }

    #[test]
    fn test_reviewer_name_is_read_only() {
        let body = json!({"reviewer_name": "Bob"}).to_string();
        assert!(ReviewPatch::parse(body.as_bytes(), WriteMode::Partial).is_err());
    }

    #[test]
    fn test_partial_clears_reviewer() {
        let mut data = record(1, date(2024, 6, 30), Some(2)).data;
        ReviewPatch::parse(br#"{"reviewer": null, "status": "Submitted"}"#, WriteMode::Partial)
            .unwrap()
            .apply(&mut data);
        assert_eq!(data.reviewer_id, None);
        assert_eq!(data.status, ReviewStatus::Submitted);
        assert_eq!(data.feedback, "Solid half year");
    }

    #[test]
    fn test_filter_reviewer_and_status() {
        let filter = ReviewFilter::from_params(&query_pairs(Some("reviewer=2&status=Draft"))).unwrap();
        assert!(filter.matches(&record(1, date(2024, 6, 30), Some(2)), None));
        assert!(!filter.matches(&record(2, date(2024, 6, 30), None), None));
        assert!(!filter.matches(&record(3, date(2024, 6, 30), Some(3)), None));

        assert!(ReviewFilter::from_params(&query_pairs(Some("reviewer=bob"))).is_err());
        assert!(ReviewFilter::from_params(&query_pairs(Some("status=Pending"))).is_err());
    }

    #[test]
    fn test_search_uses_employee_name_only() {
        let name = EmployeeName {
            first_name: "Anna".to_string(),
            last_name: "Smith".to_string(),
        };
        let filter = ReviewFilter::from_params(&query_pairs(Some("search=SMITH"))).unwrap();
        assert!(filter.matches(&record(1, date(2024, 6, 30), None), Some(&name)));

        let filter = ReviewFilter::from_params(&query_pairs(Some("search=solid"))).unwrap();
        assert!(!filter.matches(&record(1, date(2024, 6, 30), None), Some(&name)));
    }

    #[test]
    fn test_ordering() {
        let mut records = vec![
            record(1, date(2024, 3, 31), None),
            record(2, date(2024, 6, 30), None),
            record(3, date(2024, 3, 31), None),
        ];
        let filter = ReviewFilter::default();
        records.sort_by(|a, b| filter.compare(a, b));
        assert_eq!(records.iter().map(|r| r.review_id).collect::<Vec<_>>(), vec![2, 3, 1]);

        let filter = ReviewFilter::from_params(&query_pairs(Some("ordering=review_date,bogus"))).unwrap();
        records.sort_by(|a, b| filter.compare(a, b));
        assert_eq!(records.iter().map(|r| r.review_id).collect::<Vec<_>>(), vec![3, 1, 2]);
    }

    #[test]
    fn test_view_names() {
        let names = HashMap::from([(1, "Anna Smith".to_string()), (2, "Bo Lee".to_string())]);
        let view = ReviewView::new(record(5, date(2024, 6, 30), Some(2)), &names);
        assert_eq!(view.employee_name.as_deref(), Some("Anna Smith"));
        assert_eq!(view.reviewer_name.as_deref(), Some("Bo Lee"));
        assert_eq!(view.score, "4.50");

        let view = ReviewView::new(record(6, date(2024, 6, 30), None), &names);
        let value = serde_json::to_value(view).unwrap();
        assert!(value["reviewer_name"].is_null());
        assert_eq!(value["status"], "Draft");
    }
}
