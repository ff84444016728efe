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

use super::decimal::{check_precision, format_decimal, round2, PERCENT, VALUE};
use super::error::{FieldErrors, PerformanceError};
use super::listing::{
    choice_filter, int_filter, ordering, query_pairs, search_terms, Direction, OrderTerm, Page, PageRequest,
};
use super::payload::{self, FieldSet, Payload, WriteMode};
use super::store::EmployeeName;
use super::{employee_names, ensure_employees, ensure_filter_choices, parse_id, require_capability};
use crate::core::shared::enums::GoalStatus;
use crate::core::shared::schema::goals;
use crate::core::shared::state::AppState;
use crate::security::{Actor, PERFORMANCE_MANAGE, PERFORMANCE_VIEW};

// ============================================================================
// RECORDS
// ============================================================================

/// Client-owned columns plus the derived progress.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = goals, treat_none_as_null = true)]
pub struct GoalData {
    pub employee_id: i32,
    pub title: String,
    pub description: String,
    pub target_value: Option<BigDecimal>,
    pub current_value: BigDecimal,
    pub unit: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: GoalStatus,
    pub progress_percentage: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = goals)]
pub struct GoalRecord {
    pub goal_id: i32,
    #[diesel(embed)]
    pub data: GoalData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn zero() -> BigDecimal {
    BigDecimal::from(0).with_scale(2)
}

/// Percentage of `target` reached by `current`, capped at 100 and rounded to 2 places.
/// An absent or non-positive target yields 0.00.
pub fn compute_progress(target: Option<&BigDecimal>, current: &BigDecimal) -> BigDecimal {
    let hundred = BigDecimal::from(100);
    match target {
        Some(target) if *target > BigDecimal::from(0) => {
            let progress = (current * &hundred) / target;
            round2(if progress > hundred { &hundred } else { &progress })
        }
        _ => zero(),
    }
}

/// Pre-persist hook run on every create and update.
///
/// Progress at or above 100 forces `Completed`, any positive progress forces
/// `In Progress`. Zero or negative progress leaves the supplied status alone,
/// so a goal can be created as `Cancelled` or moved back to `Not Started`
/// only while it has no progress.
pub fn apply_derived_state(data: &mut GoalData) {
    data.progress_percentage = compute_progress(data.target_value.as_ref(), &data.current_value);
    if data.progress_percentage >= BigDecimal::from(100) {
        data.status = GoalStatus::Completed;
    } else if data.progress_percentage > BigDecimal::from(0) {
        data.status = GoalStatus::InProgress;
    }
}

/// A negative current value against a small target can push the percentage
/// past the column bounds.
fn check_progress_bounds(data: &GoalData) -> Result<(), PerformanceError> {
    check_precision(&data.progress_percentage, PERCENT).map_err(|_| {
        PerformanceError::Validation(FieldErrors::single(
            "current_value",
            "Resulting progress percentage is out of range.",
        ))
    })
}

// ============================================================================
// WRITE PAYLOAD
// ============================================================================

pub const GOAL_FIELDS: FieldSet = FieldSet {
    writable: &[
        "employee",
        "title",
        "description",
        "target_value",
        "current_value",
        "unit",
        "start_date",
        "end_date",
        "status",
    ],
    read_only: &[
        "goal_id",
        "employee_name",
        "progress_percentage",
        "created_at",
        "updated_at",
    ],
};

/// Fields supplied by the client. `None` means absent; nullable fields use
/// `Some(None)` for an explicit null.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GoalPatch {
    pub employee: Option<i32>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub target_value: Option<Option<BigDecimal>>,
    pub current_value: Option<BigDecimal>,
    pub unit: Option<Option<String>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<GoalStatus>,
}

impl GoalPatch {
    pub fn parse(body: &[u8], mode: WriteMode) -> Result<Self, PerformanceError> {
        let mut payload = Payload::parse(body, mode, &GOAL_FIELDS)?;
        let patch = Self {
            employee: payload.required("employee", payload::pk),
            title: payload.required("title", payload::text(Some(255), false)),
            description: payload.required("description", payload::text(None, false)),
            target_value: payload.nullable("target_value", payload::decimal(VALUE)),
            current_value: payload.defaulted("current_value", payload::decimal(VALUE)),
            unit: payload.nullable("unit", payload::text(Some(50), true)),
            start_date: payload.required("start_date", payload::date),
            end_date: payload.required("end_date", payload::date),
            status: payload.defaulted("status", payload::choice::<GoalStatus>),
        };
        payload.finish()?;
        Ok(patch)
    }

    pub fn apply(self, data: &mut GoalData) {
        if let Some(employee) = self.employee {
            data.employee_id = employee;
        }
        if let Some(title) = self.title {
            data.title = title;
        }
        if let Some(description) = self.description {
            data.description = description;
        }
        if let Some(target_value) = self.target_value {
            data.target_value = target_value;
        }
        if let Some(current_value) = self.current_value {
            data.current_value = current_value;
        }
        if let Some(unit) = self.unit {
            data.unit = unit;
        }
        if let Some(start_date) = self.start_date {
            data.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            data.end_date = end_date;
        }
        if let Some(status) = self.status {
            data.status = status;
        }
    }

    pub fn into_new(self) -> Result<GoalData, PerformanceError> {
        let mut errors = FieldErrors::new();
        let mut require = |field: &str, present: bool| {
            if !present {
                errors.add(field, "This field is required.");
            }
        };
        require("employee", self.employee.is_some());
        require("title", self.title.is_some());
        require("description", self.description.is_some());
        require("start_date", self.start_date.is_some());
        require("end_date", self.end_date.is_some());

        match (self.employee, self.title, self.description, self.start_date, self.end_date) {
            (Some(employee_id), Some(title), Some(description), Some(start_date), Some(end_date)) => Ok(GoalData {
                employee_id,
                title,
                description,
                target_value: self.target_value.flatten(),
                current_value: self.current_value.unwrap_or_else(zero),
                unit: self.unit.flatten(),
                start_date,
                end_date,
                status: self.status.unwrap_or_default(),
                progress_percentage: zero(),
            }),
            _ => Err(PerformanceError::Validation(errors)),
        }
    }
}

// ============================================================================
// LISTING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalOrderField {
    StartDate,
    EndDate,
    CreatedAt,
}

impl GoalOrderField {
    pub fn from_param(name: &str) -> Option<Self> {
        match name {
            "start_date" => Some(Self::StartDate),
            "end_date" => Some(Self::EndDate),
            "created_at" => Some(Self::CreatedAt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoalFilter {
    pub employee: Option<i32>,
    pub status: Option<GoalStatus>,
    pub search: Vec<String>,
    pub ordering: Vec<OrderTerm<GoalOrderField>>,
}

impl Default for GoalFilter {
    fn default() -> Self {
        Self {
            employee: None,
            status: None,
            search: Vec::new(),
            ordering: vec![OrderTerm::desc(GoalOrderField::StartDate)],
        }
    }
}

impl GoalFilter {
    pub fn from_params(params: &[(String, String)]) -> Result<Self, PerformanceError> {
        let mut errors = FieldErrors::new();
        let employee = int_filter(params, "employee", &mut errors);
        let status = choice_filter::<GoalStatus>(params, "status", &mut errors);
        errors.into_result()?;

        Ok(Self {
            employee,
            status,
            search: search_terms(params),
            ordering: ordering(
                params,
                GoalOrderField::from_param,
                OrderTerm::desc(GoalOrderField::StartDate),
            ),
        })
    }

    /// In-memory counterpart of the SQL predicates.
    pub fn matches(&self, record: &GoalRecord, employee: Option<&EmployeeName>) -> bool {
        if self.employee.is_some_and(|id| id != record.data.employee_id) {
            return false;
        }
        if self.status.is_some_and(|status| status != record.data.status) {
            return false;
        }
        let title = record.data.title.to_lowercase();
        self.search.iter().all(|term| {
            let term = term.to_lowercase();
            title.contains(&term) || employee.is_some_and(|name| name.matches(&term))
        })
    }

    /// Primary key descending breaks ties.
    pub fn compare(&self, a: &GoalRecord, b: &GoalRecord) -> Ordering {
        self.ordering
            .iter()
            .map(|term| {
                let ord = match term.field {
                    GoalOrderField::StartDate => a.data.start_date.cmp(&b.data.start_date),
                    GoalOrderField::EndDate => a.data.end_date.cmp(&b.data.end_date),
                    GoalOrderField::CreatedAt => a.created_at.cmp(&b.created_at),
                };
                match term.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            })
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| b.goal_id.cmp(&a.goal_id))
    }
}

// ============================================================================
// WIRE REPRESENTATION
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct GoalView {
    pub goal_id: i32,
    pub employee: i32,
    pub employee_name: Option<String>,
    pub title: String,
    pub description: String,
    pub target_value: Option<String>,
    pub current_value: String,
    pub unit: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: GoalStatus,
    pub progress_percentage: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GoalView {
    pub fn new(record: GoalRecord, names: &HashMap<i32, String>) -> Self {
        let data = record.data;
        Self {
            goal_id: record.goal_id,
            employee: data.employee_id,
            employee_name: names.get(&data.employee_id).cloned(),
            title: data.title,
            description: data.description,
            target_value: data.target_value.as_ref().map(format_decimal),
            current_value: format_decimal(&data.current_value),
            unit: data.unit,
            start_date: data.start_date,
            end_date: data.end_date,
            status: data.status,
            progress_percentage: format_decimal(&data.progress_percentage),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

async fn render(state: &AppState, records: Vec<GoalRecord>) -> Result<Vec<GoalView>, PerformanceError> {
    let ids: Vec<i32> = records.iter().map(|r| r.data.employee_id).collect();
    let names = employee_names(state, &ids).await?;
    Ok(records.into_iter().map(|r| GoalView::new(r, &names)).collect())
}

async fn render_one(state: &AppState, record: GoalRecord) -> Result<GoalView, PerformanceError> {
    let names = employee_names(state, &[record.data.employee_id]).await?;
    Ok(GoalView::new(record, &names))
}

async fn prepare(state: &AppState, data: &mut GoalData) -> Result<(), PerformanceError> {
    apply_derived_state(data);
    check_progress_bounds(data)?;
    ensure_employees(state, &[("employee", Some(data.employee_id))]).await
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn list_goals(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    OriginalUri(uri): OriginalUri,
) -> Result<Json<Page<GoalView>>, PerformanceError> {
    require_capability(&state, &actor, PERFORMANCE_VIEW).await?;

    let params = query_pairs(uri.query());
    let filter = GoalFilter::from_params(&params)?;
    ensure_filter_choices(&state, &[("employee", filter.employee)]).await?;
    let mut page = PageRequest::from_params(&params, &state.config)?;

    let count = state.store.count_goals(&filter).await?;
    page.resolve(count)?;
    let records = state.store.list_goals(&filter, page.offset(), page.limit()).await?;
    let results = render(&state, records).await?;

    Ok(Json(Page::new(count, results, &page, uri.path(), &params)))
}

pub async fn get_goal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<GoalView>, PerformanceError> {
    require_capability(&state, &actor, PERFORMANCE_VIEW).await?;
    let goal_id = parse_id(&id)?;

    let record = state.store.get_goal(goal_id).await?.ok_or_else(not_found)?;
    Ok(Json(render_one(&state, record).await?))
}

pub async fn create_goal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    body: Bytes,
) -> Result<(StatusCode, Json<GoalView>), PerformanceError> {
    require_capability(&state, &actor, PERFORMANCE_MANAGE).await?;

    let mut data = GoalPatch::parse(&body, WriteMode::Create)?.into_new()?;
    prepare(&state, &mut data).await?;

    let record = state.store.insert_goal(data).await?;
    info!("Created goal: {} ({})", record.data.title, record.goal_id);

    Ok((StatusCode::CREATED, Json(render_one(&state, record).await?)))
}

pub async fn update_goal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<GoalView>, PerformanceError> {
    write_goal(&state, &actor, &id, &body, WriteMode::Replace).await
}

pub async fn partial_update_goal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<GoalView>, PerformanceError> {
    write_goal(&state, &actor, &id, &body, WriteMode::Partial).await
}

async fn write_goal(
    state: &AppState,
    actor: &Actor,
    id: &str,
    body: &[u8],
    mode: WriteMode,
) -> Result<Json<GoalView>, PerformanceError> {
    require_capability(state, actor, PERFORMANCE_MANAGE).await?;
    let goal_id = parse_id(id)?;

    let stored = state.store.get_goal(goal_id).await?.ok_or_else(not_found)?;
    let patch = GoalPatch::parse(body, mode)?;

    let mut data = stored.data;
    patch.apply(&mut data);
    prepare(state, &mut data).await?;

    let record = state
        .store
        .update_goal(goal_id, data)
        .await?
        .ok_or_else(not_found)?;
    info!("Updated goal: {} ({})", record.data.title, record.goal_id);

    Ok(Json(render_one(state, record).await?))
}

pub async fn delete_goal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<StatusCode, PerformanceError> {
    require_capability(&state, &actor, PERFORMANCE_MANAGE).await?;
    let goal_id = parse_id(&id)?;

    if !state.store.delete_goal(goal_id).await? {
        return Err(not_found());
    }
    info!("Deleted goal: {goal_id}");
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

    fn goal(target: Option<&str>, current: &str, status: GoalStatus) -> GoalData {
        GoalData {
            employee_id: 1,
            title: "Close tickets".to_string(),
            description: "Support backlog".to_string(),
            target_value: target.map(dec),
            current_value: dec(current),
            unit: Some("tickets".to_string()),
            start_date: date(2024, 1, 1),
            end_date: date(2024, 12, 31),
            status,
            progress_percentage: zero(),
        }
    }

    fn record(goal_id: i32, start: NaiveDate, created_day: u32) -> GoalRecord {
        let mut data = goal(Some("10"), "0", GoalStatus::NotStarted);
        data.start_date = start;
        GoalRecord {
            goal_id,
            data,
            created_at: Utc.with_ymd_and_hms(2024, 1, created_day, 9, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 1, created_day, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_compute_progress() {
        assert_eq!(compute_progress(Some(&dec("200")), &dec("150")), dec("75.00"));
        assert_eq!(compute_progress(Some(&dec("200")), &dec("200")), dec("100.00"));
        assert_eq!(compute_progress(Some(&dec("200")), &dec("500")), dec("100.00"));
        assert_eq!(compute_progress(Some(&dec("3")), &dec("2")), dec("66.67"));
        assert_eq!(compute_progress(None, &dec("50")), dec("0.00"));
        assert_eq!(compute_progress(Some(&dec("0")), &dec("50")), dec("0.00"));
        assert_eq!(compute_progress(Some(&dec("-10")), &dec("50")), dec("0.00"));
    }

    #[test]
    fn test_progress_formats_with_two_places() {
        let progress = compute_progress(Some(&dec("200")), &dec("150"));
        assert_eq!(format_decimal(&progress), "75.00");
        assert_eq!(format_decimal(&compute_progress(None, &dec("1"))), "0.00");
    }

    #[test]
    fn test_derived_state_in_progress() {
        let mut data = goal(Some("200"), "150", GoalStatus::NotStarted);
        apply_derived_state(&mut data);
        assert_eq!(data.progress_percentage, dec("75.00"));
        assert_eq!(data.status, GoalStatus::InProgress);
    }

    #[test]
    fn test_derived_state_completed() {
        let mut data = goal(Some("200"), "200", GoalStatus::Cancelled);
        apply_derived_state(&mut data);
        assert_eq!(data.progress_percentage, dec("100.00"));
        assert_eq!(data.status, GoalStatus::Completed);
    }

    // Documented quirk: zero progress never resets the status.
    #[test]
    fn test_zero_progress_keeps_supplied_status() {
        let mut cancelled = goal(Some("200"), "0", GoalStatus::Cancelled);
        apply_derived_state(&mut cancelled);
        assert_eq!(cancelled.status, GoalStatus::Cancelled);
        assert_eq!(cancelled.progress_percentage, dec("0.00"));

        let mut untargeted = goal(None, "50", GoalStatus::Completed);
        apply_derived_state(&mut untargeted);
        assert_eq!(untargeted.status, GoalStatus::Completed);
        assert_eq!(untargeted.progress_percentage, dec("0.00"));
    }

    #[test]
    fn test_negative_progress_out_of_bounds() {
        let mut data = goal(Some("0.01"), "-99999999", GoalStatus::NotStarted);
        apply_derived_state(&mut data);
        assert_eq!(data.status, GoalStatus::NotStarted);
        let err = check_progress_bounds(&data).unwrap_err();
        match err {
            PerformanceError::Validation(errors) => assert!(errors.contains("current_value")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_patch_create_requires_fields() {
        let body = json!({"title": "x"}).to_string();
        let err = GoalPatch::parse(body.as_bytes(), WriteMode::Create).unwrap_err();
        let errors = match err {
            PerformanceError::Validation(errors) => errors,
            other => panic!("unexpected {:?}", other),
        };
        for field in ["employee", "description", "start_date", "end_date"] {
            assert!(errors.contains(field), "{field} should be required");
        }
        assert!(!errors.contains("target_value"));
        assert!(!errors.contains("status"));
    }

    #[test]
    fn test_patch_create_defaults() {
        let body = json!({
            "employee": 4,
            "title": "Ship v2",
            "description": "Release",
            "start_date": "2024-02-01",
            "end_date": "2024-06-30"
        })
        .to_string();
        let data = GoalPatch::parse(body.as_bytes(), WriteMode::Create)
            .unwrap()
            .into_new()
            .unwrap();
        assert_eq!(data.employee_id, 4);
        assert_eq!(data.current_value, dec("0.00"));
        assert_eq!(data.target_value, None);
        assert_eq!(data.status, GoalStatus::NotStarted);
    }

    #[test]
    fn test_patch_rejects_progress_percentage() {
        let body = json!({"progress_percentage": "50.00", "goal_id": 3}).to_string();
        let err = GoalPatch::parse(body.as_bytes(), WriteMode::Partial).unwrap_err();
        match err {
            PerformanceError::Validation(errors) => {
                assert_eq!(errors.get("progress_percentage").unwrap(), ["This field is read-only."]);
                assert!(errors.contains("goal_id"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_patch_apply_merges_and_clears() {
        let mut data = goal(Some("200"), "10", GoalStatus::InProgress);
        let body = json!({"current_value": "150", "unit": null}).to_string();
        GoalPatch::parse(body.as_bytes(), WriteMode::Partial)
            .unwrap()
            .apply(&mut data);
        assert_eq!(data.current_value, dec("150"));
        assert_eq!(data.unit, None);
        assert_eq!(data.target_value, Some(dec("200")));
        assert_eq!(data.title, "Close tickets");
    }

    #[test]
    fn test_filter_rejects_bad_status() {
        let params = query_pairs(Some("status=Done&employee=2"));
        assert!(GoalFilter::from_params(&params).is_err());

        let params = query_pairs(Some("status=In+Progress&employee=2"));
        let filter = GoalFilter::from_params(&params).unwrap();
        assert_eq!(filter.status, Some(GoalStatus::InProgress));
        assert_eq!(filter.employee, Some(2));
    }

    #[test]
    fn test_filter_search_matches_title_or_name() {
        let smith = EmployeeName {
            first_name: "Jane".to_string(),
            last_name: "Smith".to_string(),
        };
        let filter = GoalFilter::from_params(&query_pairs(Some("search=smith"))).unwrap();
        let rec = record(1, date(2024, 1, 1), 1);
        assert!(filter.matches(&rec, Some(&smith)));
        assert!(!filter.matches(&rec, None));

        let filter = GoalFilter::from_params(&query_pairs(Some("search=TICKETS,jane"))).unwrap();
        assert!(filter.matches(&rec, Some(&smith)));
        let filter = GoalFilter::from_params(&query_pairs(Some("search=tickets+bob"))).unwrap();
        assert!(!filter.matches(&rec, Some(&smith)));
    }

    #[test]
    fn test_default_ordering_and_tie_break() {
        let filter = GoalFilter::default();
        let mut records = vec![
            record(1, date(2024, 1, 1), 1),
            record(2, date(2024, 3, 1), 2),
            record(3, date(2024, 3, 1), 3),
        ];
        records.sort_by(|a, b| filter.compare(a, b));
        let ids: Vec<i32> = records.iter().map(|r| r.goal_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        let filter = GoalFilter::from_params(&query_pairs(Some("ordering=created_at"))).unwrap();
        records.sort_by(|a, b| filter.compare(a, b));
        let ids: Vec<i32> = records.iter().map(|r| r.goal_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_view_shape() {
        let mut rec = record(7, date(2024, 1, 1), 1);
        rec.data.current_value = dec("5");
        apply_derived_state(&mut rec.data);
        let names = HashMap::from([(1, "Jane Smith".to_string())]);
        let value = serde_json::to_value(GoalView::new(rec, &names)).unwrap();
        assert_eq!(value["employee_name"], "Jane Smith");
        assert_eq!(value["target_value"], "10.00");
        assert_eq!(value["progress_percentage"], "50.00");
        assert_eq!(value["status"], "In Progress");
        assert_eq!(value["start_date"], "2024-01-01");
    }
}
