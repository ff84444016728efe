//! Performance reviews and goal tracking.
//!
//! Two record collections share the same request pipeline: a capability
//! check, then id and payload parsing, then the store. Goals additionally
//! derive their progress and status before every write.

pub mod decimal;
pub mod error;
pub mod goals;
pub mod listing;
pub mod payload;
pub mod reviews;
pub mod store;

use axum::{routing::get, Router};
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::shared::state::AppState;
use crate::security::Actor;
use error::PerformanceError;
use listing::INVALID_CHOICE;

pub use error::FieldErrors;
pub use goals::{apply_derived_state, compute_progress};
pub use store::{MemoryStore, PerformanceStore, PgStore};

pub const PERMISSION_DENIED: &str = "You do not have permission to perform this action.";

pub async fn require_capability(state: &AppState, actor: &Actor, capability: &str) -> Result<(), PerformanceError> {
    if state.capabilities.has_capability(actor, capability).await {
        return Ok(());
    }
    warn!("Denied {} to {} (roles: {:?})", capability, actor.id, actor.roles);
    Err(PerformanceError::PermissionDenied(PERMISSION_DENIED.to_string()))
}

/// Ids that are not integers can never match a row.
pub fn parse_id(raw: &str) -> Result<i32, PerformanceError> {
    raw.parse::<i32>()
        .map_err(|_| PerformanceError::NotFound("Not found.".to_string()))
}

pub async fn employee_names(state: &AppState, ids: &[i32]) -> Result<HashMap<i32, String>, PerformanceError> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    state.store.employee_names(&ids).await
}

/// Fails on the first referenced employee that does not exist.
pub async fn ensure_employees(state: &AppState, refs: &[(&'static str, Option<i32>)]) -> Result<(), PerformanceError> {
    let ids: Vec<i32> = refs.iter().filter_map(|(_, id)| *id).collect();
    let known = employee_names(state, &ids).await?;
    for (field, id) in refs {
        if let Some(id) = id {
            if !known.contains_key(id) {
                return Err(PerformanceError::UnknownEmployee { field: *field, id: *id });
            }
        }
    }
    Ok(())
}

/// Employee filters must name existing employees, like any other choice filter.
pub async fn ensure_filter_choices(state: &AppState, filters: &[(&'static str, Option<i32>)]) -> Result<(), PerformanceError> {
    let ids: Vec<i32> = filters.iter().filter_map(|(_, id)| *id).collect();
    if ids.is_empty() {
        return Ok(());
    }
    let known = employee_names(state, &ids).await?;
    let mut errors = FieldErrors::new();
    for (name, id) in filters {
        if matches!(id, Some(id) if !known.contains_key(id)) {
            errors.add(name, INVALID_CHOICE);
        }
    }
    errors.into_result()
}

pub fn configure_performance_routes() -> Router<Arc<AppState>> {
    use goals::{create_goal, delete_goal, get_goal, list_goals, partial_update_goal, update_goal};
    use reviews::{create_review, delete_review, get_review, list_reviews, partial_update_review, update_review};

    let review_collection = get(list_reviews).post(create_review);
    let review_item = get(get_review)
        .put(update_review)
        .patch(partial_update_review)
        .delete(delete_review);
    let goal_collection = get(list_goals).post(create_goal);
    let goal_item = get(get_goal)
        .put(update_goal)
        .patch(partial_update_goal)
        .delete(delete_goal);

    Router::new()
        .route("/performance-reviews/", review_collection.clone())
        .route("/performance-reviews", review_collection)
        .route("/performance-reviews/:id/", review_item.clone())
        .route("/performance-reviews/:id", review_item)
        .route("/goals/", goal_collection.clone())
        .route("/goals", goal_collection)
        .route("/goals/:id/", goal_item.clone())
        .route("/goals/:id", goal_item)
}
