//! Persistence seam for the performance records.
//!
//! Handlers only talk to [`PerformanceStore`]; the PostgreSQL implementation
//! backs production and the in-memory one backs tests and `--memory` runs.

use async_trait::async_trait;
use std::collections::HashMap;

use super::error::PerformanceError;
use super::goals::{GoalData, GoalFilter, GoalRecord};
use super::reviews::{ReviewData, ReviewFilter, ReviewRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeName {
    pub first_name: String,
    pub last_name: String,
}

impl EmployeeName {
    pub fn new(first_name: &str, last_name: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// `term` must already be lowercase.
    pub fn matches(&self, term: &str) -> bool {
        self.first_name.to_lowercase().contains(term) || self.last_name.to_lowercase().contains(term)
    }
}

#[async_trait]
pub trait PerformanceStore: Send + Sync {
    async fn ping(&self) -> Result<(), PerformanceError>;

    /// Full names keyed by employee id. Unknown ids are absent from the map.
    async fn employee_names(&self, ids: &[i32]) -> Result<HashMap<i32, String>, PerformanceError>;

    async fn count_reviews(&self, filter: &ReviewFilter) -> Result<i64, PerformanceError>;
    async fn list_reviews(
        &self,
        filter: &ReviewFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ReviewRecord>, PerformanceError>;
    async fn get_review(&self, review_id: i32) -> Result<Option<ReviewRecord>, PerformanceError>;
    async fn insert_review(&self, data: ReviewData) -> Result<ReviewRecord, PerformanceError>;
    /// `None` when the row vanished between fetch and write.
    async fn update_review(&self, review_id: i32, data: ReviewData) -> Result<Option<ReviewRecord>, PerformanceError>;
    async fn delete_review(&self, review_id: i32) -> Result<bool, PerformanceError>;

    async fn count_goals(&self, filter: &GoalFilter) -> Result<i64, PerformanceError>;
    async fn list_goals(&self, filter: &GoalFilter, offset: i64, limit: i64) -> Result<Vec<GoalRecord>, PerformanceError>;
    async fn get_goal(&self, goal_id: i32) -> Result<Option<GoalRecord>, PerformanceError>;
    async fn insert_goal(&self, data: GoalData) -> Result<GoalRecord, PerformanceError>;
    async fn update_goal(&self, goal_id: i32, data: GoalData) -> Result<Option<GoalRecord>, PerformanceError>;
    async fn delete_goal(&self, goal_id: i32) -> Result<bool, PerformanceError>;
}
