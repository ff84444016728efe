use async_trait::async_trait;
use chrono::Utc;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::collections::HashMap;

use super::{EmployeeName, PerformanceStore};
use crate::core::shared::schema::{employees, goals, performance_reviews};
use crate::core::shared::utils::DbPool;
use crate::performance::error::{FieldErrors, PerformanceError, NON_FIELD_ERRORS};
use crate::performance::goals::{GoalData, GoalFilter, GoalOrderField, GoalRecord};
use crate::performance::listing::Direction;
use crate::performance::reviews::{ReviewData, ReviewFilter, ReviewOrderField, ReviewRecord};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, work: F) -> Result<T, PerformanceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, DieselError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| PerformanceError::Database(e.to_string()))?;
            work(&mut conn).map_err(map_diesel_error)
        })
        .await
        .map_err(|e| PerformanceError::Database(e.to_string()))?
    }
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("max_size", &self.pool.max_size())
            .finish()
    }
}

/// A reference that disappears between validation and insert surfaces as a
/// client error rather than a 500.
fn map_diesel_error(err: DieselError) -> PerformanceError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
            PerformanceError::Validation(FieldErrors::single(
                NON_FIELD_ERRORS,
                format!("Referenced employee does not exist: {}", info.message()),
            ))
        }
        other => PerformanceError::Database(other.to_string()),
    }
}

/// `%term%` with LIKE metacharacters escaped.
fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn filtered_reviews(filter: &ReviewFilter) -> performance_reviews::BoxedQuery<'static, Pg> {
    let mut query = performance_reviews::table.into_boxed();

    if let Some(employee) = filter.employee {
        query = query.filter(performance_reviews::employee_id.eq(employee));
    }
    if let Some(reviewer) = filter.reviewer {
        query = query.filter(performance_reviews::reviewer_id.eq(reviewer));
    }
    if let Some(status) = filter.status {
        query = query.filter(performance_reviews::status.eq(status));
    }
    for term in &filter.search {
        let pattern = contains_pattern(term);
        let named = employees::table
            .filter(
                employees::first_name
                    .ilike(pattern.clone())
                    .or(employees::last_name.ilike(pattern)),
            )
            .select(employees::employee_id);
        query = query.filter(performance_reviews::employee_id.eq_any(named));
    }
    query
}

fn ordered_reviews(filter: &ReviewFilter) -> performance_reviews::BoxedQuery<'static, Pg> {
    let mut query = filtered_reviews(filter);
    for term in &filter.ordering {
        query = match (term.field, term.direction) {
            (ReviewOrderField::ReviewDate, Direction::Asc) => {
                query.then_order_by(performance_reviews::review_date.asc())
            }
            (ReviewOrderField::ReviewDate, Direction::Desc) => {
                query.then_order_by(performance_reviews::review_date.desc())
            }
            (ReviewOrderField::CreatedAt, Direction::Asc) => {
                query.then_order_by(performance_reviews::created_at.asc())
            }
            (ReviewOrderField::CreatedAt, Direction::Desc) => {
                query.then_order_by(performance_reviews::created_at.desc())
            }
        };
    }
    query.then_order_by(performance_reviews::review_id.desc())
}

fn filtered_goals(filter: &GoalFilter) -> goals::BoxedQuery<'static, Pg> {
    let mut query = goals::table.into_boxed();

    if let Some(employee) = filter.employee {
        query = query.filter(goals::employee_id.eq(employee));
    }
    if let Some(status) = filter.status {
        query = query.filter(goals::status.eq(status));
    }
    for term in &filter.search {
        let pattern = contains_pattern(term);
        let named = employees::table
            .filter(
                employees::first_name
                    .ilike(pattern.clone())
                    .or(employees::last_name.ilike(pattern.clone())),
            )
            .select(employees::employee_id);
        query = query.filter(goals::title.ilike(pattern).or(goals::employee_id.eq_any(named)));
    }
    query
}

fn ordered_goals(filter: &GoalFilter) -> goals::BoxedQuery<'static, Pg> {
    let mut query = filtered_goals(filter);
    for term in &filter.ordering {
        query = match (term.field, term.direction) {
            (GoalOrderField::StartDate, Direction::Asc) => query.then_order_by(goals::start_date.asc()),
            (GoalOrderField::StartDate, Direction::Desc) => query.then_order_by(goals::start_date.desc()),
            (GoalOrderField::EndDate, Direction::Asc) => query.then_order_by(goals::end_date.asc()),
            (GoalOrderField::EndDate, Direction::Desc) => query.then_order_by(goals::end_date.desc()),
            (GoalOrderField::CreatedAt, Direction::Asc) => query.then_order_by(goals::created_at.asc()),
            (GoalOrderField::CreatedAt, Direction::Desc) => query.then_order_by(goals::created_at.desc()),
        };
    }
    query.then_order_by(goals::goal_id.desc())
}

#[async_trait]
impl PerformanceStore for PgStore {
    async fn ping(&self) -> Result<(), PerformanceError> {
        self.run(|conn| diesel::sql_query("SELECT 1").execute(conn).map(|_| ()))
            .await
    }

    async fn employee_names(&self, ids: &[i32]) -> Result<HashMap<i32, String>, PerformanceError> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(i32, String, String)> = self
            .run(move |conn| {
                employees::table
                    .filter(employees::employee_id.eq_any(ids))
                    .select((employees::employee_id, employees::first_name, employees::last_name))
                    .load(conn)
            })
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, first, last)| (id, EmployeeName::new(&first, &last).full_name()))
            .collect())
    }

    async fn count_reviews(&self, filter: &ReviewFilter) -> Result<i64, PerformanceError> {
        let filter = filter.clone();
        self.run(move |conn| filtered_reviews(&filter).count().get_result(conn))
            .await
    }

    async fn list_reviews(
        &self,
        filter: &ReviewFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ReviewRecord>, PerformanceError> {
        let filter = filter.clone();
        self.run(move |conn| {
            ordered_reviews(&filter)
                .offset(offset)
                .limit(limit)
                .select(ReviewRecord::as_select())
                .load(conn)
        })
        .await
    }

    async fn get_review(&self, review_id: i32) -> Result<Option<ReviewRecord>, PerformanceError> {
        self.run(move |conn| {
            performance_reviews::table
                .find(review_id)
                .select(ReviewRecord::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn insert_review(&self, data: ReviewData) -> Result<ReviewRecord, PerformanceError> {
        self.run(move |conn| {
            let now = Utc::now();
            diesel::insert_into(performance_reviews::table)
                .values((
                    &data,
                    performance_reviews::created_at.eq(now),
                    performance_reviews::updated_at.eq(now),
                ))
                .returning(ReviewRecord::as_returning())
                .get_result(conn)
        })
        .await
    }

    async fn update_review(&self, review_id: i32, data: ReviewData) -> Result<Option<ReviewRecord>, PerformanceError> {
        self.run(move |conn| {
            diesel::update(performance_reviews::table.find(review_id))
                .set((&data, performance_reviews::updated_at.eq(Utc::now())))
                .returning(ReviewRecord::as_returning())
                .get_result(conn)
                .optional()
        })
        .await
    }

    async fn delete_review(&self, review_id: i32) -> Result<bool, PerformanceError> {
        let deleted = self
            .run(move |conn| diesel::delete(performance_reviews::table.find(review_id)).execute(conn))
            .await?;
        Ok(deleted > 0)
    }

    async fn count_goals(&self, filter: &GoalFilter) -> Result<i64, PerformanceError> {
        let filter = filter.clone();
        self.run(move |conn| filtered_goals(&filter).count().get_result(conn))
            .await
    }

    async fn list_goals(&self, filter: &GoalFilter, offset: i64, limit: i64) -> Result<Vec<GoalRecord>, PerformanceError> {
        let filter = filter.clone();
        self.run(move |conn| {
            ordered_goals(&filter)
                .offset(offset)
                .limit(limit)
                .select(GoalRecord::as_select())
                .load(conn)
        })
        .await
    }

    async fn get_goal(&self, goal_id: i32) -> Result<Option<GoalRecord>, PerformanceError> {
        self.run(move |conn| {
            goals::table
                .find(goal_id)
                .select(GoalRecord::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn insert_goal(&self, data: GoalData) -> Result<GoalRecord, PerformanceError> {
        self.run(move |conn| {
            let now = Utc::now();
            diesel::insert_into(goals::table)
                .values((&data, goals::created_at.eq(now), goals::updated_at.eq(now)))
                .returning(GoalRecord::as_returning())
                .get_result(conn)
        })
        .await
    }

    async fn update_goal(&self, goal_id: i32, data: GoalData) -> Result<Option<GoalRecord>, PerformanceError> {
        self.run(move |conn| {
            diesel::update(goals::table.find(goal_id))
                .set((&data, goals::updated_at.eq(Utc::now())))
                .returning(GoalRecord::as_returning())
                .get_result(conn)
                .optional()
        })
        .await
    }

    async fn delete_goal(&self, goal_id: i32) -> Result<bool, PerformanceError> {
        let deleted = self
            .run(move |conn| diesel::delete(goals::table.find(goal_id)).execute(conn))
            .await?;
        Ok(deleted > 0)
    }
}
