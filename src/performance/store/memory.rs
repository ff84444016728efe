use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{EmployeeName, PerformanceStore};
use crate::performance::error::PerformanceError;
use crate::performance::goals::{GoalData, GoalFilter, GoalRecord};
use crate::performance::reviews::{ReviewData, ReviewFilter, ReviewRecord};

#[derive(Debug, Default)]
struct Tables {
    employees: BTreeMap<i32, EmployeeName>,
    reviews: BTreeMap<i32, ReviewRecord>,
    goals: BTreeMap<i32, GoalRecord>,
    next_employee_id: i32,
    next_review_id: i32,
    next_goal_id: i32,
}

fn next_id(counter: &mut i32) -> i32 {
    *counter += 1;
    *counter
}

/// Volatile store with the same referential rules as the SQL schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_employee(&self, first_name: &str, last_name: &str) -> i32 {
        let mut tables = self.tables.write().await;
        let id = next_id(&mut tables.next_employee_id);
        tables.employees.insert(id, EmployeeName::new(first_name, last_name));
        id
    }

    /// Cascades to the employee's own reviews and goals; reviews they wrote lose their reviewer.
    pub async fn remove_employee(&self, employee_id: i32) -> bool {
        let mut tables = self.tables.write().await;
        if tables.employees.remove(&employee_id).is_none() {
            return false;
        }
        tables.reviews.retain(|_, r| r.data.employee_id != employee_id);
        tables.goals.retain(|_, g| g.data.employee_id != employee_id);
        for review in tables.reviews.values_mut() {
            if review.data.reviewer_id == Some(employee_id) {
                review.data.reviewer_id = None;
            }
        }
        true
    }
}

fn page<T: Clone>(rows: Vec<&T>, offset: i64, limit: i64) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(0);
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    rows.into_iter().skip(offset).take(limit).cloned().collect()
}

#[async_trait]
impl PerformanceStore for MemoryStore {
    async fn ping(&self) -> Result<(), PerformanceError> {
        Ok(())
    }

    async fn employee_names(&self, ids: &[i32]) -> Result<HashMap<i32, String>, PerformanceError> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.employees.get(id).map(|name| (*id, name.full_name())))
            .collect())
    }

    async fn count_reviews(&self, filter: &ReviewFilter) -> Result<i64, PerformanceError> {
        let tables = self.tables.read().await;
        let count = tables
            .reviews
            .values()
            .filter(|r| filter.matches(r, tables.employees.get(&r.data.employee_id)))
            .count();
        Ok(count as i64)
    }

    async fn list_reviews(
        &self,
        filter: &ReviewFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ReviewRecord>, PerformanceError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<&ReviewRecord> = tables
            .reviews
            .values()
            .filter(|r| filter.matches(r, tables.employees.get(&r.data.employee_id)))
            .collect();
        rows.sort_by(|a, b| filter.compare(a, b));
        Ok(page(rows, offset, limit))
    }

    async fn get_review(&self, review_id: i32) -> Result<Option<ReviewRecord>, PerformanceError> {
        Ok(self.tables.read().await.reviews.get(&review_id).cloned())
    }

    async fn insert_review(&self, data: ReviewData) -> Result<ReviewRecord, PerformanceError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let record = ReviewRecord {
            review_id: next_id(&mut tables.next_review_id),
            data,
            created_at: now,
            updated_at: now,
        };
        tables.reviews.insert(record.review_id, record.clone());
        Ok(record)
    }

    async fn update_review(&self, review_id: i32, data: ReviewData) -> Result<Option<ReviewRecord>, PerformanceError> {
        let mut tables = self.tables.write().await;
        Ok(tables.reviews.get_mut(&review_id).map(|record| {
            record.data = data;
            record.updated_at = Utc::now();
            record.clone()
        }))
    }

    async fn delete_review(&self, review_id: i32) -> Result<bool, PerformanceError> {
        Ok(self.tables.write().await.reviews.remove(&review_id).is_some())
    }

    async fn count_goals(&self, filter: &GoalFilter) -> Result<i64, PerformanceError> {
        let tables = self.tables.read().await;
        let count = tables
            .goals
            .values()
            .filter(|g| filter.matches(g, tables.employees.get(&g.data.employee_id)))
            .count();
        Ok(count as i64)
    }

    async fn list_goals(&self, filter: &GoalFilter, offset: i64, limit: i64) -> Result<Vec<GoalRecord>, PerformanceError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<&GoalRecord> = tables
            .goals
            .values()
            .filter(|g| filter.matches(g, tables.employees.get(&g.data.employee_id)))
            .collect();
        rows.sort_by(|a, b| filter.compare(a, b));
        Ok(page(rows, offset, limit))
    }

    async fn get_goal(&self, goal_id: i32) -> Result<Option<GoalRecord>, PerformanceError> {
        Ok(self.tables.read().await.goals.get(&goal_id).cloned())
    }

    async fn insert_goal(&self, data: GoalData) -> Result<GoalRecord, PerformanceError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let record = GoalRecord {
            goal_id: next_id(&mut tables.next_goal_id),
            data,
            created_at: now,
            updated_at: now,
        };
        tables.goals.insert(record.goal_id, record.clone());
        Ok(record)
    }

    async fn update_goal(&self, goal_id: i32, data: GoalData) -> Result<Option<GoalRecord>, PerformanceError> {
        let mut tables = self.tables.write().await;
        Ok(tables.goals.get_mut(&goal_id).map(|record| {
            record.data = data;
            record.updated_at = Utc::now();
            record.clone()
        }))
    }

    async fn delete_goal(&self, goal_id: i32) -> Result<bool, PerformanceError> {
        Ok(self.tables.write().await.goals.remove(&goal_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::enums::{GoalStatus, ReviewStatus};
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn goal(employee_id: i32, title: &str, start: u32) -> GoalData {
        GoalData {
            employee_id,
            title: title.to_string(),
            description: "d".to_string(),
            target_value: None,
            current_value: BigDecimal::from(0),
            unit: None,
            start_date: day(start),
            end_date: day(28),
            status: GoalStatus::NotStarted,
            progress_percentage: BigDecimal::from(0),
        }
    }

    fn review(employee_id: i32, reviewer_id: Option<i32>) -> ReviewData {
        ReviewData {
            employee_id,
            review_date: day(1),
            reviewer_id,
            review_period_start: day(1),
            review_period_end: day(2),
            score: BigDecimal::from(3),
            feedback: "ok".to_string(),
            goal_progress: BigDecimal::from(0),
            strengths: None,
            areas_for_improvement: None,
            recommendations: None,
            status: ReviewStatus::Draft,
        }
    }

    #[tokio::test]
    async fn test_ids_are_sequential() {
        let store = MemoryStore::new();
        let emp = store.add_employee("Jane", "Smith").await;
        let first = store.insert_goal(goal(emp, "a", 1)).await.unwrap();
        let second = store.insert_goal(goal(emp, "b", 2)).await.unwrap();
        assert_eq!((first.goal_id, second.goal_id), (1, 2));
        assert_eq!(first.created_at, first.updated_at);
    }

    #[tokio::test]
    async fn test_list_filters_sorts_and_pages() {
        let store = MemoryStore::new();
        let jane = store.add_employee("Jane", "Smith").await;
        let bob = store.add_employee("Bob", "Jones").await;
        for (emp, start) in [(jane, 1), (bob, 2), (jane, 3), (jane, 4)] {
            store.insert_goal(goal(emp, "goal", start)).await.unwrap();
        }

        let filter = GoalFilter {
            employee: Some(jane),
            ..GoalFilter::default()
        };
        assert_eq!(store.count_goals(&filter).await.unwrap(), 3);
        let page = store.list_goals(&filter, 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].data.start_date, day(3));
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let store = MemoryStore::new();
        assert!(store.update_goal(9, goal(1, "x", 1)).await.unwrap().is_none());
        assert!(!store.delete_goal(9).await.unwrap());
        assert!(!store.delete_review(9).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_employee_cascades() {
        let store = MemoryStore::new();
        let jane = store.add_employee("Jane", "Smith").await;
        let boss = store.add_employee("Ann", "Lee").await;
        let own = store.insert_review(review(jane, Some(boss))).await.unwrap();
        let written = store.insert_review(review(boss, Some(jane))).await.unwrap();
        store.insert_goal(goal(jane, "g", 1)).await.unwrap();

        assert!(store.remove_employee(jane).await);
        assert!(store.get_review(own.review_id).await.unwrap().is_none());
        let written = store.get_review(written.review_id).await.unwrap().unwrap();
        assert_eq!(written.data.reviewer_id, None);
        assert_eq!(store.count_goals(&GoalFilter::default()).await.unwrap(), 0);
        assert!(!store.remove_employee(jane).await);
    }

    #[tokio::test]
    async fn test_employee_names_skip_unknown() {
        let store = MemoryStore::new();
        let jane = store.add_employee("Jane", "Smith").await;
        let names = store.employee_names(&[jane, 42]).await.unwrap();
        assert_eq!(names.get(&jane).map(String::as_str), Some("Jane Smith"));
        assert!(!names.contains_key(&42));
    }
}
