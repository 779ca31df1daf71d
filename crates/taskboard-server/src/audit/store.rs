//! Audit persistence
//!
//! [`AuditStore`] is the append-only destination for audit records plus the
//! read queries the audit API exposes. [`PgAuditStore`](super::PgAuditStore)
//! backs it with Postgres; [`MemoryAuditStore`] keeps the most recent entries
//! in process, evicting the oldest once full.

use super::models::{
    clamp_limit, AuditEntry, AuditRecord, AuditStatistics, OperationResult,
    MAX_AUDIT_QUERY_LIMIT, STATISTICS_SLOW_THRESHOLD_MS,
};
use crate::error::InstrumentError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

/// Entries kept by [`MemoryAuditStore::new`]
pub const DEFAULT_MEMORY_STORE_CAPACITY: usize = 10_000;

type StoreResult<T> = Result<T, InstrumentError>;

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a record, returning the stored entry
    async fn insert(&self, record: AuditRecord) -> StoreResult<AuditEntry>;

    /// Newest first
    async fn recent(&self, limit: i64, offset: i64) -> StoreResult<Vec<AuditEntry>>;

    async fn by_user(&self, user_id: i64) -> StoreResult<Vec<AuditEntry>>;

    async fn by_result(&self, result: OperationResult) -> StoreResult<Vec<AuditEntry>>;

    /// Entries with `start <= timestamp <= end`, newest first
    async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Vec<AuditEntry>>;

    /// Entries slower than `threshold_ms`, slowest first
    async fn slow_operations(&self, threshold_ms: i64) -> StoreResult<Vec<AuditEntry>>;

    async fn count_user_operations_since(&self, user_id: i64, since: DateTime<Utc>) -> StoreResult<i64>;

    async fn statistics(&self, now: DateTime<Utc>) -> StoreResult<AuditStatistics>;
}

/// In-process ring buffer, newest entries last
#[derive(Debug)]
pub struct MemoryAuditStore {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_STORE_CAPACITY)
    }
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` entries (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry in insertion order
    pub fn snapshot(&self) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.lock()?.iter().cloned().collect())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, VecDeque<AuditEntry>>> {
        self.entries
            .lock()
            .map_err(|_| InstrumentError::Store("in-memory audit store lock poisoned".to_string()))
    }

    /// Matching entries, newest first
    fn newest_first<P>(&self, predicate: P) -> StoreResult<Vec<AuditEntry>>
    where
        P: Fn(&AuditEntry) -> bool,
    {
        let entries = self.lock()?;
        let mut selected: Vec<AuditEntry> = entries.iter().filter(|e| predicate(e)).cloned().collect();
        selected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(selected)
    }

    /// Like [`Self::newest_first`], capped at the maximum query limit
    fn select<P>(&self, predicate: P) -> StoreResult<Vec<AuditEntry>>
    where
        P: Fn(&AuditEntry) -> bool,
    {
        let mut selected = self.newest_first(predicate)?;
        selected.truncate(MAX_AUDIT_QUERY_LIMIT as usize);
        Ok(selected)
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert(&self, record: AuditRecord) -> StoreResult<AuditEntry> {
        let mut entries = self.lock()?;
        let id = entries.back().map_or(1, |last| last.id + 1);
        let entry = AuditEntry::from_record(id, record);
        entries.push_back(entry.clone());
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        Ok(entry)
    }

    async fn recent(&self, limit: i64, offset: i64) -> StoreResult<Vec<AuditEntry>> {
        let limit = clamp_limit(limit) as usize;
        let offset = offset.max(0) as usize;
        Ok(self.newest_first(|_| true)?.into_iter().skip(offset).take(limit).collect())
    }

    async fn by_user(&self, user_id: i64) -> StoreResult<Vec<AuditEntry>> {
        self.select(|e| e.user_id == Some(user_id))
    }

    async fn by_result(&self, result: OperationResult) -> StoreResult<Vec<AuditEntry>> {
        self.select(|e| e.result == result.as_str())
    }

    async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Vec<AuditEntry>> {
        self.select(|e| e.timestamp >= start && e.timestamp <= end)
    }

    async fn slow_operations(&self, threshold_ms: i64) -> StoreResult<Vec<AuditEntry>> {
        let mut slow = self.newest_first(|e| e.execution_time_ms > threshold_ms)?;
        slow.sort_by(|a, b| b.execution_time_ms.cmp(&a.execution_time_ms));
        slow.truncate(MAX_AUDIT_QUERY_LIMIT as usize);
        Ok(slow)
    }

    async fn count_user_operations_since(&self, user_id: i64, since: DateTime<Utc>) -> StoreResult<i64> {
        let entries = self.lock()?;
        let count = entries
            .iter()
            .filter(|e| e.user_id == Some(user_id) && e.timestamp > since)
            .count();
        Ok(count as i64)
    }

    async fn statistics(&self, now: DateTime<Utc>) -> StoreResult<AuditStatistics> {
        let entries = self.lock()?;
        let day_ago = now - Duration::hours(24);
        let week_ago = now - Duration::weeks(1);
        let since = |start: DateTime<Utc>| {
            entries
                .iter()
                .filter(|e| e.timestamp >= start && e.timestamp <= now)
                .count() as i64
        };
        let failed = entries
            .iter()
            .filter(|e| e.result == OperationResult::Failure.as_str())
            .count() as i64;
        let slow = entries
            .iter()
            .filter(|e| e.execution_time_ms > STATISTICS_SLOW_THRESHOLD_MS)
            .count() as i64;

        Ok(AuditStatistics::from_counts(
            entries.len() as i64,
            since(day_ago),
            since(week_ago),
            failed,
            slow,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user_id: Option<i64>, result: OperationResult, execution_time_ms: i64, age_hours: i64) -> AuditRecord {
        AuditRecord {
            user_id,
            username: user_id.map_or("SYSTEM".to_string(), |id| format!("user-{}", id)),
            user_roles: if user_id.is_some() { "USER" } else { "ANONYMOUS" }.to_string(),
            unit_name: "TaskService".to_string(),
            operation_name: "createTask".to_string(),
            description: "Create Task".to_string(),
            parameters: None,
            return_value: None,
            execution_time_ms,
            result,
            error_message: (result == OperationResult::Failure).then(|| "ValidationError: boom".to_string()),
            ip_address: "10.0.0.1".to_string(),
            session_id: None,
            user_agent: None,
            timestamp: Utc::now() - Duration::hours(age_hours),
        }
    }

    async fn seeded() -> MemoryAuditStore {
        let store = MemoryAuditStore::new();
        store.insert(record(Some(1), OperationResult::Success, 20, 1)).await.unwrap();
        store.insert(record(Some(1), OperationResult::Failure, 1500, 30)).await.unwrap();
        store.insert(record(Some(2), OperationResult::Success, 2500, 2)).await.unwrap();
        store.insert(record(None, OperationResult::Success, 3, 24 * 10)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let store = seeded().await;
        let ids: Vec<i64> = store.snapshot().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_with_paging() {
        let store = seeded().await;

        let first_page = store.recent(2, 0).await.unwrap();
        assert_eq!(first_page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 3]);

        let second_page = store.recent(2, 2).await.unwrap();
        assert_eq!(second_page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 4]);
    }

    #[tokio::test]
    async fn test_filters() {
        let store = seeded().await;

        assert_eq!(store.by_user(1).await.unwrap().len(), 2);
        assert_eq!(store.by_result(OperationResult::Failure).await.unwrap()[0].id, 2);

        let slow = store.slow_operations(1000).await.unwrap();
        assert_eq!(slow.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 2]);

        let now = Utc::now();
        let window = store.between(now - Duration::hours(5), now).await.unwrap();
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn test_user_activity_count() {
        let store = seeded().await;
        let since = Utc::now() - Duration::hours(24);

        assert_eq!(store.count_user_operations_since(1, since).await.unwrap(), 1);
        assert_eq!(store.count_user_operations_since(9, since).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oldest_entries_evicted_at_capacity() {
        let store = MemoryAuditStore::with_capacity(3);
        for age in [5, 4, 3, 2, 1] {
            store.insert(record(Some(1), OperationResult::Success, 10, age)).await.unwrap();
        }

        assert_eq!(store.len(), 3);
        let ids: Vec<i64> = store.snapshot().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(store.statistics(Utc::now()).await.unwrap().total_operations, 3);
    }

    #[test]
    fn test_zero_capacity_keeps_one_entry() {
        assert_eq!(MemoryAuditStore::with_capacity(0).capacity(), 1);
        assert_eq!(MemoryAuditStore::new().capacity(), DEFAULT_MEMORY_STORE_CAPACITY);
    }

    #[tokio::test]
    async fn test_statistics() {
        let store = seeded().await;
        let stats = store.statistics(Utc::now()).await.unwrap();

        assert_eq!(stats.total_operations, 4);
        assert_eq!(stats.operations_last_24_hours, 2);
        assert_eq!(stats.operations_last_week, 3);
        assert_eq!(stats.failed_operations, 1);
        assert_eq!(stats.slow_operations, 2);
        assert_eq!(stats.success_rate, 75.0);
    }
}
