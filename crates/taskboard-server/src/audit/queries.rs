//! Database queries for audit logs

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::models::{
    clamp_limit, AuditEntry, AuditRecord, AuditStatistics, OperationResult,
    MAX_AUDIT_QUERY_LIMIT, STATISTICS_SLOW_THRESHOLD_MS,
};
use super::store::AuditStore;
use crate::error::InstrumentError;

const ENTRY_COLUMNS: &str = r#"
    id, user_id, username, user_roles, unit_name, operation_name, description,
    parameters, return_value, execution_time_ms, result, error_message,
    ip_address, session_id, user_agent, timestamp
"#;

/// Postgres-backed audit store over the `audit_logs` table
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct StatisticsRow {
    total: i64,
    last_day: i64,
    last_week: i64,
    failed: i64,
    slow: i64,
}

#[async_trait]
impl AuditStore for PgAuditStore {
    /// Insert a new audit record.
    ///
    /// Returns the stored entry with its generated id.
    async fn insert(&self, record: AuditRecord) -> Result<AuditEntry, InstrumentError> {
        let sql = format!(
            r#"
            INSERT INTO audit_logs (
                user_id, username, user_roles, unit_name, operation_name, description,
                parameters, return_value, execution_time_ms, result, error_message,
                ip_address, session_id, user_agent, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        );

        let entry = sqlx::query_as::<_, AuditEntry>(&sql)
            .bind(record.user_id)
            .bind(&record.username)
            .bind(&record.user_roles)
            .bind(&record.unit_name)
            .bind(&record.operation_name)
            .bind(&record.description)
            .bind(&record.parameters)
            .bind(&record.return_value)
            .bind(record.execution_time_ms)
            .bind(record.result.as_str())
            .bind(&record.error_message)
            .bind(&record.ip_address)
            .bind(&record.session_id)
            .bind(&record.user_agent)
            .bind(record.timestamp)
            .fetch_one(&self.pool)
            .await?;

        debug!(
            audit_id = entry.id,
            unit = %entry.unit_name,
            operation = %entry.operation_name,
            "Created audit log entry"
        );

        Ok(entry)
    }

    async fn recent(&self, limit: i64, offset: i64) -> Result<Vec<AuditEntry>, InstrumentError> {
        let sql = format!(
            "SELECT {} FROM audit_logs ORDER BY timestamp DESC, id DESC LIMIT $1 OFFSET $2",
            ENTRY_COLUMNS
        );

        let entries = sqlx::query_as::<_, AuditEntry>(&sql)
            .bind(clamp_limit(limit))
            .bind(offset.max(0))
            .fetch_all(&self.pool)
            .await?;

        debug!(count = entries.len(), "Retrieved recent audit logs");
        Ok(entries)
    }

    async fn by_user(&self, user_id: i64) -> Result<Vec<AuditEntry>, InstrumentError> {
        let sql = format!(
            "SELECT {} FROM audit_logs WHERE user_id = $1 ORDER BY timestamp DESC, id DESC LIMIT $2",
            ENTRY_COLUMNS
        );

        let entries = sqlx::query_as::<_, AuditEntry>(&sql)
            .bind(user_id)
            .bind(MAX_AUDIT_QUERY_LIMIT)
            .fetch_all(&self.pool)
            .await?;

        debug!(user_id, count = entries.len(), "Retrieved user audit logs");
        Ok(entries)
    }

    async fn by_result(&self, result: OperationResult) -> Result<Vec<AuditEntry>, InstrumentError> {
        let sql = format!(
            "SELECT {} FROM audit_logs WHERE result = $1 ORDER BY timestamp DESC, id DESC LIMIT $2",
            ENTRY_COLUMNS
        );

        Ok(sqlx::query_as::<_, AuditEntry>(&sql)
            .bind(result.as_str())
            .bind(MAX_AUDIT_QUERY_LIMIT)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, InstrumentError> {
        let sql = format!(
            r#"
            SELECT {} FROM audit_logs
            WHERE timestamp BETWEEN $1 AND $2
            ORDER BY timestamp DESC, id DESC
            LIMIT $3
            "#,
            ENTRY_COLUMNS
        );

        Ok(sqlx::query_as::<_, AuditEntry>(&sql)
            .bind(start)
            .bind(end)
            .bind(MAX_AUDIT_QUERY_LIMIT)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn slow_operations(&self, threshold_ms: i64) -> Result<Vec<AuditEntry>, InstrumentError> {
        let sql = format!(
            r#"
            SELECT {} FROM audit_logs
            WHERE execution_time_ms > $1
            ORDER BY execution_time_ms DESC
            LIMIT $2
            "#,
            ENTRY_COLUMNS
        );

        Ok(sqlx::query_as::<_, AuditEntry>(&sql)
            .bind(threshold_ms)
            .bind(MAX_AUDIT_QUERY_LIMIT)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn count_user_operations_since(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<i64, InstrumentError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_logs WHERE user_id = $1 AND timestamp > $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn statistics(&self, now: DateTime<Utc>) -> Result<AuditStatistics, InstrumentError> {
        let row = sqlx::query_as::<_, StatisticsRow>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE timestamp BETWEEN $1 AND $3) AS last_day,
                COUNT(*) FILTER (WHERE timestamp BETWEEN $2 AND $3) AS last_week,
                COUNT(*) FILTER (WHERE result = $4) AS failed,
                COUNT(*) FILTER (WHERE execution_time_ms > $5) AS slow
            FROM audit_logs
            "#,
        )
        .bind(now - Duration::hours(24))
        .bind(now - Duration::weeks(1))
        .bind(now)
        .bind(OperationResult::Failure.as_str())
        .bind(STATISTICS_SLOW_THRESHOLD_MS)
        .fetch_one(&self.pool)
        .await?;

        Ok(AuditStatistics::from_counts(
            row.total,
            row.last_day,
            row.last_week,
            row.failed,
            row.slow,
        ))
    }
}
