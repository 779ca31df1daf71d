//! Audit data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

// ============================================================================
// Audit Query Constants
// ============================================================================

/// Default number of audit entries returned per query
pub const DEFAULT_AUDIT_QUERY_LIMIT: i64 = 100;

/// Maximum number of audit entries that can be returned in a single query.
/// This prevents excessive memory usage and query timeouts.
pub const MAX_AUDIT_QUERY_LIMIT: i64 = 1000;

/// Execution time above which the statistics count an operation as slow
pub const STATISTICS_SLOW_THRESHOLD_MS: i64 = 1000;

/// How an audited operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationResult {
    Success,
    Failure,
    PartialSuccess,
}

impl OperationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::PartialSuccess => "PARTIAL_SUCCESS",
        }
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "PARTIAL_SUCCESS" => Ok(Self::PartialSuccess),
            other => Err(format!(
                "Unknown operation result '{}' (expected SUCCESS, FAILURE or PARTIAL_SUCCESS)",
                other
            )),
        }
    }
}

/// One audited invocation, as produced by the audit interceptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub user_id: Option<i64>,
    pub username: String,
    pub user_roles: String,
    pub unit_name: String,
    pub operation_name: String,
    pub description: String,
    /// Sanitized parameter list, when parameter logging is on
    pub parameters: Option<String>,
    /// Sanitized return value, when return value logging is on
    pub return_value: Option<String>,
    pub execution_time_ms: i64,
    pub result: OperationResult,
    /// `"<kind>: <message>"` of the failure
    pub error_message: Option<String>,
    pub ip_address: String,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Audit log entry from the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub username: String,
    pub user_roles: String,
    pub unit_name: String,
    pub operation_name: String,
    pub description: String,
    pub parameters: Option<String>,
    pub return_value: Option<String>,
    pub execution_time_ms: i64,
    pub result: String,
    pub error_message: Option<String>,
    pub ip_address: String,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn from_record(id: i64, record: AuditRecord) -> Self {
        Self {
            id,
            user_id: record.user_id,
            username: record.username,
            user_roles: record.user_roles,
            unit_name: record.unit_name,
            operation_name: record.operation_name,
            description: record.description,
            parameters: record.parameters,
            return_value: record.return_value,
            execution_time_ms: record.execution_time_ms,
            result: record.result.as_str().to_string(),
            error_message: record.error_message,
            ip_address: record.ip_address,
            session_id: record.session_id,
            user_agent: record.user_agent,
            timestamp: record.timestamp,
        }
    }
}

/// Aggregate counts over the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatistics {
    pub total_operations: i64,
    pub operations_last_24_hours: i64,
    pub operations_last_week: i64,
    pub failed_operations: i64,
    pub slow_operations: i64,
    /// Percentage of non-failed operations; 0 when the log is empty
    pub success_rate: f64,
}

impl AuditStatistics {
    pub fn from_counts(
        total_operations: i64,
        operations_last_24_hours: i64,
        operations_last_week: i64,
        failed_operations: i64,
        slow_operations: i64,
    ) -> Self {
        let success_rate = if total_operations > 0 {
            (total_operations - failed_operations) as f64 / total_operations as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total_operations,
            operations_last_24_hours,
            operations_last_week,
            failed_operations,
            slow_operations,
            success_rate,
        }
    }
}

/// Operation count for one user over a trailing window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub user_id: i64,
    pub operation_count: i64,
    pub time_window_hours: i64,
    pub since: DateTime<Utc>,
}

/// Clamp a requested page size; non-positive sizes get the default
pub fn clamp_limit(limit: i64) -> i64 {
    if limit < 1 {
        DEFAULT_AUDIT_QUERY_LIMIT
    } else {
        limit.min(MAX_AUDIT_QUERY_LIMIT)
    }
}
