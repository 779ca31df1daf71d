//! Audit trail
//!
//! Audit records are produced by the audit interceptor for every instrumented
//! call and handed to an [`AuditSink`]. The sink's worker writes them to the
//! `audit` log target and to an [`AuditStore`]:
//!
//! - [`PgAuditStore`]: the `audit_logs` table in Postgres
//! - [`MemoryAuditStore`]: in process, used without a database and in tests
//!
//! The [`routes`] module exposes the stored trail under `/api/audit`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqlx::PgPool;
//! use taskboard_server::audit::{AuditSink, AuditSinkConfig, AuditStore, PgAuditStore};
//!
//! # async fn example(pool: PgPool) {
//! let store: Arc<dyn AuditStore> = Arc::new(PgAuditStore::new(pool));
//! let (sink, worker) = AuditSink::spawn(AuditSinkConfig::default(), Some(store));
//! // ... build the interceptor chain with `sink` ...
//! worker.shutdown().await;
//! # }
//! ```

mod models;
mod queries;
pub mod routes;
mod sink;
mod store;

pub use models::{
    AuditEntry, AuditRecord, AuditStatistics, OperationResult, UserActivity,
    DEFAULT_AUDIT_QUERY_LIMIT, MAX_AUDIT_QUERY_LIMIT,
};
pub use queries::PgAuditStore;
pub use sink::{format_audit_error_line, format_audit_line, AuditSink, AuditSinkConfig, AuditWorker};
pub use store::{AuditStore, MemoryAuditStore, DEFAULT_MEMORY_STORE_CAPACITY};
