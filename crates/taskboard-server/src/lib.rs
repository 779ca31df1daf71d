//! Taskboard Server Library
//!
//! Instrumentation layer for the taskboard's business services.
//!
//! # Overview
//!
//! Business operations (creating tasks, managing groups, signing in) are
//! routed through an [`instrument::InterceptorChain`] that, without the
//! operation's involvement:
//!
//! - **Audits** each call: who, what, with which (sanitized) arguments, the
//!   outcome and how long it took. Records go to the `audit` log target and to
//!   the `audit_logs` table through an asynchronous sink.
//! - **Times** each call and logs slow, moderate and fast operations under the
//!   `performance` target.
//!
//! Which calls log parameters or return values, their descriptions and slow
//! thresholds are declared per unit and per operation in a
//! [`instrument::ConfigRegistry`], in code or in a TOML file.
//!
//! The stored audit trail is readable under `/api/audit`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskboard_server::{
//!     api::{self, AppState},
//!     audit::{AuditSink, MemoryAuditStore},
//!     config::Config,
//!     instrument::{ConfigRegistry, ConfigResolver, InterceptorChain},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = Arc::new(MemoryAuditStore::new());
//!     let (sink, worker) = AuditSink::spawn(config.audit.sink_config(), Some(store.clone()));
//!     let resolver = Arc::new(ConfigResolver::new(ConfigRegistry::default()));
//!     let chain = InterceptorChain::standard(resolver, sink);
//!
//!     let app = api::create_router(AppState::new(store, chain), &config);
//!     api::serve(app, &config.server).await?;
//!     worker.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod instrument;
pub mod middleware;

// Re-export commonly used types
pub use error::{AppError, InstrumentError, ServerResult};
