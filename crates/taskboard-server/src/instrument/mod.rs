//! Cross-cutting instrumentation for business operations
//!
//! Business calls are wrapped in an [`InterceptorChain`] which audits and
//! times them without the operation knowing:
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskboard_server::arguments;
//! use taskboard_server::audit::{AuditSink, AuditSinkConfig};
//! use taskboard_server::instrument::{ConfigRegistry, ConfigResolver, InterceptorChain, Invocation};
//!
//! # async fn example() {
//! let resolver = Arc::new(ConfigResolver::new(ConfigRegistry::default()));
//! let (sink, worker) = AuditSink::spawn(AuditSinkConfig::default(), None);
//! let chain = InterceptorChain::standard(resolver, sink);
//!
//! let invocation = Invocation::new("TaskService", "createTask")
//!     .with_arguments(arguments!["Buy milk", 42]);
//! let created: Result<u64, std::io::Error> = chain.invoke(invocation, async { Ok(7) }).await;
//!
//! worker.shutdown().await;
//! # }
//! ```

pub mod audit;
pub mod chain;
pub mod config;
pub mod context;
pub mod performance;
pub mod sanitize;

pub use audit::AuditInterceptor;
pub use chain::{Failure, Instrumented, Interceptor, InterceptorChain, Invocation, Next, Outcome};
pub use config::{
    AuditSettings, ConfigRegistry, ConfigResolver, Declaration, InstrumentationConfig,
    PerformanceSettings, UnitDeclaration,
};
pub use context::{ContextExtractor, InvocationContext, RequestMeta, RequestMetaLayer, Session};
pub use performance::PerformanceInterceptor;
pub use sanitize::{serialize_parameters, serialize_return_value, Argument};
