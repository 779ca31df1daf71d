//! Audit interceptor
//!
//! Captures who called what, with which arguments and outcome, and hands the
//! resulting [`AuditRecord`] to the [`AuditSink`]. Runs outermost, so its
//! timing includes the other interceptors.

use super::{
    chain::{contain, Interceptor, Invocation, Next, Outcome},
    sanitize::{serialize_parameters, serialize_return_value},
    ConfigResolver, ContextExtractor,
};
use crate::audit::{AuditRecord, AuditSink, OperationResult};
use async_trait::async_trait;
use chrono::Utc;
use std::{sync::Arc, time::Instant};

pub struct AuditInterceptor {
    resolver: Arc<ConfigResolver>,
    extractor: ContextExtractor,
    sink: AuditSink,
}

impl AuditInterceptor {
    pub fn new(resolver: Arc<ConfigResolver>, extractor: ContextExtractor, sink: AuditSink) -> Self {
        Self {
            resolver,
            extractor,
            sink,
        }
    }
}

#[async_trait]
impl Interceptor for AuditInterceptor {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn captures_return_value(&self, call: &Invocation) -> bool {
        self.resolver
            .resolve(call.unit, call.operation)
            .audit
            .log_return_value
    }

    async fn intercept(&self, call: &Invocation, next: Next<'_>) -> Outcome {
        let started = Instant::now();
        let config = self.resolver.resolve(call.unit, call.operation);
        let settings = &config.audit;

        let context = self.extractor.capture(call.request.as_deref());
        let description = settings.description_for(call.unit, call.operation).into_owned();
        let parameters = settings
            .log_parameters
            .then(|| serialize_parameters(&call.arguments));

        let outcome = next.run().await;
        let execution_time_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        if let Outcome::Failed(failure) = &outcome {
            tracing::error!(
                unit = call.unit,
                operation = call.operation,
                "Audited operation {} failed: {}",
                call.operation,
                failure.message
            );
        }

        contain(self.name(), call, || {
            let (result, return_value, error_message) = match &outcome {
                Outcome::Returned(value) => (
                    OperationResult::Success,
                    value
                        .as_ref()
                        .filter(|v| settings.log_return_value && !v.is_null())
                        .map(serialize_return_value),
                    None,
                ),
                Outcome::Failed(failure) => (OperationResult::Failure, None, Some(failure.describe())),
            };

            self.sink.dispatch(AuditRecord {
                user_id: context.user_id,
                username: context.username,
                user_roles: context.roles,
                unit_name: call.unit.to_string(),
                operation_name: call.operation.to_string(),
                description,
                parameters,
                return_value,
                execution_time_ms,
                result,
                error_message,
                ip_address: context.ip_address,
                session_id: context.session_id,
                user_agent: context.user_agent,
                timestamp: Utc::now(),
            })
        });

        outcome
    }
}
