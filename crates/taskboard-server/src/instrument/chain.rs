//! Interceptor chain
//!
//! An [`InterceptorChain`] wraps a business operation with an ordered list of
//! [`Interceptor`]s. Each interceptor sees the [`Invocation`], delegates to
//! the rest of the chain through [`Next::run`], and observes the [`Outcome`].
//! The caller gets back exactly the `Result<T, E>` its operation produced.
//!
//! Interceptors record on both the success and failure path. Anything that
//! goes wrong while recording (errors and panics alike) is caught by
//! [`contain`] and logged; it never reaches the caller or the other
//! interceptors.

use super::{
    audit::AuditInterceptor, context::RequestMeta, performance::PerformanceInterceptor,
    Argument, ConfigResolver, ContextExtractor,
};
use crate::{audit::AuditSink, error::InstrumentError};
use async_trait::async_trait;
use futures::future::{poll_fn, BoxFuture};
use serde::Serialize;
use std::{
    fmt::{self, Display},
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::Poll,
};

/// A single call routed through the chain
#[derive(Debug, Clone)]
pub struct Invocation {
    pub unit: &'static str,
    pub operation: &'static str,
    pub arguments: Vec<Argument>,
    pub request: Option<Arc<RequestMeta>>,
}

impl Invocation {
    pub fn new(unit: &'static str, operation: &'static str) -> Self {
        Self {
            unit,
            operation,
            arguments: Vec::new(),
            request: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<Argument>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_request(mut self, request: Option<Arc<RequestMeta>>) -> Self {
        self.request = request;
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.unit, self.operation)
    }
}

/// A business failure as seen by interceptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Short type name of the error
    pub kind: String,
    pub message: String,
}

impl Failure {
    /// `"<kind>: <message>"`
    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }
}

/// What the operation produced, as visible to interceptors.
///
/// `Returned` carries the return value only when some interceptor asked for
/// it through [`Interceptor::captures_return_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Returned(Option<Argument>),
    Failed(Failure),
}

impl Outcome {
    fn observe<T: Serialize, E: Display>(result: &Result<T, E>, capture_return: bool) -> Self {
        match result {
            Ok(value) => Self::Returned(capture_return.then(|| Argument::capture(value))),
            Err(e) => Self::Failed(Failure {
                kind: short_type_name::<E>().to_string(),
                message: e.to_string(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Returned(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(failure) => Some(failure),
            Self::Returned(_) => None,
        }
    }
}

/// Cross-cutting logic around an operation.
///
/// Implementations should drive [`Next::run`] to completion exactly once and
/// return its outcome unchanged. An interceptor that never runs `next`, or
/// drops it part way (a timeout, say), does not lose the call: the chain
/// finishes the operation itself, uninstrumented, and logs a warning.
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the return value should be captured for this call
    fn captures_return_value(&self, _call: &Invocation) -> bool {
        false
    }

    async fn intercept(&self, call: &Invocation, next: Next<'_>) -> Outcome;
}

/// The remainder of the chain, ending in the real operation
pub struct Next<'a> {
    call: &'a Invocation,
    remaining: &'a [Arc<dyn Interceptor>],
    terminal: BoxFuture<'a, Outcome>,
}

impl<'a> Next<'a> {
    pub async fn run(self) -> Outcome {
        match self.remaining.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    call: self.call,
                    remaining: rest,
                    terminal: self.terminal,
                };
                head.intercept(self.call, next).await
            },
            None => self.terminal.await,
        }
    }
}

/// Ordered interceptors, outermost first. Cheap to clone.
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.interceptors.iter().map(|i| i.name()))
            .finish()
    }
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    /// Audit outermost, performance innermost
    pub fn standard(resolver: Arc<ConfigResolver>, sink: AuditSink) -> Self {
        Self::new(vec![
            Arc::new(AuditInterceptor::new(Arc::clone(&resolver), ContextExtractor, sink)),
            Arc::new(PerformanceInterceptor::new(resolver)),
        ])
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run `operation` through every interceptor and hand back its result
    pub async fn invoke<T, E, F>(&self, invocation: Invocation, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>> + Send,
        T: Serialize + Send,
        E: Display + Send,
    {
        let capture_return = self
            .interceptors
            .iter()
            .any(|interceptor| interceptor.captures_return_value(&invocation));

        let stage = Mutex::new(Stage::Pending(Box::pin(operation)));

        let terminal = poll_fn(|cx| {
            let mut stage = stage.lock().unwrap_or_else(PoisonError::into_inner);
            let result = match &mut *stage {
                Stage::Pending(operation) => match operation.as_mut().poll(cx) {
                    Poll::Ready(result) => result,
                    Poll::Pending => return Poll::Pending,
                },
                Stage::Done(_) => return Poll::Ready(Outcome::Returned(None)),
            };
            let outcome = Outcome::observe(&result, capture_return);
            *stage = Stage::Done(result);
            Poll::Ready(outcome)
        });

        Next {
            call: &invocation,
            remaining: &self.interceptors,
            terminal: Box::pin(terminal),
        }
        .run()
        .await;

        match stage.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Stage::Done(result) => result,
            Stage::Pending(operation) => {
                tracing::warn!(
                    unit = invocation.unit,
                    operation = invocation.operation,
                    "Interceptor did not complete the operation; finishing it uninstrumented"
                );
                operation.await
            },
        }
    }
}

/// The wrapped operation while the chain runs. It stays owned by
/// [`InterceptorChain::invoke`] so a dropped [`Next`] cannot lose it.
enum Stage<F: Future> {
    Pending(Pin<Box<F>>),
    Done(F::Output),
}

/// Business value paired with the chain under a fixed unit name
#[derive(Debug, Clone)]
pub struct Instrumented<S> {
    unit: &'static str,
    inner: S,
    chain: InterceptorChain,
}

impl<S: Sync> Instrumented<S> {
    pub fn new(unit: &'static str, inner: S, chain: InterceptorChain) -> Self {
        Self { unit, inner, chain }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn unit(&self) -> &'static str {
        self.unit
    }

    /// Call `f` on the wrapped value through the chain
    pub async fn call<'s, T, E, F, Fut>(
        &'s self,
        operation: &'static str,
        arguments: Vec<Argument>,
        request: Option<Arc<RequestMeta>>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&'s S) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Serialize + Send,
        E: Display + Send,
    {
        let invocation = Invocation::new(self.unit, operation)
            .with_arguments(arguments)
            .with_request(request);
        self.chain.invoke(invocation, f(&self.inner)).await
    }
}

/// Last path segment of `E`'s type name, without generic arguments
pub fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Run a recording step, logging instead of propagating its failures
pub(crate) fn contain<F>(interceptor: &'static str, call: &Invocation, record: F)
where
    F: FnOnce() -> Result<(), InstrumentError>,
{
    let error = match catch_unwind(AssertUnwindSafe(record)) {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(_) => InstrumentError::RecordingPanicked(interceptor),
    };

    tracing::error!(
        interceptor,
        unit = call.unit,
        operation = call.operation,
        error = %error,
        "Failed to record invocation"
    );
}
