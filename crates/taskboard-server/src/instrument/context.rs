//! Ambient request context
//!
//! [`RequestMetaLayer`] snapshots the parts of an inbound request that
//! instrumentation cares about (headers, peer address, session) into an
//! `Arc<RequestMeta>` request extension. Handlers pass that value along inside
//! the [`Invocation`](super::Invocation); the audit interceptor turns it into
//! an [`InvocationContext`] with [`ContextExtractor::capture`].
//!
//! Extraction never fails. Every field has a fallback, and calls made outside
//! of any request (background jobs, tests) get the `SYSTEM` identity.

use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};

/// Header carrying the caller's numeric user id
pub const USER_ID_HEADER: &str = "user-id";

/// Header carrying the caller's display name
pub const USERNAME_HEADER: &str = "username";

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Username used when there is no request at all
pub const SYSTEM_USERNAME: &str = "SYSTEM";

/// Username used when a request carries no identity
pub const UNKNOWN_USERNAME: &str = "UNKNOWN";

pub const USER_ROLE: &str = "USER";
pub const ANONYMOUS_ROLE: &str = "ANONYMOUS";

/// Address recorded when the client address cannot be determined
pub const UNKNOWN_IP: &str = "0.0.0.0";

/// Session data placed into request extensions by the authentication layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub user_id: Option<i64>,
    pub username: Option<String>,
}

/// Snapshot of the inbound request, scoped to one call
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub headers: HeaderMap,
    pub peer_addr: Option<SocketAddr>,
    pub session: Option<Session>,
}

impl RequestMeta {
    pub fn from_request<B>(request: &axum::http::Request<B>) -> Self {
        Self {
            headers: request.headers().clone(),
            peer_addr: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
            session: request.extensions().get::<Session>().cloned(),
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    }
}

/// Identity and request metadata of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationContext {
    pub user_id: Option<i64>,
    pub username: String,
    pub roles: String,
    pub ip_address: String,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
}

impl InvocationContext {
    /// Context of a call made outside any request
    pub fn system() -> Self {
        Self {
            user_id: None,
            username: SYSTEM_USERNAME.to_string(),
            roles: ANONYMOUS_ROLE.to_string(),
            ip_address: UNKNOWN_IP.to_string(),
            session_id: None,
            user_agent: None,
        }
    }
}

/// Derives an [`InvocationContext`] from the ambient request
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextExtractor;

impl ContextExtractor {
    pub fn capture(&self, request: Option<&RequestMeta>) -> InvocationContext {
        let Some(request) = request else {
            return InvocationContext::system();
        };

        let user_id = self.user_id(request);
        let roles = if user_id.is_some() { USER_ROLE } else { ANONYMOUS_ROLE };

        InvocationContext {
            user_id,
            username: self.username(request),
            roles: roles.to_string(),
            ip_address: self.client_ip(request),
            session_id: request.session.as_ref().map(|s| s.id.clone()),
            user_agent: request.header(axum::http::header::USER_AGENT.as_str()).map(str::to_string),
        }
    }

    /// `User-Id` header, then the session. A malformed header yields none.
    fn user_id(&self, request: &RequestMeta) -> Option<i64> {
        match request.header(USER_ID_HEADER) {
            Some(raw) => raw.trim().parse().ok(),
            None => request.session.as_ref().and_then(|s| s.user_id),
        }
    }

    fn username(&self, request: &RequestMeta) -> String {
        request
            .header(USERNAME_HEADER)
            .map(str::to_string)
            .or_else(|| request.session.as_ref().and_then(|s| s.username.clone()))
            .unwrap_or_else(|| UNKNOWN_USERNAME.to_string())
    }

    /// `X-Forwarded-For` (first hop), `X-Real-IP`, then the peer address
    fn client_ip(&self, request: &RequestMeta) -> String {
        if let Some(forwarded) = request.header(FORWARDED_FOR_HEADER) {
            if let Some(first) = forwarded.split(',').map(str::trim).find(|hop| !hop.is_empty()) {
                return first.to_string();
            }
        }

        if let Some(real_ip) = request.header(REAL_IP_HEADER) {
            return real_ip.trim().to_string();
        }

        request
            .peer_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_IP.to_string())
    }
}

/// Layer that attaches an `Arc<RequestMeta>` to every request
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestMetaLayer;

impl<S> Layer<S> for RequestMetaLayer {
    type Service = RequestMetaService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestMetaService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestMetaService<S> {
    inner: S,
}

impl<S> Service<Request> for RequestMetaService<S>
where
    S: Service<Request>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let meta = Arc::new(RequestMeta::from_request(&request));
        request.extensions_mut().insert(meta);
        self.inner.call(request)
    }
}
