//! Read-only audit log API
//!
//! Every handler runs its store query through the interceptor chain under the
//! `AuditController` unit, so reading the audit log is itself audited.

use super::models::{clamp_limit, AuditEntry, AuditStatistics, OperationResult, UserActivity};
use crate::{
    api::AppState,
    arguments,
    error::{AppError, ServerResult},
    instrument::{
        config::RegistryBuilder, AuditSettings, Declaration, RequestMeta, UnitDeclaration,
    },
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const AUDIT_CONTROLLER: &str = "AuditController";

const DEFAULT_PAGE_SIZE: i64 = 20;
const DEFAULT_SLOW_THRESHOLD_MS: i64 = 1000;
const DEFAULT_ACTIVITY_WINDOW_HOURS: i64 = 24;

/// Instrumentation settings for the audit API, unless already declared
pub fn declare(builder: RegistryBuilder) -> RegistryBuilder {
    builder.unit_or_keep(
        AUDIT_CONTROLLER,
        UnitDeclaration::new()
            .audit(AuditSettings::described("Audit Log Access"))
            .operation(
                "getRecentAuditLogs",
                Declaration::new().audit(AuditSettings::described("View Recent Audit Logs")),
            )
            .operation(
                "getUserAuditLogs",
                Declaration::new().audit(AuditSettings::described("View User Audit Logs").with_parameters()),
            )
            .operation(
                "getAuditLogsByDateRange",
                Declaration::new()
                    .audit(AuditSettings::described("View Audit Logs by Date Range").with_parameters()),
            )
            .operation(
                "getAuditLogsByResult",
                Declaration::new()
                    .audit(AuditSettings::described("View Audit Logs by Result").with_parameters()),
            )
            .operation(
                "getSlowOperations",
                Declaration::new().audit(AuditSettings::described("View Slow Operations")),
            )
            .operation(
                "getAuditStatistics",
                Declaration::new().audit(AuditSettings::described("View Audit Statistics")),
            )
            .operation(
                "getUserActivity",
                Declaration::new().audit(AuditSettings::described("Check User Activity").with_parameters()),
            ),
    )
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/recent", get(recent))
        .route("/user/:user_id", get(by_user))
        .route("/date-range", get(by_date_range))
        .route("/result/:result", get(by_result))
        .route("/slow-operations", get(slow_operations))
        .route("/statistics", get(statistics))
        .route("/user-activity/:user_id", get(user_activity))
}

type Meta = Option<Extension<Arc<RequestMeta>>>;

fn request(meta: Meta) -> Option<Arc<RequestMeta>> {
    meta.map(|Extension(meta)| meta)
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub size: i64,
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPage {
    pub content: Vec<AuditEntry>,
    pub page: i64,
    pub size: i64,
}

async fn recent(
    State(state): State<AppState>,
    meta: Meta,
    Query(params): Query<PageParams>,
) -> ServerResult<Json<AuditPage>> {
    if params.size < 1 {
        return Err(AppError::BadRequest("Page size must be at least 1".to_string()));
    }
    let page = params.page.max(0);
    let size = clamp_limit(params.size);
    let offset = page.saturating_mul(size);

    let content = state
        .audit
        .call(
            "getRecentAuditLogs",
            arguments![page, size],
            request(meta),
            |store| store.recent(size, offset),
        )
        .await?;

    Ok(Json(AuditPage { content, page, size }))
}

async fn by_user(
    State(state): State<AppState>,
    meta: Meta,
    Path(user_id): Path<i64>,
) -> ServerResult<Json<Vec<AuditEntry>>> {
    let entries = state
        .audit
        .call("getUserAuditLogs", arguments![user_id], request(meta), |store| {
            store.by_user(user_id)
        })
        .await?;

    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct DateRangeParams {
    #[serde(alias = "startDate")]
    pub start_date: DateTime<Utc>,
    #[serde(alias = "endDate")]
    pub end_date: DateTime<Utc>,
}

async fn by_date_range(
    State(state): State<AppState>,
    meta: Meta,
    Query(params): Query<DateRangeParams>,
) -> ServerResult<Json<Vec<AuditEntry>>> {
    if params.start_date > params.end_date {
        return Err(AppError::BadRequest("start_date must not be after end_date".to_string()));
    }

    let entries = state
        .audit
        .call(
            "getAuditLogsByDateRange",
            arguments![params.start_date, params.end_date],
            request(meta),
            |store| store.between(params.start_date, params.end_date),
        )
        .await?;

    Ok(Json(entries))
}

async fn by_result(
    State(state): State<AppState>,
    meta: Meta,
    Path(result): Path<String>,
) -> ServerResult<Json<Vec<AuditEntry>>> {
    let result: OperationResult = result.parse().map_err(AppError::BadRequest)?;

    let entries = state
        .audit
        .call("getAuditLogsByResult", arguments![result], request(meta), |store| {
            store.by_result(result)
        })
        .await?;

    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct SlowParams {
    #[serde(default = "default_slow_threshold", alias = "thresholdMs")]
    pub threshold_ms: i64,
}

fn default_slow_threshold() -> i64 {
    DEFAULT_SLOW_THRESHOLD_MS
}

async fn slow_operations(
    State(state): State<AppState>,
    meta: Meta,
    Query(params): Query<SlowParams>,
) -> ServerResult<Json<Vec<AuditEntry>>> {
    let entries = state
        .audit
        .call(
            "getSlowOperations",
            arguments![params.threshold_ms],
            request(meta),
            |store| store.slow_operations(params.threshold_ms),
        )
        .await?;

    Ok(Json(entries))
}

async fn statistics(State(state): State<AppState>, meta: Meta) -> ServerResult<Json<AuditStatistics>> {
    let now = Utc::now();
    let stats = state
        .audit
        .call("getAuditStatistics", arguments![], request(meta), |store| store.statistics(now))
        .await?;

    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct ActivityParams {
    #[serde(default = "default_activity_window")]
    pub hours: i64,
}

fn default_activity_window() -> i64 {
    DEFAULT_ACTIVITY_WINDOW_HOURS
}

async fn user_activity(
    State(state): State<AppState>,
    meta: Meta,
    Path(user_id): Path<i64>,
    Query(params): Query<ActivityParams>,
) -> ServerResult<Json<UserActivity>> {
    let since = (params.hours >= 0)
        .then(|| Duration::try_hours(params.hours))
        .flatten()
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .ok_or_else(|| AppError::BadRequest(format!("hours out of range: {}", params.hours)))?;

    let operation_count = state
        .audit
        .call(
            "getUserActivity",
            arguments![user_id, params.hours],
            request(meta),
            |store| store.count_user_operations_since(user_id, since),
        )
        .await?;

    Ok(Json(UserActivity {
        user_id,
        operation_count,
        time_window_hours: params.hours,
        since,
    }))
}
