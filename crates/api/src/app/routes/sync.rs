//! Sync status read and the manual trigger.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use dferelay_core::TenantId;
use dferelay_sync::{SkipReason, SyncOutcome};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/:tenant_id/status", get(sync_status))
        .route("/:tenant_id/now", post(sync_now))
}

/// The dashboard's per-tenant sync view.
#[derive(Debug, Serialize)]
struct SyncStatusResponse {
    cursor: u64,
    last_sync_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    certificate_configured: bool,
}

async fn sync_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<TenantId>,
) -> axum::response::Response {
    let cursor = match services.cursors.get(tenant_id).await {
        Ok(cursor) => cursor,
        Err(e) => {
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string());
        }
    };
    let configured = match services.vault.configured(tenant_id).await {
        Ok(configured) => configured,
        Err(e) => return errors::vault_error_to_response(e),
    };

    Json(SyncStatusResponse {
        cursor: cursor.last_nsu,
        last_sync_at: cursor.last_sync_at,
        last_error: cursor.last_error,
        certificate_configured: configured,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct SyncNowResponse {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_changed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<u64>,
}

async fn sync_now(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<TenantId>,
) -> axum::response::Response {
    match services.scheduler.sync_now(tenant_id).await {
        Ok(SyncOutcome::Completed(report)) => Json(SyncNowResponse {
            outcome: "completed",
            created: Some(report.created),
            status_changed: Some(report.status_changed),
            cursor: Some(report.final_cursor),
        })
        .into_response(),
        Ok(SyncOutcome::Skipped(reason)) => {
            let outcome = match reason {
                SkipReason::Ineligible => "ineligible",
                SkipReason::BlockedMidRun => "blocked",
                SkipReason::LeaseHeld => "already_running",
            };
            (
                StatusCode::CONFLICT,
                Json(SyncNowResponse {
                    outcome,
                    created: None,
                    status_changed: None,
                    cursor: None,
                }),
            )
                .into_response()
        }
        Err(e) => errors::sync_error_to_response(e),
    }
}
