//! Credential upload and removal.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dferelay_core::TenantId;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/:tenant_id/certificate", post(upload_certificate))
        .route("/:tenant_id/access-code", post(store_access_code))
        .route("/:tenant_id", delete(remove_credential))
}

#[derive(Debug, Deserialize)]
struct UploadCertificateRequest {
    /// PKCS#12 container, base64 encoded.
    container: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct CredentialResponse {
    expires_at: DateTime<Utc>,
    mode: &'static str,
}

async fn upload_certificate(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<TenantId>,
    Json(body): Json<UploadCertificateRequest>,
) -> axum::response::Response {
    let container = match STANDARD.decode(&body.container) {
        Ok(bytes) => bytes,
        Err(e) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_container",
                format!("container must be base64: {e}"),
            );
        }
    };

    match services
        .vault
        .store_certificate(tenant_id, &container, &body.password)
        .await
    {
        Ok(record) => (
            StatusCode::CREATED,
            Json(CredentialResponse {
                expires_at: record.expires_at,
                mode: "certificate",
            }),
        )
            .into_response(),
        Err(e) => errors::vault_error_to_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct AccessCodeRequest {
    code: String,
    valid_until: DateTime<Utc>,
}

async fn store_access_code(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<TenantId>,
    Json(body): Json<AccessCodeRequest>,
) -> axum::response::Response {
    match services
        .vault
        .store_access_code(tenant_id, &body.code, body.valid_until)
        .await
    {
        Ok(record) => (
            StatusCode::CREATED,
            Json(CredentialResponse {
                expires_at: record.expires_at,
                mode: "access_code",
            }),
        )
            .into_response(),
        Err(e) => errors::vault_error_to_response(e),
    }
}

async fn remove_credential(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<TenantId>,
) -> axum::response::Response {
    match services.vault.remove(tenant_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::vault_error_to_response(e),
    }
}
