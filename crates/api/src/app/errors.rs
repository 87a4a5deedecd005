use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use dferelay_billing::TenantStoreError;
use dferelay_dfe::PullError;
use dferelay_documents::DocumentStoreError;
use dferelay_sync::SyncError;
use dferelay_vault::VaultError;
use dferelay_webhooks::WebhookStoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn tenant_error_to_response(err: TenantStoreError) -> axum::response::Response {
    match err {
        TenantStoreError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "tenant not found"),
        TenantStoreError::InvalidTransition(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition", e.to_string())
        }
        TenantStoreError::Backend(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn vault_error_to_response(err: VaultError) -> axum::response::Response {
    match err {
        VaultError::InvalidContainer(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_container", msg)
        }
        VaultError::WrongPassword => {
            json_error(StatusCode::BAD_REQUEST, "wrong_password", "container password does not match")
        }
        VaultError::NotConfigured => {
            json_error(StatusCode::NOT_FOUND, "not_configured", "no credential configured")
        }
        VaultError::Expired(at) => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "credential_expired",
            format!("credential expired at {at}"),
        ),
        VaultError::Crypto(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "crypto_error", e.to_string())
        }
        VaultError::Store(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn webhook_error_to_response(err: WebhookStoreError) -> axum::response::Response {
    match err {
        WebhookStoreError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        WebhookStoreError::Backend(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn document_error_to_response(err: DocumentStoreError) -> axum::response::Response {
    match err {
        DocumentStoreError::NotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", "document not found")
        }
        DocumentStoreError::Backend(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn pull_error_to_response(err: PullError) -> axum::response::Response {
    match err {
        PullError::Rejected(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "rejected", msg)
        }
        PullError::AuthRejected(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "credentials_rejected", msg)
        }
        PullError::SchemaMismatch(msg) => {
            json_error(StatusCode::BAD_GATEWAY, "schema_mismatch", msg)
        }
        PullError::Transient(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
        }
    }
}

pub fn sync_error_to_response(err: SyncError) -> axum::response::Response {
    match err {
        SyncError::Tenant(e) => tenant_error_to_response(e),
        SyncError::Vault(e) => vault_error_to_response(e),
        other => json_error(StatusCode::BAD_GATEWAY, "sync_failed", other.to_string()),
    }
}
