//! Stored document reads and recipient manifestation.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use dferelay_core::{AccessKey, TenantId};
use dferelay_dfe::Manifestation;
use dferelay_documents::FiscalDocument;
use dferelay_webhooks::EventType;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/:tenant_id", get(list_documents))
        .route("/:tenant_id/:access_key", get(get_document))
        .route("/:tenant_id/:access_key/manifest", post(manifest_document))
}

#[derive(Debug, Serialize)]
struct DocumentResponse {
    access_key: String,
    kind: String,
    direction: String,
    status: String,
    issuer: String,
    issuer_name: Option<String>,
    total_cents: i64,
    issued_at: Option<DateTime<Utc>>,
    protocol: Option<String>,
    manifestation: Option<String>,
    manifestation_at: Option<DateTime<Utc>>,
    nsu: u64,
    updated_at: DateTime<Utc>,
}

impl From<FiscalDocument> for DocumentResponse {
    fn from(doc: FiscalDocument) -> Self {
        Self {
            access_key: doc.access_key.as_str().to_string(),
            kind: doc.kind.as_str().to_string(),
            direction: doc.direction.as_str().to_string(),
            status: doc.status.as_str().to_string(),
            issuer: doc.issuer.as_str().to_string(),
            issuer_name: doc.issuer_name,
            total_cents: doc.total_cents,
            issued_at: doc.issued_at,
            protocol: doc.protocol,
            manifestation: doc.manifestation,
            manifestation_at: doc.manifestation_at,
            nsu: doc.nsu,
            updated_at: doc.updated_at,
        }
    }
}

async fn list_documents(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<TenantId>,
) -> axum::response::Response {
    match services.documents.list(tenant_id).await {
        Ok(docs) => Json(
            docs.into_iter()
                .map(DocumentResponse::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::document_error_to_response(e),
    }
}

async fn get_document(
    Extension(services): Extension<Arc<AppServices>>,
    Path((tenant_id, access_key)): Path<(TenantId, String)>,
) -> axum::response::Response {
    let access_key = match AccessKey::parse(&access_key) {
        Ok(key) => key,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_access_key", e.to_string());
        }
    };
    match services.documents.get(tenant_id, &access_key).await {
        Ok(doc) => Json(DocumentResponse::from(doc)).into_response(),
        Err(e) => errors::document_error_to_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct ManifestRequest {
    manifestation: String,
    justification: Option<String>,
}

/// Event payload sent when a manifestation registers.
#[derive(Debug, Serialize)]
struct ManifestationEventPayload<'a> {
    access_key: &'a str,
    manifestation: &'a str,
    protocol: Option<&'a str>,
}

async fn manifest_document(
    Extension(services): Extension<Arc<AppServices>>,
    Path((tenant_id, access_key)): Path<(TenantId, String)>,
    Json(body): Json<ManifestRequest>,
) -> axum::response::Response {
    let access_key = match AccessKey::parse(&access_key) {
        Ok(key) => key,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_access_key", e.to_string());
        }
    };
    let manifestation: Manifestation = match body.manifestation.parse() {
        Ok(m) => m,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_manifestation", e),
    };

    let tenant = match services.tenants.get(tenant_id).await {
        Ok(tenant) => tenant,
        Err(e) => return errors::tenant_error_to_response(e),
    };
    // The document must have been ingested before it can be manifested.
    if let Err(e) = services.documents.get(tenant_id, &access_key).await {
        return errors::document_error_to_response(e);
    }
    let identity = match services
        .vault
        .issue_identity(tenant_id, tenant.tax_id.clone(), tenant.environment)
        .await
    {
        Ok(identity) => identity,
        Err(e) => return errors::vault_error_to_response(e),
    };

    let receipt = match services
        .manifester
        .manifest(
            &identity,
            &access_key,
            manifestation,
            body.justification.as_deref(),
        )
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => return errors::pull_error_to_response(e),
    };

    let doc = match services
        .documents
        .record_manifestation(tenant_id, &access_key, manifestation.as_str(), Utc::now())
        .await
    {
        Ok(doc) => doc,
        Err(e) => return errors::document_error_to_response(e),
    };

    let payload = ManifestationEventPayload {
        access_key: access_key.as_str(),
        manifestation: manifestation.as_str(),
        protocol: receipt.protocol.as_deref(),
    };
    if let Err(e) = services
        .worker
        .enqueue_event(tenant_id, EventType::ManifestationSent, &payload)
        .await
    {
        // The manifestation itself registered; the notification can be
        // retried by the tenant's own polling.
        warn!(tenant_id = %tenant_id, error = %e, "manifestation event enqueue failed");
    }

    Json(DocumentResponse::from(doc)).into_response()
}
