//! Webhook endpoint registration.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dferelay_core::{EndpointId, TenantId};
use dferelay_webhooks::WebhookEndpoint;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/:tenant_id/endpoints", post(register_endpoint).get(list_endpoints))
        .route("/:tenant_id/endpoints/:endpoint_id", delete(remove_endpoint))
        .route(
            "/:tenant_id/endpoints/:endpoint_id/deliveries",
            get(list_deliveries),
        )
}

#[derive(Debug, Deserialize)]
struct RegisterEndpointRequest {
    url: String,
    secret: String,
}

#[derive(Debug, Serialize)]
struct EndpointResponse {
    id: EndpointId,
    url: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<WebhookEndpoint> for EndpointResponse {
    fn from(endpoint: WebhookEndpoint) -> Self {
        Self {
            id: endpoint.id,
            url: endpoint.url,
            active: endpoint.active,
            created_at: endpoint.created_at,
        }
    }
}

async fn register_endpoint(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<TenantId>,
    Json(body): Json<RegisterEndpointRequest>,
) -> axum::response::Response {
    if !body.url.starts_with("https://") && !body.url.starts_with("http://") {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_url", "url must be http(s)");
    }
    if body.secret.is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_secret", "secret must not be empty");
    }

    let endpoint = WebhookEndpoint::new(tenant_id, body.url, body.secret);
    match services.endpoints.insert(endpoint.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(EndpointResponse::from(endpoint))).into_response(),
        Err(e) => errors::webhook_error_to_response(e),
    }
}

async fn list_endpoints(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<TenantId>,
) -> axum::response::Response {
    match services.endpoints.list_active(tenant_id).await {
        Ok(endpoints) => Json(
            endpoints
                .into_iter()
                .map(EndpointResponse::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::webhook_error_to_response(e),
    }
}

async fn remove_endpoint(
    Extension(services): Extension<Arc<AppServices>>,
    Path((_tenant_id, endpoint_id)): Path<(TenantId, EndpointId)>,
) -> axum::response::Response {
    match services.endpoints.remove(endpoint_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::webhook_error_to_response(e),
    }
}

#[derive(Debug, Serialize)]
struct DeliveryResponse {
    id: dferelay_core::DeliveryId,
    event: String,
    status: String,
    attempts: u32,
    next_attempt_at: DateTime<Utc>,
}

async fn list_deliveries(
    Extension(services): Extension<Arc<AppServices>>,
    Path((_tenant_id, endpoint_id)): Path<(TenantId, EndpointId)>,
) -> axum::response::Response {
    match services.deliveries.list_for_endpoint(endpoint_id).await {
        Ok(deliveries) => Json(
            deliveries
                .into_iter()
                .map(|d| DeliveryResponse {
                    id: d.id,
                    event: d.event.as_str().to_string(),
                    status: d.status.as_str().to_string(),
                    attempts: d.attempts,
                    next_attempt_at: d.next_attempt_at,
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::webhook_error_to_response(e),
    }
}
