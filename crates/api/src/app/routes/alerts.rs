//! Alert rule management.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dferelay_core::{AlertId, TenantId};
use dferelay_documents::{Alert, AlertCondition};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/:tenant_id", post(create_alert).get(list_alerts))
        .route("/:tenant_id/:alert_id", delete(remove_alert))
}

#[derive(Debug, Deserialize)]
struct CreateAlertRequest {
    name: String,
    condition: String,
    value: Option<String>,
}

#[derive(Debug, Serialize)]
struct AlertResponse {
    id: AlertId,
    name: String,
    condition: String,
    value: Option<String>,
    active: bool,
    fire_count: u64,
    last_fired_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<Alert> for AlertResponse {
    fn from(alert: Alert) -> Self {
        let (condition, value) = alert.condition.as_parts();
        Self {
            id: alert.id,
            name: alert.name,
            condition: condition.to_string(),
            value,
            active: alert.active,
            fire_count: alert.fire_count,
            last_fired_at: alert.last_fired_at,
            created_at: alert.created_at,
        }
    }
}

async fn create_alert(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<TenantId>,
    Json(body): Json<CreateAlertRequest>,
) -> axum::response::Response {
    if body.name.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_name", "name must not be empty");
    }
    let condition = match AlertCondition::from_parts(&body.condition, body.value.as_deref()) {
        Ok(condition) => condition,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_condition", e),
    };

    let alert = Alert::new(tenant_id, body.name, condition);
    match services.alerts.insert(alert.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(AlertResponse::from(alert))).into_response(),
        Err(e) => errors::document_error_to_response(e),
    }
}

async fn list_alerts(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<TenantId>,
) -> axum::response::Response {
    match services.alerts.list(tenant_id).await {
        Ok(alerts) => Json(
            alerts
                .into_iter()
                .map(AlertResponse::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::document_error_to_response(e),
    }
}

async fn remove_alert(
    Extension(services): Extension<Arc<AppServices>>,
    Path((tenant_id, alert_id)): Path<(TenantId, AlertId)>,
) -> axum::response::Response {
    match services.alerts.remove(tenant_id, alert_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::document_error_to_response(e),
    }
}
