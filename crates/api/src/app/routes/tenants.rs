//! Tenant provisioning and the payment-provider billing event intake.
//!
//! Billing events arrive here already verified by the payment collaborator;
//! this surface only feeds them through the eligibility state machine.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use dferelay_billing::{BillingEvent, Tenant};
use dferelay_core::{Environment, TaxId, TenantId};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_tenant))
        .route("/:id", get(get_tenant))
        .route("/:id/billing-events", post(apply_billing_event))
}

const DEFAULT_TRIAL_DAYS: i64 = 14;

#[derive(Debug, Deserialize)]
struct CreateTenantRequest {
    tax_id: String,
    #[serde(default)]
    trial_days: Option<i64>,
    #[serde(default)]
    environment: Option<Environment>,
}

#[derive(Debug, Serialize)]
struct TenantResponse {
    id: TenantId,
    tax_id: String,
    billing_status: String,
    trial_expires_at: Option<chrono::DateTime<Utc>>,
    environment: Environment,
}

impl From<Tenant> for TenantResponse {
    fn from(tenant: Tenant) -> Self {
        Self {
            id: tenant.id,
            tax_id: tenant.tax_id.to_string(),
            billing_status: tenant.billing_status.as_str().to_string(),
            trial_expires_at: tenant.trial_expires_at,
            environment: tenant.environment,
        }
    }
}

async fn create_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<CreateTenantRequest>,
) -> axum::response::Response {
    let tax_id = match TaxId::parse(&body.tax_id) {
        Ok(tax_id) => tax_id,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_tax_id", e.to_string()),
    };

    let trial_days = body.trial_days.unwrap_or(DEFAULT_TRIAL_DAYS);
    let mut tenant = Tenant::new(tax_id, Utc::now() + Duration::days(trial_days));
    if let Some(environment) = body.environment {
        tenant.environment = environment;
    }

    if let Err(e) = services.tenants.insert(tenant.clone()).await {
        return errors::tenant_error_to_response(e);
    }
    (StatusCode::CREATED, Json(TenantResponse::from(tenant))).into_response()
}

async fn get_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<TenantId>,
) -> axum::response::Response {
    match services.tenants.get(id).await {
        Ok(tenant) => Json(TenantResponse::from(tenant)).into_response(),
        Err(e) => errors::tenant_error_to_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct BillingEventRequest {
    event: String,
}

async fn apply_billing_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<TenantId>,
    Json(body): Json<BillingEventRequest>,
) -> axum::response::Response {
    let event = match body.event.as_str() {
        "payment_confirmed" => BillingEvent::PaymentConfirmed,
        "payment_overdue" => BillingEvent::PaymentOverdue,
        "subscription_cancelled" => BillingEvent::SubscriptionCancelled,
        other => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_event",
                format!("unknown billing event: {other}"),
            );
        }
    };

    match services.tenants.apply_event(id, event).await {
        Ok(tenant) => Json(TenantResponse::from(tenant)).into_response(),
        Err(e) => errors::tenant_error_to_response(e),
    }
}
