use axum::Router;

pub mod alerts;
pub mod credentials;
pub mod documents;
pub mod sync;
pub mod system;
pub mod tenants;
pub mod webhooks;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/tenants", tenants::router())
        .nest("/credentials", credentials::router())
        .nest("/documents", documents::router())
        .nest("/alerts", alerts::router())
        .nest("/sync", sync::router())
        .nest("/webhooks", webhooks::router())
}
