//! Black-box API tests: boot the real router on an ephemeral port and talk
//! to it over HTTP, the way a dashboard client would.

use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Build the app (same router as prod), but bind to an ephemeral port.
        let services = dferelay_api::app::build_services().expect("failed to build services");
        let app = dferelay_api::app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn create_tenant(client: &reqwest::Client, base_url: &str) -> serde_json::Value {
    let resp = client
        .post(format!("{base_url}/tenants"))
        .json(&json!({ "tax_id": "12345678000195" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn tenant_lifecycle_create_fetch_and_billing_events() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let tenant = create_tenant(&client, &server.base_url).await;
    assert_eq!(tenant["billing_status"], "trial");
    assert_eq!(tenant["tax_id"], "12345678000195");
    let id = tenant["id"].as_str().unwrap().to_string();

    let resp = client
        .get(format!("{}/tenants/{id}", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // trial -> active -> overdue -> active, all through the event intake.
    for (event, expected) in [
        ("payment_confirmed", "active"),
        ("payment_overdue", "overdue"),
        ("payment_confirmed", "active"),
    ] {
        let resp = client
            .post(format!("{}/tenants/{id}/billing-events", server.base_url))
            .json(&json!({ "event": event }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["billing_status"], expected);
    }

    let resp = client
        .post(format!("{}/tenants/{id}/billing-events", server.base_url))
        .json(&json!({ "event": "subscription_renewed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_tax_id_is_rejected() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/tenants", server.base_url))
        .json(&json!({ "tax_id": "not-a-tax-id" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_tax_id");
}

#[tokio::test]
async fn access_code_shows_up_in_sync_status() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let tenant = create_tenant(&client, &server.base_url).await;
    let id = tenant["id"].as_str().unwrap().to_string();

    // No credential yet.
    let resp = client
        .get(format!("{}/sync/{id}/status", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let status: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(status["cursor"], 0);
    assert_eq!(status["certificate_configured"], false);

    let resp = client
        .post(format!("{}/credentials/{id}/access-code", server.base_url))
        .json(&json!({
            "code": "123456",
            "valid_until": Utc::now() + Duration::days(365),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["mode"], "access_code");

    let resp = client
        .get(format!("{}/sync/{id}/status", server.base_url))
        .send()
        .await
        .unwrap();
    let status: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(status["certificate_configured"], true);
}

#[tokio::test]
async fn manual_sync_without_credential_conflicts() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let tenant = create_tenant(&client, &server.base_url).await;
    let id = tenant["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/sync/{id}/now", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["outcome"], "ineligible");
}

#[tokio::test]
async fn webhook_endpoint_registration_roundtrip() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let tenant = create_tenant(&client, &server.base_url).await;
    let id = tenant["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/webhooks/{id}/endpoints", server.base_url))
        .json(&json!({ "url": "https://erp.example.com/hooks", "secret": "whsec_test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let endpoint: serde_json::Value = resp.json().await.unwrap();
    // The shared secret must never echo back.
    assert!(endpoint.get("secret").is_none());
    let endpoint_id = endpoint["id"].as_str().unwrap().to_string();

    let resp = client
        .get(format!("{}/webhooks/{id}/endpoints", server.base_url))
        .send()
        .await
        .unwrap();
    let listed: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["url"], "https://erp.example.com/hooks");

    let resp = client
        .delete(format!(
            "{}/webhooks/{id}/endpoints/{endpoint_id}",
            server.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = client
        .get(format!("{}/webhooks/{id}/endpoints", server.base_url))
        .send()
        .await
        .unwrap();
    let listed: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn alert_rule_roundtrip() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let tenant = create_tenant(&client, &server.base_url).await;
    let id = tenant["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/alerts/{id}", server.base_url))
        .json(&json!({ "name": "big invoices", "condition": "total_above", "value": "100000" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let alert: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(alert["active"], true);
    assert_eq!(alert["fire_count"], 0);
    let alert_id = alert["id"].as_str().unwrap().to_string();

    // A value-carrying condition without its value is a client error.
    let resp = client
        .post(format!("{}/alerts/{id}", server.base_url))
        .json(&json!({ "name": "broken", "condition": "total_above" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .get(format!("{}/alerts/{id}", server.base_url))
        .send()
        .await
        .unwrap();
    let listed: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["condition"], "total_above");

    let resp = client
        .delete(format!("{}/alerts/{id}/{alert_id}", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = client
        .get(format!("{}/alerts/{id}", server.base_url))
        .send()
        .await
        .unwrap();
    let listed: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn manifesting_an_unknown_document_is_not_found() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let tenant = create_tenant(&client, &server.base_url).await;
    let id = tenant["id"].as_str().unwrap().to_string();
    let key = "53260812345678000195550010000012341000012349";

    let resp = client
        .post(format!("{}/documents/{id}/{key}/manifest", server.base_url))
        .json(&json!({ "manifestation": "awareness" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // Unknown manifestation kinds never reach the wire.
    let resp = client
        .post(format!("{}/documents/{id}/{key}/manifest", server.base_url))
        .json(&json!({ "manifestation": "210210" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn endpoint_with_empty_secret_is_rejected() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let tenant = create_tenant(&client, &server.base_url).await;
    let id = tenant["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/webhooks/{id}/endpoints", server.base_url))
        .json(&json!({ "url": "https://erp.example.com/hooks", "secret": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
