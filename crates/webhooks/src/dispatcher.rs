//! Delivery worker loop.
//!
//! Pops due deliveries, signs each payload with its endpoint's secret, and
//! POSTs it. Deliveries run as independent tasks so one slow or failing
//! endpoint never holds up the rest of the batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use dferelay_core::{Clock, DeliveryId, SystemClock, TenantId};

use crate::delivery::{BackoffLadder, WebhookDelivery};
use crate::endpoint::EndpointStore;
use crate::event::EventType;
use crate::signature;
use crate::store::{DeliveryStore, WebhookStoreError};

/// Envelope headers.
pub const HEADER_EVENT: &str = "X-DFeRelay-Event";
pub const HEADER_SIGNATURE: &str = "X-DFeRelay-Signature";
pub const HEADER_DELIVERY: &str = "X-DFeRelay-Delivery";

/// Outbound HTTP seam, mockable in tests.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// POST the signed payload; returns the HTTP status code.
    async fn post(
        &self,
        url: &str,
        event: EventType,
        signature: &str,
        delivery_id: DeliveryId,
        body: &[u8],
    ) -> Result<u16, String>;
}

/// Real HTTP transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        event: EventType,
        signature: &str,
        delivery_id: DeliveryId,
        body: &[u8],
    ) -> Result<u16, String> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(HEADER_EVENT, event.as_str())
            .header(HEADER_SIGNATURE, signature)
            .header(HEADER_DELIVERY, delivery_id.to_string())
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(response.status().as_u16())
    }
}

/// The delivery worker: fan-out on enqueue, retry ladder on failure.
pub struct DeliveryWorker {
    deliveries: Arc<dyn DeliveryStore>,
    endpoints: Arc<dyn EndpointStore>,
    transport: Arc<dyn DeliveryTransport>,
    ladder: BackoffLadder,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl DeliveryWorker {
    pub fn new(
        deliveries: Arc<dyn DeliveryStore>,
        endpoints: Arc<dyn EndpointStore>,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Self {
        Self {
            deliveries,
            endpoints,
            transport,
            ladder: BackoffLadder::default(),
            clock: Arc::new(SystemClock),
            batch_size: 100,
        }
    }

    pub fn with_ladder(mut self, ladder: BackoffLadder) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Fan an event out to every active endpoint of the tenant.
    ///
    /// The payload is serialized once; the same bytes are signed and sent to
    /// each endpoint. Returns the created delivery ids.
    pub async fn enqueue_event<T: Serialize>(
        &self,
        tenant_id: TenantId,
        event: EventType,
        payload: &T,
    ) -> Result<Vec<DeliveryId>, WebhookStoreError> {
        let body = serde_json::to_vec(payload)?;
        let now = self.clock.now();

        let mut ids = Vec::new();
        for endpoint in self.endpoints.list_active(tenant_id).await? {
            let delivery =
                WebhookDelivery::new(endpoint.id, tenant_id, event, body.clone(), now);
            ids.push(delivery.id);
            self.deliveries.enqueue(delivery).await?;
        }
        debug!(tenant_id = %tenant_id, event = %event, fan_out = ids.len(), "event enqueued");
        Ok(ids)
    }

    /// Process one batch of due deliveries; returns how many were attempted.
    pub async fn run_once(&self) -> Result<usize, WebhookStoreError> {
        let now = self.clock.now();
        let due = self.deliveries.due(now, self.batch_size).await?;
        let attempted = due.len();

        let mut tasks = JoinSet::new();
        for delivery in due {
            let deliveries = Arc::clone(&self.deliveries);
            let endpoints = Arc::clone(&self.endpoints);
            let transport = Arc::clone(&self.transport);
            let ladder = self.ladder.clone();
            tasks.spawn(async move {
                attempt(deliveries, endpoints, transport, ladder, now, delivery).await;
            });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "delivery task panicked");
            }
        }
        Ok(attempted)
    }

    /// Run the worker until the process stops.
    pub async fn run(&self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!(error = %e, "delivery batch failed");
            }
        }
    }
}

/// One attempt at one delivery. Failures here concern this delivery only.
async fn attempt(
    deliveries: Arc<dyn DeliveryStore>,
    endpoints: Arc<dyn EndpointStore>,
    transport: Arc<dyn DeliveryTransport>,
    ladder: BackoffLadder,
    now: DateTime<Utc>,
    mut delivery: WebhookDelivery,
) {
    let endpoint = match endpoints.get(delivery.endpoint_id).await {
        Ok(endpoint) => endpoint,
        Err(WebhookStoreError::NotFound) => {
            // Endpoint was removed after enqueue; nothing left to deliver to.
            delivery.mark_failed(now, "endpoint removed".to_string(), &BackoffLadder::new(vec![]));
            persist(&deliveries, &delivery).await;
            return;
        }
        Err(e) => {
            error!(delivery_id = %delivery.id, error = %e, "endpoint lookup failed");
            return;
        }
    };

    let signature = signature::sign(&endpoint.secret, &delivery.payload);
    let outcome = transport
        .post(
            &endpoint.url,
            delivery.event,
            &signature,
            delivery.id,
            &delivery.payload,
        )
        .await;

    match outcome {
        Ok(status) if (200..300).contains(&status) => {
            delivery.mark_delivered(now, status.to_string());
            info!(
                delivery_id = %delivery.id,
                endpoint_id = %endpoint.id,
                attempts = delivery.attempts,
                "delivery succeeded"
            );
        }
        Ok(status) => {
            delivery.mark_failed(now, status.to_string(), &ladder);
            warn!(
                delivery_id = %delivery.id,
                endpoint_id = %endpoint.id,
                status,
                delivery_status = delivery.status.as_str(),
                "delivery attempt rejected"
            );
        }
        Err(reason) => {
            delivery.mark_failed(now, reason.clone(), &ladder);
            warn!(
                delivery_id = %delivery.id,
                endpoint_id = %endpoint.id,
                %reason,
                delivery_status = delivery.status.as_str(),
                "delivery attempt errored"
            );
        }
    }
    persist(&deliveries, &delivery).await;
}

async fn persist(deliveries: &Arc<dyn DeliveryStore>, delivery: &WebhookDelivery) {
    if let Err(e) = deliveries.update(delivery).await {
        error!(delivery_id = %delivery.id, error = %e, "failed to persist delivery state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryStatus;
    use crate::endpoint::{InMemoryEndpointStore, WebhookEndpoint};
    use crate::store::InMemoryDeliveryStore;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new(now: DateTime<Utc>) -> Self {
            Self { now: Mutex::new(now) }
        }

        fn advance(&self, by: ChronoDuration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    #[derive(Debug)]
    struct SentRequest {
        url: String,
        event: EventType,
        signature: String,
        body: Vec<u8>,
    }

    /// Transport returning a fixed status per URL, recording every request.
    struct MockTransport {
        responses: Mutex<std::collections::HashMap<String, u16>>,
        sent: Mutex<Vec<SentRequest>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                responses: Mutex::new(std::collections::HashMap::new()),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn respond(&self, url: &str, status: u16) {
            self.responses.lock().unwrap().insert(url.to_string(), status);
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DeliveryTransport for MockTransport {
        async fn post(
            &self,
            url: &str,
            event: EventType,
            signature: &str,
            _delivery_id: DeliveryId,
            body: &[u8],
        ) -> Result<u16, String> {
            self.sent.lock().unwrap().push(SentRequest {
                url: url.to_string(),
                event,
                signature: signature.to_string(),
                body: body.to_vec(),
            });
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .copied()
                .ok_or_else(|| "connection refused".to_string())
        }
    }

    struct Harness {
        worker: DeliveryWorker,
        deliveries: Arc<InMemoryDeliveryStore>,
        endpoints: Arc<InMemoryEndpointStore>,
        transport: Arc<MockTransport>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let deliveries = Arc::new(InMemoryDeliveryStore::new());
        let endpoints = Arc::new(InMemoryEndpointStore::new());
        let transport = Arc::new(MockTransport::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let worker = DeliveryWorker::new(
            Arc::clone(&deliveries) as Arc<dyn DeliveryStore>,
            Arc::clone(&endpoints) as Arc<dyn EndpointStore>,
            Arc::clone(&transport) as Arc<dyn DeliveryTransport>,
        )
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);
        Harness {
            worker,
            deliveries,
            endpoints,
            transport,
            clock,
        }
    }

    #[derive(Serialize)]
    struct Payload {
        access_key: &'static str,
    }

    #[tokio::test]
    async fn delivers_and_signs_with_endpoint_secret() {
        let h = harness();
        let tenant = TenantId::new();
        let endpoint = WebhookEndpoint::new(tenant, "https://hook.example/a", "secret-a");
        h.endpoints.insert(endpoint).await.unwrap();
        h.transport.respond("https://hook.example/a", 200);

        let ids = h
            .worker
            .enqueue_event(tenant, EventType::DocumentNew, &Payload { access_key: "123" })
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        assert_eq!(h.worker.run_once().await.unwrap(), 1);

        let sent = h.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, EventType::DocumentNew);
        // A receiver with the shared secret must recompute the same value.
        assert!(signature::verify("secret-a", &sent[0].body, &sent[0].signature));
        drop(sent);

        let delivery = h.deliveries.get(ids[0]).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn fan_out_one_delivery_per_active_endpoint() {
        let h = harness();
        let tenant = TenantId::new();
        h.endpoints
            .insert(WebhookEndpoint::new(tenant, "https://hook.example/a", "sa"))
            .await
            .unwrap();
        h.endpoints
            .insert(WebhookEndpoint::new(tenant, "https://hook.example/b", "sb"))
            .await
            .unwrap();

        let ids = h
            .worker
            .enqueue_event(tenant, EventType::DocumentNew, &Payload { access_key: "1" })
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn failing_endpoint_walks_ladder_to_dead_with_no_further_attempts() {
        let h = harness();
        let tenant = TenantId::new();
        let endpoint = WebhookEndpoint::new(tenant, "https://hook.example/down", "s");
        h.endpoints.insert(endpoint).await.unwrap();
        h.transport.respond("https://hook.example/down", 503);

        let ids = h
            .worker
            .enqueue_event(tenant, EventType::DocumentNew, &Payload { access_key: "1" })
            .await
            .unwrap();

        let ladder = BackoffLadder::default();
        for _ in 0..ladder.max_attempts() {
            h.worker.run_once().await.unwrap();
            // Jump past whatever backoff was scheduled.
            h.clock.advance(ChronoDuration::days(1));
        }

        let delivery = h.deliveries.get(ids[0]).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Dead);
        assert_eq!(delivery.attempts, ladder.max_attempts());
        assert_eq!(delivery.history.len(), ladder.max_attempts() as usize);

        // Dead deliveries are never picked up again.
        h.worker.run_once().await.unwrap();
        assert_eq!(h.transport.sent_count(), ladder.max_attempts() as usize);
    }

    #[tokio::test]
    async fn backoff_delays_attempts_until_due() {
        let h = harness();
        let tenant = TenantId::new();
        let endpoint = WebhookEndpoint::new(tenant, "https://hook.example/flaky", "s");
        h.endpoints.insert(endpoint).await.unwrap();
        h.transport.respond("https://hook.example/flaky", 500);

        h.worker
            .enqueue_event(tenant, EventType::DocumentNew, &Payload { access_key: "1" })
            .await
            .unwrap();
        h.worker.run_once().await.unwrap();
        assert_eq!(h.transport.sent_count(), 1);

        // Not yet due: the first rung is one minute out.
        h.clock.advance(ChronoDuration::seconds(30));
        h.worker.run_once().await.unwrap();
        assert_eq!(h.transport.sent_count(), 1);

        h.clock.advance(ChronoDuration::seconds(31));
        h.worker.run_once().await.unwrap();
        assert_eq!(h.transport.sent_count(), 2);
    }

    #[tokio::test]
    async fn failing_endpoint_does_not_block_others() {
        let h = harness();
        let tenant = TenantId::new();
        h.endpoints
            .insert(WebhookEndpoint::new(tenant, "https://hook.example/down", "sa"))
            .await
            .unwrap();
        h.endpoints
            .insert(WebhookEndpoint::new(tenant, "https://hook.example/up", "sb"))
            .await
            .unwrap();
        h.transport.respond("https://hook.example/up", 200);
        // /down gets a connection error.

        let ids = h
            .worker
            .enqueue_event(tenant, EventType::DocumentCancelled, &Payload { access_key: "1" })
            .await
            .unwrap();
        h.worker.run_once().await.unwrap();

        let mut statuses = Vec::new();
        for id in ids {
            statuses.push(h.deliveries.get(id).await.unwrap().status);
        }
        assert!(statuses.contains(&DeliveryStatus::Delivered));
        assert!(statuses.contains(&DeliveryStatus::Failed));
    }

    #[tokio::test]
    async fn removed_endpoint_dead_letters_the_delivery() {
        let h = harness();
        let tenant = TenantId::new();
        let endpoint = WebhookEndpoint::new(tenant, "https://hook.example/a", "s");
        let endpoint_id = endpoint.id;
        h.endpoints.insert(endpoint).await.unwrap();

        let ids = h
            .worker
            .enqueue_event(tenant, EventType::DocumentNew, &Payload { access_key: "1" })
            .await
            .unwrap();
        h.endpoints.remove(endpoint_id).await.unwrap();

        h.worker.run_once().await.unwrap();
        let delivery = h.deliveries.get(ids[0]).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Dead);
        assert_eq!(h.transport.sent_count(), 0);
    }
}
