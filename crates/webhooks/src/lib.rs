//! `dferelay-webhooks`: durable, signed, retried event delivery.
//!
//! Documents landing in the store produce events; each event fans out to the
//! tenant's registered endpoints as a durable delivery row. A worker loop
//! pops due deliveries, signs the exact payload bytes with the endpoint's
//! secret, and walks a backoff ladder on failure until the delivery is
//! delivered or dead.

pub mod delivery;
pub mod dispatcher;
pub mod endpoint;
pub mod event;
pub mod signature;
pub mod store;

pub use delivery::{AttemptRecord, BackoffLadder, DeliveryStatus, WebhookDelivery};
pub use dispatcher::{DeliveryTransport, DeliveryWorker, HttpTransport};
pub use endpoint::{EndpointStore, InMemoryEndpointStore, PgEndpointStore, WebhookEndpoint};
pub use event::EventType;
pub use signature::{sign, verify};
pub use store::{DeliveryStore, InMemoryDeliveryStore, PgDeliveryStore, WebhookStoreError};
