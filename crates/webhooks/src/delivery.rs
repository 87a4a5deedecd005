//! Delivery rows and the retry ladder.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use dferelay_core::{DeliveryId, EndpointId, TenantId};

use crate::event::EventType;

/// Lifecycle of one delivery. `Delivered` and `Dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    /// At least one attempt failed; a retry is scheduled.
    Failed,
    /// Retry budget exhausted; kept for inspection, never retried.
    Dead,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Dead => "dead",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Dead)
    }
}

impl core::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            "dead" => Ok(DeliveryStatus::Dead),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// One attempt's outcome, preserved for inspection after dead-lettering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub at: DateTime<Utc>,
    /// HTTP status or error description.
    pub outcome: String,
}

/// Delays between successive attempts after the first failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffLadder {
    delays: Vec<Duration>,
}

impl Default for BackoffLadder {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::minutes(1),
                Duration::minutes(5),
                Duration::minutes(30),
                Duration::hours(2),
                Duration::hours(12),
            ],
        }
    }
}

impl BackoffLadder {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Delay before the next attempt, given how many have already failed.
    /// `None` once the ladder is exhausted.
    pub fn delay_after(&self, failed_attempts: u32) -> Option<Duration> {
        self.delays.get(failed_attempts.saturating_sub(1) as usize).copied()
    }

    /// Total attempts a delivery gets: the first one plus one per rung.
    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32 + 1
    }
}

/// A durable outbound delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: DeliveryId,
    pub endpoint_id: EndpointId,
    pub tenant_id: TenantId,
    pub event: EventType,
    /// Serialized payload; the signature covers exactly these bytes.
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub status: DeliveryStatus,
    pub next_attempt_at: DateTime<Utc>,
    pub history: Vec<AttemptRecord>,
    pub created_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn new(
        endpoint_id: EndpointId,
        tenant_id: TenantId,
        event: EventType,
        payload: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            endpoint_id,
            tenant_id,
            event,
            payload,
            attempts: 0,
            status: DeliveryStatus::Pending,
            next_attempt_at: now,
            history: Vec::new(),
            created_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.next_attempt_at <= now
    }

    /// Record a successful attempt.
    pub fn mark_delivered(&mut self, now: DateTime<Utc>, outcome: String) {
        self.attempts += 1;
        self.history.push(AttemptRecord {
            attempt: self.attempts,
            at: now,
            outcome,
        });
        self.status = DeliveryStatus::Delivered;
    }

    /// Record a failed attempt and either schedule the next one or
    /// dead-letter the delivery once the ladder is exhausted.
    pub fn mark_failed(&mut self, now: DateTime<Utc>, outcome: String, ladder: &BackoffLadder) {
        self.attempts += 1;
        self.history.push(AttemptRecord {
            attempt: self.attempts,
            at: now,
            outcome,
        });
        match ladder.delay_after(self.attempts) {
            Some(delay) => {
                self.status = DeliveryStatus::Failed;
                self.next_attempt_at = now + delay;
            }
            None => self.status = DeliveryStatus::Dead,
        }
    }
}
