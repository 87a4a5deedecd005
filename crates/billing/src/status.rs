//! Billing status state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Billing/trial status of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    /// Evaluating the product; syncs run until the trial expires.
    Trial,
    /// Paying customer in good standing.
    Active,
    /// A payment was missed or declined; syncs keep running.
    Overdue,
    /// Trial expired without payment, or subscription cancelled. Never synced.
    Blocked,
}

/// Externally verified billing fact fed into the state machine.
///
/// Signature verification of the intake is the payment collaborator's
/// responsibility; by the time an event reaches this crate it is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEvent {
    /// A payment was confirmed (first payment or recovery).
    PaymentConfirmed,
    /// A payment was missed or declined.
    PaymentOverdue,
    /// The subscription was cancelled.
    SubscriptionCancelled,
    /// The trial window elapsed without a confirmed payment.
    TrialExpired,
}

/// Rejected state transition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("billing event {event:?} is not valid in status {from:?}")]
pub struct TransitionError {
    pub from: BillingStatus,
    pub event: BillingEvent,
}

impl BillingStatus {
    /// Apply a billing event, returning the next status.
    ///
    /// Transitions outside the machine are rejected rather than ignored so
    /// that out-of-order provider notifications surface loudly.
    pub fn apply(self, event: BillingEvent) -> Result<BillingStatus, TransitionError> {
        use BillingEvent::*;
        use BillingStatus::*;

        match (self, event) {
            (Trial, PaymentConfirmed) => Ok(Active),
            (Trial, TrialExpired) => Ok(Blocked),
            (Active, PaymentOverdue) => Ok(Overdue),
            (Overdue, PaymentConfirmed) => Ok(Active),
            (Active, SubscriptionCancelled) | (Overdue, SubscriptionCancelled) => Ok(Blocked),
            (from, event) => Err(TransitionError { from, event }),
        }
    }

    /// Whether this status permits sync scheduling at all.
    ///
    /// `Blocked` is always ineligible, including mid-run.
    pub fn schedulable(self) -> bool {
        !matches!(self, BillingStatus::Blocked)
    }

    /// Stable database/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            BillingStatus::Trial => "trial",
            BillingStatus::Active => "active",
            BillingStatus::Overdue => "overdue",
            BillingStatus::Blocked => "blocked",
        }
    }
}

impl core::str::FromStr for BillingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(BillingStatus::Trial),
            "active" => Ok(BillingStatus::Active),
            "overdue" => Ok(BillingStatus::Overdue),
            "blocked" => Ok(BillingStatus::Blocked),
            other => Err(format!("unknown billing status: {other}")),
        }
    }
}
