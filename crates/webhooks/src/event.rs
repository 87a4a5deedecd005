//! Outbound event types.

use serde::{Deserialize, Serialize};

/// Event type carried in the delivery envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A document was seen for the first time.
    #[serde(rename = "document.new")]
    DocumentNew,
    /// A stored document transitioned to cancelled.
    #[serde(rename = "document.cancelled")]
    DocumentCancelled,
    /// A stored document transitioned to denied.
    #[serde(rename = "document.denied")]
    DocumentDenied,
    /// A manifestation was registered on the tenant's behalf.
    #[serde(rename = "manifestation.sent")]
    ManifestationSent,
    /// A configured alert condition fired.
    #[serde(rename = "alert.triggered")]
    AlertTriggered,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::DocumentNew => "document.new",
            EventType::DocumentCancelled => "document.cancelled",
            EventType::DocumentDenied => "document.denied",
            EventType::ManifestationSent => "manifestation.sent",
            EventType::AlertTriggered => "alert.triggered",
        }
    }
}

impl core::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document.new" => Ok(EventType::DocumentNew),
            "document.cancelled" => Ok(EventType::DocumentCancelled),
            "document.denied" => Ok(EventType::DocumentDenied),
            "manifestation.sent" => Ok(EventType::ManifestationSent),
            "alert.triggered" => Ok(EventType::AlertTriggered),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
