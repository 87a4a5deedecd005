//! `dferelay-dfe`: client for the government document-distribution service.
//!
//! One incremental pull per call: build the distribution request envelope for
//! a tenant's tax id and cursor, send it with a vault-issued identity, parse
//! the response, and decode each compressed item into a structured document.
//! The client is stateless across calls; the cursor lives with the caller.

pub mod client;
pub mod decode;
pub mod envelope;
pub mod error;
pub mod manifest;

pub use client::{DistributionService, HttpDistributionService, PullBatch, RetryConfig};
pub use decode::{DecodeFailure, Decoded, decode_item};
pub use envelope::{DistributionResponse, RawItem, build_request, parse_response};
pub use error::PullError;
pub use manifest::{Manifestation, ManifestReceipt, ManifestationService};
