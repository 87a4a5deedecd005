//! Item decoding.
//!
//! Each distribution item is a base64, gzip-compressed XML fragment. This
//! module turns one item into a structured [`IncomingDocument`] or a
//! quarantine reason; a failure here concerns one item only and must never
//! abort the rest of the batch.

use std::io::Read;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;

use dferelay_core::{AccessKey, MODEL_TRANSPORT, TaxId};
use dferelay_documents::{Direction, DocumentKind, DocumentStatus, IncomingDocument};

use crate::envelope::RawItem;

/// Inflate cap, guards against decompression bombs.
const MAX_INFLATED_BYTES: u64 = 5 * 1024 * 1024;

/// Event code for a registered cancellation.
const EVENT_CANCELLATION: &str = "110111";

/// One item failed decoding; carries enough to quarantine it.
#[derive(Debug, Error)]
#[error("item at nsu {nsu} undecodable: {reason}")]
pub struct DecodeFailure {
    pub nsu: u64,
    pub reason: String,
}

/// Outcome of decoding one item.
#[derive(Debug)]
pub enum Decoded {
    Document(IncomingDocument),
    /// Structurally valid but carries nothing we materialize (e.g. an
    /// acknowledgment event).
    Skipped { nsu: u64, reason: String },
}

/// Decode one distribution item for a tenant.
pub fn decode_item(tenant_tax_id: &TaxId, item: &RawItem) -> Result<Decoded, DecodeFailure> {
    let fail = |reason: String| DecodeFailure {
        nsu: item.nsu,
        reason,
    };

    let compressed = STANDARD
        .decode(item.payload.trim())
        .map_err(|e| fail(format!("base64 decode failed: {e}")))?;

    let mut xml = String::new();
    GzDecoder::new(&compressed[..])
        .take(MAX_INFLATED_BYTES)
        .read_to_string(&mut xml)
        .map_err(|e| fail(format!("gzip inflate failed: {e}")))?;
    if xml.len() as u64 >= MAX_INFLATED_BYTES {
        return Err(fail("inflated payload exceeds size limit".to_string()));
    }

    let fields = extract_fields(&xml).map_err(fail)?;
    classify(tenant_tax_id, item, fields).map_err(fail)
}

/// Flat view of the fields we care about, regardless of schema variant.
#[derive(Debug, Default)]
struct Fields {
    access_key: Option<String>,
    issuer: Option<String>,
    issuer_name: Option<String>,
    recipient: Option<String>,
    total_raw: Option<String>,
    issued_at_raw: Option<String>,
    /// `cSitNFe` from a summary item.
    situation: Option<String>,
    /// `cStat` from an authorization protocol.
    protocol_status: Option<String>,
    protocol_number: Option<String>,
    status_reason: Option<String>,
    /// `tpEvento` when the item is a fiscal event.
    event_type: Option<String>,
}

/// Pull known fields out of the fragment by local element name, tracking
/// which section (`emit`, `dest`, `protNFe`, ...) we are inside so shared
/// names like `CNPJ` land in the right slot.
fn extract_fields(xml: &str) -> Result<Fields, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = Fields::default();
    let mut section: Option<String> = None;
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let name = std::str::from_utf8(name.as_ref()).unwrap_or("").to_string();
                match name.as_str() {
                    "emit" | "dest" | "protNFe" | "protCTe" | "infEvento" | "retEvento" => {
                        section = Some(name.clone());
                    }
                    "infNFe" | "infCte" => {
                        // Full documents embed the access key in the Id
                        // attribute, prefixed with the document type.
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"Id" {
                                let value = attr.unescape_value().unwrap_or_default();
                                let digits: String =
                                    value.chars().filter(|c| c.is_ascii_digit()).collect();
                                if fields.access_key.is_none() && !digits.is_empty() {
                                    fields.access_key = Some(digits);
                                }
                            }
                        }
                    }
                    _ => {}
                }
                current = Some(name);
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                match (section.as_deref(), current.as_deref()) {
                    (_, Some("chNFe" | "chCTe")) => {
                        if fields.access_key.is_none() {
                            fields.access_key = Some(text);
                        }
                    }
                    (Some("emit"), Some("CNPJ" | "CPF")) => fields.issuer = Some(text),
                    (Some("emit"), Some("xNome")) => fields.issuer_name = Some(text),
                    (Some("dest"), Some("CNPJ" | "CPF")) => fields.recipient = Some(text),
                    (Some("protNFe" | "protCTe"), Some("cStat")) => {
                        fields.protocol_status = Some(text)
                    }
                    (Some("protNFe" | "protCTe"), Some("xMotivo")) => {
                        fields.status_reason = Some(text)
                    }
                    (_, Some("nProt")) => fields.protocol_number = Some(text),
                    (_, Some("cSitNFe" | "cSitCTe")) => fields.situation = Some(text),
                    (_, Some("tpEvento")) => fields.event_type = Some(text),
                    (_, Some("vNF" | "vTPrest")) => fields.total_raw = Some(text),
                    (_, Some("dhEmi" | "dEmi")) => fields.issued_at_raw = Some(text),
                    // Summary items put the issuer at the top level.
                    (None, Some("CNPJ" | "CPF")) => {
                        if fields.issuer.is_none() {
                            fields.issuer = Some(text);
                        }
                    }
                    (None, Some("xNome")) => {
                        if fields.issuer_name.is_none() {
                            fields.issuer_name = Some(text);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                let name = std::str::from_utf8(name.as_ref()).unwrap_or("");
                if section.as_deref() == Some(name) {
                    section = None;
                }
                current = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {e}")),
            _ => {}
        }
    }

    Ok(fields)
}

fn classify(
    tenant_tax_id: &TaxId,
    item: &RawItem,
    fields: Fields,
) -> Result<Decoded, String> {
    let access_key = fields
        .access_key
        .ok_or_else(|| "item carries no access key".to_string())?;
    let access_key = AccessKey::parse(&access_key).map_err(|e| e.to_string())?;

    // Fiscal events reference an existing document; only cancellations
    // materialize as a status change here.
    if let Some(event_type) = &fields.event_type {
        if event_type != EVENT_CANCELLATION {
            return Ok(Decoded::Skipped {
                nsu: item.nsu,
                reason: format!("fiscal event type {event_type} not materialized"),
            });
        }
    }

    let status = if fields.event_type.as_deref() == Some(EVENT_CANCELLATION) {
        DocumentStatus::Cancelled
    } else if let Some(situation) = &fields.situation {
        match situation.as_str() {
            "1" => DocumentStatus::Authorized,
            "2" => DocumentStatus::Denied,
            "3" => DocumentStatus::Cancelled,
            other => return Err(format!("unknown situation code {other}")),
        }
    } else if let Some(code) = &fields.protocol_status {
        match code.as_str() {
            "100" | "136" | "150" => DocumentStatus::Authorized,
            "101" | "135" | "151" | "155" => DocumentStatus::Cancelled,
            "110" | "301" | "302" | "303" => DocumentStatus::Denied,
            other => return Err(format!("unknown protocol status {other}")),
        }
    } else {
        return Err("item carries no status information".to_string());
    };

    let kind = if access_key.model_code() == MODEL_TRANSPORT {
        DocumentKind::TransportNote
    } else {
        DocumentKind::Invoice
    };

    // Issuer falls back to the digits embedded in the access key when the
    // summary omits an explicit element.
    let issuer = match &fields.issuer {
        Some(raw) => TaxId::parse(raw).map_err(|e| e.to_string())?,
        None => TaxId::parse(access_key.issuer_digits()).map_err(|e| e.to_string())?,
    };
    let recipient = fields
        .recipient
        .as_deref()
        .map(TaxId::parse)
        .transpose()
        .map_err(|e| e.to_string())?;

    let direction = if &issuer == tenant_tax_id {
        Direction::Outbound
    } else {
        Direction::Inbound
    };

    let total_cents = match &fields.total_raw {
        Some(raw) => parse_cents(raw)?,
        None => 0,
    };

    let issued_at = fields
        .issued_at_raw
        .as_deref()
        .map(parse_timestamp)
        .transpose()?;

    Ok(Decoded::Document(IncomingDocument {
        access_key,
        kind,
        direction,
        issuer,
        issuer_name: fields.issuer_name,
        recipient,
        total_cents,
        issued_at,
        status,
        protocol: fields.protocol_number,
        status_reason: fields.status_reason,
        nsu: item.nsu,
        raw_ref: None,
    }))
}

/// Parse a decimal monetary string into cents without going through floats.
fn parse_cents(raw: &str) -> Result<i64, String> {
    let (whole, frac) = match raw.split_once('.') {
        Some((w, f)) => (w, f),
        None => (raw, ""),
    };
    let whole: i64 = whole
        .parse()
        .map_err(|_| format!("bad monetary value: {raw}"))?;
    let frac_cents: i64 = match frac.len() {
        0 => 0,
        1 => {
            10 * frac
                .parse::<i64>()
                .map_err(|_| format!("bad monetary value: {raw}"))?
        }
        2 => frac
            .parse()
            .map_err(|_| format!("bad monetary value: {raw}"))?,
        _ => return Err(format!("bad monetary value: {raw}")),
    };
    Ok(whole * 100 + frac_cents)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {raw}: {e}"))
}
