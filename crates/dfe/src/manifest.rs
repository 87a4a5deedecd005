//! Recipient manifestation events.
//!
//! A tenant can register its position on a document issued against it
//! (confirm, acknowledge, disclaim, or refuse the operation). The event goes
//! to the event-reception service, not the distribution one, but shares the
//! SOAP shape and the identity handling.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;

use dferelay_core::{AccessKey, Environment, TaxId};
use dferelay_vault::ClientIdentity;

use crate::error::PullError;

/// National authorizing body code for recipient events.
const NATIONAL_AUTHOR_CODE: &str = "91";

/// Maximum length of a refusal justification on the wire.
const MAX_JUSTIFICATION_LEN: usize = 255;

/// Recipient manifestation kinds, by event code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Manifestation {
    /// 210200: the operation happened as described.
    OperationConfirmed,
    /// 210210: the recipient is aware of the document.
    Awareness,
    /// 210220: the recipient does not recognize the operation.
    OperationUnknown,
    /// 210240: the operation did not happen; requires a justification.
    OperationNotPerformed,
}

impl Manifestation {
    pub fn event_code(self) -> &'static str {
        match self {
            Manifestation::OperationConfirmed => "210200",
            Manifestation::Awareness => "210210",
            Manifestation::OperationUnknown => "210220",
            Manifestation::OperationNotPerformed => "210240",
        }
    }

    /// Official event description carried in `descEvento`.
    pub fn description(self) -> &'static str {
        match self {
            Manifestation::OperationConfirmed => "Confirmacao da Operacao",
            Manifestation::Awareness => "Ciencia da Operacao",
            Manifestation::OperationUnknown => "Desconhecimento da Operacao",
            Manifestation::OperationNotPerformed => "Operacao nao Realizada",
        }
    }

    pub fn requires_justification(self) -> bool {
        matches!(self, Manifestation::OperationNotPerformed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Manifestation::OperationConfirmed => "operation_confirmed",
            Manifestation::Awareness => "awareness",
            Manifestation::OperationUnknown => "operation_unknown",
            Manifestation::OperationNotPerformed => "operation_not_performed",
        }
    }
}

impl core::str::FromStr for Manifestation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operation_confirmed" => Ok(Manifestation::OperationConfirmed),
            "awareness" => Ok(Manifestation::Awareness),
            "operation_unknown" => Ok(Manifestation::OperationUnknown),
            "operation_not_performed" => Ok(Manifestation::OperationNotPerformed),
            other => Err(format!("unknown manifestation: {other}")),
        }
    }
}

impl core::fmt::Display for Manifestation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration receipt from an accepted manifestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestReceipt {
    pub protocol: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
}

/// One manifestation submission on a tenant's behalf.
#[async_trait::async_trait]
pub trait ManifestationService: Send + Sync {
    async fn manifest(
        &self,
        identity: &ClientIdentity,
        access_key: &AccessKey,
        manifestation: Manifestation,
        justification: Option<&str>,
    ) -> Result<ManifestReceipt, PullError>;
}

/// Build the SOAP request body for one manifestation event.
pub fn build_manifest_request(
    tax_id: &TaxId,
    environment: Environment,
    access_key: &AccessKey,
    manifestation: Manifestation,
    justification: Option<&str>,
    event_time: DateTime<Utc>,
) -> String {
    let doc_tag = if tax_id.is_company() { "CNPJ" } else { "CPF" };
    let justification_xml = match justification {
        Some(text) if manifestation.requires_justification() => {
            let text: String = text.chars().take(MAX_JUSTIFICATION_LEN).collect();
            format!("<xJust>{text}</xJust>")
        }
        _ => String::new(),
    };

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<soap12:Envelope xmlns:soap12="http://www.w3.org/2003/05/soap-envelope">
  <soap12:Body>
    <nfeRecepcaoEvento xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/NFeRecepcaoEvento4">
      <nfeDadosMsg>
        <envEvento xmlns="http://www.portalfiscal.inf.br/nfe" versao="1.00">
          <idLote>1</idLote>
          <evento versao="1.00">
            <infEvento Id="ID{code}{key}01">
              <cOrgao>{uf}</cOrgao>
              <tpAmb>{amb}</tpAmb>
              <{doc_tag}>{doc}</{doc_tag}>
              <chNFe>{key}</chNFe>
              <dhEvento>{when}</dhEvento>
              <tpEvento>{code}</tpEvento>
              <nSeqEvento>1</nSeqEvento>
              <verEvento>1.00</verEvento>
              <detEvento versao="1.00"><descEvento>{desc}</descEvento>{just}</detEvento>
            </infEvento>
          </evento>
        </envEvento>
      </nfeDadosMsg>
    </nfeRecepcaoEvento>
  </soap12:Body>
</soap12:Envelope>"#,
        code = manifestation.event_code(),
        key = access_key.as_str(),
        uf = NATIONAL_AUTHOR_CODE,
        amb = environment.protocol_code(),
        doc_tag = doc_tag,
        doc = tax_id.as_str(),
        when = event_time.format("%Y-%m-%dT%H:%M:%S%:z"),
        desc = manifestation.description(),
        just = justification_xml,
    )
}

/// Parse an event-reception response into a receipt.
///
/// 135 (registered) and 136 (registered, no effect on the document) are the
/// accepted codes; everything else is a refusal.
pub fn parse_manifest_response(xml: &str) -> Result<ManifestReceipt, PullError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut status_code: Option<u16> = None;
    let mut message = String::new();
    let mut protocol = None;
    let mut registered_at = None;
    let mut current: Option<String> = None;
    let mut in_event = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let name = std::str::from_utf8(name.as_ref()).unwrap_or("").to_string();
                if name == "infEvento" {
                    in_event = true;
                }
                current = Some(name);
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current.as_deref() {
                    // The batch return carries its own cStat before the
                    // per-event one; the per-event one decides.
                    Some("cStat") if in_event || status_code.is_none() => {
                        status_code = text.parse::<u16>().ok();
                    }
                    Some("xMotivo") => message = text,
                    Some("nProt") => protocol = Some(text),
                    Some("dhRegEvento") => {
                        registered_at = DateTime::parse_from_rfc3339(&text)
                            .map(|dt| dt.with_timezone(&Utc))
                            .ok();
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PullError::SchemaMismatch(format!("XML parse error: {e}")));
            }
            _ => {}
        }
    }

    let status_code = status_code
        .ok_or_else(|| PullError::SchemaMismatch("response missing status code".to_string()))?;

    match status_code {
        135 | 136 => Ok(ManifestReceipt {
            protocol,
            registered_at,
        }),
        code @ 280..=299 => Err(PullError::AuthRejected(format!("{code}: {message}"))),
        code => Err(PullError::Rejected(format!("{code}: {message}"))),
    }
}
