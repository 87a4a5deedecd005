//! Distribution request/response envelopes.
//!
//! The distribution service speaks SOAP 1.2 with a versioned inner payload.
//! Requests are built from a template; responses are parsed by local element
//! name so namespace prefixes never matter.

use quick_xml::Reader;
use quick_xml::events::Event;

use dferelay_core::{Environment, TaxId};
use dferelay_vault::{ClientIdentity, IdentityMaterial};

use crate::error::PullError;

/// Width of the zero-padded sequence cursor on the wire.
pub const CURSOR_DIGITS: usize = 15;

/// National authorizing body code, used when no state-specific one applies.
const NATIONAL_AUTHOR_CODE: &str = "91";

/// One encoded item from a distribution response: a base64, gzip-compressed
/// XML fragment tagged with the sequence number it arrived under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub nsu: u64,
    /// Schema identifier from the service, e.g. `resNFe_v1.01.xsd`.
    pub schema: String,
    /// Base64 payload exactly as received.
    pub payload: String,
}

/// Parsed distribution response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionResponse {
    /// Service status code.
    pub status_code: u16,
    /// Human-readable status message.
    pub message: String,
    /// Highest sequence number covered by this response.
    pub last_nsu: u64,
    /// Highest sequence number available at the service.
    pub max_nsu: u64,
    pub items: Vec<RawItem>,
}

impl DistributionResponse {
    /// "Nothing new" is a valid result, not an error.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Build the SOAP request body for one incremental pull.
///
/// The cursor is zero-padded to [`CURSOR_DIGITS`]; an access-code identity
/// additionally carries its code in the inner payload.
pub fn build_request(tax_id: &TaxId, environment: Environment, last_nsu: u64, identity: &ClientIdentity) -> String {
    let doc_tag = if tax_id.is_company() { "CNPJ" } else { "CPF" };
    let access_code = match &identity.material {
        IdentityMaterial::AccessCode { code } => {
            format!("<codAcesso>{code}</codAcesso>")
        }
        _ => String::new(),
    };

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<soap12:Envelope xmlns:soap12="http://www.w3.org/2003/05/soap-envelope">
  <soap12:Body>
    <nfeDistDFeInteresse xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/NFeDistribuicaoDFe">
      <nfeDadosMsg>
        <distDFeInt xmlns="http://www.portalfiscal.inf.br/nfe" versao="1.01">
          <tpAmb>{amb}</tpAmb>
          <cUFAutor>{uf}</cUFAutor>
          <{doc_tag}>{doc}</{doc_tag}>{access_code}
          <distNSU>
            <ultNSU>{nsu:0width$}</ultNSU>
          </distNSU>
        </distDFeInt>
      </nfeDadosMsg>
    </nfeDistDFeInteresse>
  </soap12:Body>
</soap12:Envelope>"#,
        amb = environment.protocol_code(),
        uf = NATIONAL_AUTHOR_CODE,
        doc = tax_id.as_str(),
        nsu = last_nsu,
        width = CURSOR_DIGITS,
    )
}

/// Parse a distribution response envelope.
pub fn parse_response(xml: &str) -> Result<DistributionResponse, PullError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut status_code = None;
    let mut message = String::new();
    let mut last_nsu = None;
    let mut max_nsu = None;
    let mut items = Vec::new();

    // Local name of the element whose text we are inside, plus the pending
    // docZip attributes when that element is a payload item.
    let mut current: Option<String> = None;
    let mut pending_item: Option<(u64, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let name = std::str::from_utf8(name.as_ref()).unwrap_or("");
                if name == "docZip" {
                    let mut nsu = None;
                    let mut schema = String::new();
                    for attr in e.attributes().flatten() {
                        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                        let value = attr.unescape_value().unwrap_or_default();
                        match key {
                            "NSU" => nsu = value.parse::<u64>().ok(),
                            "schema" => schema = value.to_string(),
                            _ => {}
                        }
                    }
                    let nsu = nsu.ok_or_else(|| {
                        PullError::SchemaMismatch("docZip without NSU attribute".to_string())
                    })?;
                    pending_item = Some((nsu, schema));
                }
                current = Some(name.to_string());
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current.as_deref() {
                    Some("cStat") if status_code.is_none() => {
                        status_code = text.parse::<u16>().ok();
                    }
                    Some("xMotivo") if message.is_empty() => message = text,
                    Some("ultNSU") => last_nsu = text.parse::<u64>().ok(),
                    Some("maxNSU") => max_nsu = text.parse::<u64>().ok(),
                    Some("docZip") => {
                        if let Some((nsu, schema)) = pending_item.take() {
                            items.push(RawItem {
                                nsu,
                                schema,
                                payload: text,
                            });
                        }
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
    let last_nsu = last_nsu
        .ok_or_else(|| PullError::SchemaMismatch("response missing cursor ack".to_string()))?;

    Ok(DistributionResponse {
        status_code,
        message,
        last_nsu,
        max_nsu: max_nsu.unwrap_or(last_nsu),
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(material: IdentityMaterial) -> ClientIdentity {
        ClientIdentity {
            tax_id: TaxId::parse("12345678000195").unwrap(),
            environment: Environment::Homologation,
            material,
        }
    }

    #[test]
    fn request_zero_pads_cursor() {
        let tax_id = TaxId::parse("12345678000195").unwrap();
        let req = build_request(
            &tax_id,
            Environment::Homologation,
            100,
            &identity(IdentityMaterial::Tls {
                cert_pem: vec![],
                key_pem: vec![],
            }),
        );
        assert!(req.contains("<ultNSU>000000000000100</ultNSU>"));
        assert!(req.contains("<tpAmb>2</tpAmb>"));
        assert!(req.contains("<CNPJ>12345678000195</CNPJ>"));
        assert!(!req.contains("codAcesso"));
    }

    #[test]
    fn request_carries_access_code_and_production_flag() {
        let tax_id = TaxId::parse("12345678000195").unwrap();
        let req = build_request(
            &tax_id,
            Environment::Production,
            0,
            &identity(IdentityMaterial::AccessCode {
                code: "XYZ123".to_string(),
            }),
        );
        assert!(req.contains("<tpAmb>1</tpAmb>"));
        assert!(req.contains("<codAcesso>XYZ123</codAcesso>"));
    }

    #[test]
    fn request_uses_cpf_tag_for_personal_ids() {
        let tax_id = TaxId::parse("12345678909").unwrap();
        let req = build_request(
            &tax_id,
            Environment::Homologation,
            0,
            &identity(IdentityMaterial::Public),
        );
        assert!(req.contains("<CPF>12345678909</CPF>"));
    }

    #[test]
    fn parses_response_with_items() {
        let xml = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">
  <soap:Body>
    <nfeDistDFeInteresseResponse>
      <nfeDistDFeInteresseResult>
        <retDistDFeInt versao="1.01">
          <tpAmb>2</tpAmb>
          <cStat>138</cStat>
          <xMotivo>Documento(s) localizado(s)</xMotivo>
          <ultNSU>000000000000105</ultNSU>
          <maxNSU>000000000000200</maxNSU>
          <loteDistDFeInt>
            <docZip NSU="000000000000101" schema="resNFe_v1.01.xsd">aGVsbG8=</docZip>
            <docZip NSU="000000000000105" schema="procNFe_v4.00.xsd">d29ybGQ=</docZip>
          </loteDistDFeInt>
        </retDistDFeInt>
      </nfeDistDFeInteresseResult>
    </nfeDistDFeInteresseResponse>
  </soap:Body>
</soap:Envelope>"#;

        let resp = parse_response(xml).unwrap();
        assert_eq!(resp.status_code, 138);
        assert_eq!(resp.last_nsu, 105);
        assert_eq!(resp.max_nsu, 200);
        assert_eq!(resp.items.len(), 2);
        assert_eq!(resp.items[0].nsu, 101);
        assert_eq!(resp.items[0].schema, "resNFe_v1.01.xsd");
        assert_eq!(resp.items[0].payload, "aGVsbG8=");
        assert_eq!(resp.items[1].nsu, 105);
    }

    #[test]
    fn parses_empty_response() {
        let xml = r#"<retDistDFeInt versao="1.01">
  <tpAmb>2</tpAmb>
  <cStat>137</cStat>
  <xMotivo>Nenhum documento localizado</xMotivo>
  <ultNSU>000000000000100</ultNSU>
  <maxNSU>000000000000100</maxNSU>
</retDistDFeInt>"#;

        let resp = parse_response(xml).unwrap();
        assert_eq!(resp.status_code, 137);
        assert!(resp.is_empty());
        assert_eq!(resp.last_nsu, 100);
    }

    #[test]
    fn missing_status_is_schema_mismatch() {
        let err = parse_response("<retDistDFeInt><ultNSU>1</ultNSU></retDistDFeInt>").unwrap_err();
        assert!(matches!(err, PullError::SchemaMismatch(_)));
    }
}
