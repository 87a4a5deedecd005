//! Distribution service client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use dferelay_core::Environment;
use dferelay_vault::{ClientIdentity, IdentityMaterial};

use crate::envelope::{self, DistributionResponse, RawItem};
use crate::error::PullError;
use crate::manifest::{self, Manifestation, ManifestReceipt, ManifestationService};

const PRODUCTION_ENDPOINT: &str =
    "https://www1.nfe.fazenda.gov.br/NFeDistribuicaoDFe/NFeDistribuicaoDFe.asmx";
const HOMOLOGATION_ENDPOINT: &str =
    "https://hom1.nfe.fazenda.gov.br/NFeDistribuicaoDFe/NFeDistribuicaoDFe.asmx";

const EVENT_PRODUCTION_ENDPOINT: &str =
    "https://nfe.fazenda.gov.br/NFeRecepcaoEvento4/NFeRecepcaoEvento4.asmx";
const EVENT_HOMOLOGATION_ENDPOINT: &str =
    "https://hom.nfe.fazenda.gov.br/NFeRecepcaoEvento4/NFeRecepcaoEvento4.asmx";

const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Result of one successful pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullBatch {
    pub items: Vec<RawItem>,
    /// Cursor acknowledged by the service; never less than the requested one.
    pub new_cursor: u64,
    /// Highest sequence number available server-side, for catch-up pacing.
    pub max_cursor: u64,
}

/// Retry behavior for transient failures within one pull attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_retries: 5,
        }
    }
}

impl RetryConfig {
    /// Capped exponential delay before retry number `attempt` (1-based).
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// One incremental pull against the distribution service.
///
/// Stateless across calls; the caller owns the cursor and passes the last
/// seen sequence number in.
#[async_trait]
pub trait DistributionService: Send + Sync {
    async fn pull(&self, identity: &ClientIdentity, last_nsu: u64)
        -> Result<PullBatch, PullError>;
}

/// HTTP client for the real service.
pub struct HttpDistributionService {
    production_url: String,
    homologation_url: String,
    event_production_url: String,
    event_homologation_url: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl Default for HttpDistributionService {
    fn default() -> Self {
        Self {
            production_url: PRODUCTION_ENDPOINT.to_string(),
            homologation_url: HOMOLOGATION_ENDPOINT.to_string(),
            event_production_url: EVENT_PRODUCTION_ENDPOINT.to_string(),
            event_homologation_url: EVENT_HOMOLOGATION_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

impl HttpDistributionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoints(mut self, production: impl Into<String>, homologation: impl Into<String>) -> Self {
        self.production_url = production.into();
        self.homologation_url = homologation.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_event_endpoints(
        mut self,
        production: impl Into<String>,
        homologation: impl Into<String>,
    ) -> Self {
        self.event_production_url = production.into();
        self.event_homologation_url = homologation.into();
        self
    }

    fn endpoint(&self, environment: Environment) -> &str {
        match environment {
            Environment::Production => &self.production_url,
            Environment::Homologation => &self.homologation_url,
        }
    }

    fn event_endpoint(&self, environment: Environment) -> &str {
        match environment {
            Environment::Production => &self.event_production_url,
            Environment::Homologation => &self.event_homologation_url,
        }
    }

    /// Build a client carrying the identity's TLS material, when present.
    ///
    /// The client lives for one call; the decrypted material inside the
    /// identity never outlives the pull.
    fn build_client(&self, identity: &ClientIdentity) -> Result<reqwest::Client, PullError> {
        let builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .use_rustls_tls();

        let builder = match &identity.material {
            IdentityMaterial::Tls { cert_pem, key_pem } => {
                let mut pem = Vec::with_capacity(cert_pem.len() + key_pem.len());
                pem.extend_from_slice(cert_pem);
                pem.extend_from_slice(key_pem);
                let tls_identity = reqwest::Identity::from_pem(&pem)
                    .map_err(|e| PullError::AuthRejected(format!("bad TLS material: {e}")))?;
                builder.identity(tls_identity)
            }
            IdentityMaterial::AccessCode { .. } => builder,
            IdentityMaterial::Public => {
                return Err(PullError::AuthRejected(
                    "identity does not support incremental pull".to_string(),
                ));
            }
        };

        builder
            .build()
            .map_err(|e| PullError::Transient(format!("client build failed: {e}")))
    }

    async fn send_once(
        &self,
        client: &reqwest::Client,
        identity: &ClientIdentity,
        last_nsu: u64,
    ) -> Result<DistributionResponse, PullError> {
        let body = envelope::build_request(
            &identity.tax_id,
            identity.environment,
            last_nsu,
            identity,
        );

        let response = client
            .post(self.endpoint(identity.environment))
            .header(reqwest::header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| PullError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(PullError::Transient(format!("service returned {status}")));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PullError::AuthRejected(format!("service returned {status}")));
        }
        if !status.is_success() {
            return Err(PullError::SchemaMismatch(format!("service returned {status}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| PullError::Transient(format!("body read failed: {e}")))?;
        envelope::parse_response(&text)
    }
}

#[async_trait]
impl DistributionService for HttpDistributionService {
    async fn pull(
        &self,
        identity: &ClientIdentity,
        last_nsu: u64,
    ) -> Result<PullBatch, PullError> {
        let client = self.build_client(identity)?;

        let mut attempt = 0u32;
        let response = loop {
            match self.send_once(&client, identity, last_nsu).await {
                Ok(response) => break response,
                Err(PullError::Transient(reason)) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    warn!(
                        attempt,
                        delay_secs = delay.as_secs(),
                        %reason,
                        "transient pull failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let batch = interpret(response, last_nsu)?;
        debug!(
            requested = last_nsu,
            new_cursor = batch.new_cursor,
            items = batch.items.len(),
            "pull complete"
        );
        Ok(batch)
    }
}

#[async_trait]
impl ManifestationService for HttpDistributionService {
    async fn manifest(
        &self,
        identity: &ClientIdentity,
        access_key: &dferelay_core::AccessKey,
        manifestation: Manifestation,
        justification: Option<&str>,
    ) -> Result<ManifestReceipt, PullError> {
        if manifestation.requires_justification()
            && justification.map(str::trim).unwrap_or("").is_empty()
        {
            return Err(PullError::Rejected(
                "a refusal manifestation requires a justification".to_string(),
            ));
        }

        let client = self.build_client(identity)?;
        let body = manifest::build_manifest_request(
            &identity.tax_id,
            identity.environment,
            access_key,
            manifestation,
            justification,
            chrono::Utc::now(),
        );

        let response = client
            .post(self.event_endpoint(identity.environment))
            .header(reqwest::header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| PullError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(PullError::Transient(format!("service returned {status}")));
        }
        if !status.is_success() {
            return Err(PullError::Rejected(format!("service returned {status}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| PullError::Transient(format!("body read failed: {e}")))?;
        let receipt = manifest::parse_manifest_response(&text)?;
        debug!(
            access_key = %access_key,
            event = manifestation.event_code(),
            protocol = receipt.protocol.as_deref().unwrap_or("-"),
            "manifestation registered"
        );
        Ok(receipt)
    }
}

/// Map a parsed response to a batch per the service's status code.
fn interpret(response: DistributionResponse, requested: u64) -> Result<PullBatch, PullError> {
    match response.status_code {
        // Documents located.
        138 => {}
        // Nothing new; an empty batch with an unchanged cursor is valid.
        137 => {
            return Ok(PullBatch {
                items: Vec::new(),
                new_cursor: response.last_nsu.max(requested),
                max_cursor: response.max_nsu,
            });
        }
        // Service busy or consumption throttled.
        108 | 109 | 656 => {
            return Err(PullError::Transient(format!(
                "{}: {}",
                response.status_code, response.message
            )));
        }
        // Credential and authorization rejections.
        code @ 280..=299 => {
            return Err(PullError::AuthRejected(format!("{code}: {}", response.message)));
        }
        code => {
            return Err(PullError::SchemaMismatch(format!(
                "unexpected status {code}: {}",
                response.message
            )));
        }
    }

    if response.last_nsu < requested {
        return Err(PullError::SchemaMismatch(format!(
            "service acknowledged cursor {} below requested {}",
            response.last_nsu, requested
        )));
    }

    Ok(PullBatch {
        new_cursor: response.last_nsu,
        max_cursor: response.max_nsu,
        items: response.items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status_code: u16, last_nsu: u64, items: Vec<RawItem>) -> DistributionResponse {
        DistributionResponse {
            status_code,
            message: "test".to_string(),
            last_nsu,
            max_nsu: last_nsu,
            items,
        }
    }

    #[test]
    fn documents_located_advances_cursor() {
        let items = vec![RawItem {
            nsu: 105,
            schema: "resNFe_v1.01.xsd".to_string(),
            payload: "aGVsbG8=".to_string(),
        }];
        let batch = interpret(response(138, 105, items), 100).unwrap();
        assert_eq!(batch.new_cursor, 105);
        assert_eq!(batch.items.len(), 1);
    }

    #[test]
    fn nothing_new_keeps_cursor() {
        let batch = interpret(response(137, 100, Vec::new()), 100).unwrap();
        assert!(batch.items.is_empty());
        assert_eq!(batch.new_cursor, 100);
    }

    #[test]
    fn throttle_code_is_transient() {
        let err = interpret(response(656, 100, Vec::new()), 100).unwrap_err();
        assert!(matches!(err, PullError::Transient(_)));
    }

    #[test]
    fn credential_rejection_is_terminal() {
        let err = interpret(response(280, 100, Vec::new()), 100).unwrap_err();
        assert!(matches!(err, PullError::AuthRejected(_)));
    }

    #[test]
    fn unknown_status_is_schema_mismatch() {
        let err = interpret(response(999, 100, Vec::new()), 100).unwrap_err();
        assert!(matches!(err, PullError::SchemaMismatch(_)));
    }

    #[test]
    fn regressing_cursor_ack_is_rejected() {
        let err = interpret(response(138, 90, Vec::new()), 100).unwrap_err();
        assert!(matches!(err, PullError::SchemaMismatch(_)));
    }

    #[test]
    fn retry_delays_are_capped_exponential() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay(1), Duration::from_secs(2));
        assert_eq!(retry.delay(2), Duration::from_secs(4));
        assert_eq!(retry.delay(5), Duration::from_secs(32));
    }

    #[test]
    fn public_identity_cannot_pull() {
        use dferelay_core::TaxId;
        let service = HttpDistributionService::new();
        let identity = ClientIdentity {
            tax_id: TaxId::parse("12345678000195").unwrap(),
            environment: Environment::Homologation,
            material: IdentityMaterial::Public,
        };
        let err = service.build_client(&identity).unwrap_err();
        assert!(matches!(err, PullError::AuthRejected(_)));
    }
}
