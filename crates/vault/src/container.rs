//! Credential container (PKCS#12) parsing.
//!
//! Uploaded containers are password-protected PKCS#12 archives holding the
//! tenant's client certificate and private key. Parsing happens at upload
//! (to validate and extract metadata) and again inside `issue_identity`
//! (to materialize the per-call TLS identity).

use chrono::{DateTime, NaiveDateTime, Utc};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use thiserror::Error;

/// Container parse failure.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Not a PKCS#12 container (or structurally broken).
    #[error("invalid credential container: {0}")]
    InvalidContainer(String),

    /// The container is valid but the password does not open it.
    #[error("wrong container password")]
    WrongPassword,
}

/// Material extracted from a parsed container.
pub struct ContainerInfo {
    /// Subject common name of the leaf certificate.
    pub holder: String,
    /// Certificate validity end.
    pub expires_at: DateTime<Utc>,
    /// Hex-encoded SHA-256 fingerprint of the leaf certificate.
    pub fingerprint: String,
    /// PEM-encoded certificate chain (leaf first).
    pub cert_pem: Vec<u8>,
    /// PEM-encoded PKCS#8 private key.
    pub key_pem: Vec<u8>,
}

/// Parse a PKCS#12 container with its password.
pub fn parse(container: &[u8], password: &str) -> Result<ContainerInfo, ContainerError> {
    let pkcs12 =
        Pkcs12::from_der(container).map_err(|e| ContainerError::InvalidContainer(e.to_string()))?;

    // A structurally valid container that fails to open is a password
    // problem (MAC verification failure).
    let parsed = pkcs12.parse2(password).map_err(|_| ContainerError::WrongPassword)?;

    let cert = parsed
        .cert
        .ok_or_else(|| ContainerError::InvalidContainer("container holds no certificate".into()))?;
    let key = parsed
        .pkey
        .ok_or_else(|| ContainerError::InvalidContainer("container holds no private key".into()))?;

    let holder = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|e| e.data().as_utf8().ok().map(|s| s.to_string()))
        .unwrap_or_default();

    let expires_at = parse_asn1_time(&cert.not_after().to_string())?;

    let digest = cert
        .digest(MessageDigest::sha256())
        .map_err(|e| ContainerError::InvalidContainer(e.to_string()))?;
    let fingerprint = hex::encode(digest);

    let cert_pem = cert
        .to_pem()
        .map_err(|e| ContainerError::InvalidContainer(e.to_string()))?;
    let key_pem = key
        .private_key_to_pem_pkcs8()
        .map_err(|e| ContainerError::InvalidContainer(e.to_string()))?;

    Ok(ContainerInfo {
        holder,
        expires_at,
        fingerprint,
        cert_pem,
        key_pem,
    })
}

/// Parse OpenSSL's textual ASN.1 time ("Jun 10 12:00:00 2026 GMT").
fn parse_asn1_time(raw: &str) -> Result<DateTime<Utc>, ContainerError> {
    let parsed = NaiveDateTime::parse_from_str(raw, "%b %e %H:%M:%S %Y GMT")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%b %d %H:%M:%S %Y GMT"))
        .map_err(|e| {
            ContainerError::InvalidContainer(format!("unparseable validity time {raw:?}: {e}"))
        })?;
    Ok(parsed.and_utc())
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn parses_valid_container() {
        let der = test_support::make_container("ACME LTDA:12345678000195", "hunter2", 90);
        let info = parse(&der, "hunter2").unwrap();

        assert_eq!(info.holder, "ACME LTDA:12345678000195");
        assert_eq!(info.fingerprint.len(), 64);
        assert!(info.expires_at > Utc::now() + Duration::days(80));
        assert!(!info.cert_pem.is_empty());
        assert!(!info.key_pem.is_empty());
    }

    #[test]
    fn wrong_password_is_distinguished() {
        let der = test_support::make_container("ACME", "correct", 30);
        assert!(matches!(
            parse(&der, "incorrect"),
            Err(ContainerError::WrongPassword)
        ));
    }

    #[test]
    fn garbage_is_invalid_container() {
        assert!(matches!(
            parse(b"not a pkcs12 container", "pw"),
            Err(ContainerError::InvalidContainer(_))
        ));
    }
}
