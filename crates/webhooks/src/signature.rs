//! Payload signing.
//!
//! The signature covers the exact payload bytes sent on the wire, keyed with
//! the endpoint's shared secret. A receiver recomputing it over an unmodified
//! body must obtain the identical value.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Scheme prefix on the wire.
const SCHEME: &str = "sha256=";

/// Compute the signature header value for a payload.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    format!("{SCHEME}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time verification of a received signature header value.
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix(SCHEME) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_recomputes_identical_signature() {
        let payload = br#"{"event":"document.new","access_key":"123"}"#;
        let signature = sign("shared-secret", payload);
        assert!(signature.starts_with("sha256="));
        assert!(verify("shared-secret", payload, &signature));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let signature = sign("shared-secret", b"original");
        assert!(!verify("shared-secret", b"tampered", &signature));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let signature = sign("shared-secret", b"payload");
        assert!(!verify("other-secret", b"payload", &signature));
    }

    #[test]
    fn malformed_header_fails_verification() {
        assert!(!verify("s", b"p", "md5=abcd"));
        assert!(!verify("s", b"p", "sha256=nothex"));
    }
}
