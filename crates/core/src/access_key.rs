//! Access key value object.
//!
//! The 44-digit access key is the natural unique identifier of one fiscal
//! document. It encodes, among other things, the issuer tax id and the
//! document model, which we use for classification when a payload is a bare
//! summary.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Length of an access key in digits.
pub const ACCESS_KEY_LEN: usize = 44;

/// Model code for an electronic invoice (NF-e).
pub const MODEL_INVOICE: &str = "55";
/// Model code for an electronic transport note (CT-e).
pub const MODEL_TRANSPORT: &str = "57";

/// A validated 44-digit access key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    /// Parse and validate an access key (44 decimal digits).
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.len() != ACCESS_KEY_LEN {
            return Err(DomainError::validation(format!(
                "access key must be {} digits, got {}",
                ACCESS_KEY_LEN,
                trimmed.len()
            )));
        }
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation("access key must be numeric"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tax id of the issuer, embedded in digits 6..20.
    pub fn issuer_digits(&self) -> &str {
        &self.0[6..20]
    }

    /// Two-digit document model code (digits 20..22), e.g. "55" for an
    /// invoice and "57" for a transport note.
    pub fn model_code(&self) -> &str {
        &self.0[20..22]
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccessKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(value: AccessKey) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: &str = "53260812345678000195550010000012341000012349";

    #[test]
    fn parses_valid_key() {
        let key = AccessKey::parse(KEY).unwrap();
        assert_eq!(key.as_str(), KEY);
        assert_eq!(key.model_code(), MODEL_INVOICE);
        assert_eq!(key.issuer_digits(), "12345678000195");
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(AccessKey::parse("1234").is_err());
        assert!(AccessKey::parse(&"1".repeat(45)).is_err());
    }

    #[test]
    fn rejects_non_numeric() {
        let bad = format!("{}x", &KEY[..43]);
        assert!(AccessKey::parse(&bad).is_err());
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let key = AccessKey::parse(&format!(" {KEY} ")).unwrap();
        assert_eq!(key.as_str(), KEY);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any 44-digit string parses, and the embedded issuer and
        /// model slices come straight out of the digits that went in.
        #[test]
        fn any_44_digit_string_parses_and_slices(raw in "[0-9]{44}") {
            let key = AccessKey::parse(&raw).unwrap();
            prop_assert_eq!(key.as_str(), raw.as_str());
            prop_assert_eq!(key.issuer_digits(), &raw[6..20]);
            prop_assert_eq!(key.model_code(), &raw[20..22]);
        }

        /// Property: any other length is rejected.
        #[test]
        fn any_other_length_is_rejected(raw in "[0-9]{0,43}|[0-9]{45,60}") {
            prop_assert!(AccessKey::parse(&raw).is_err());
        }
    }
}
