//! Registered tax identifier value object.
//!
//! Accepts both the 14-digit company form and the 11-digit personal form,
//! normalizing away the usual punctuation (`12.345.678/0001-95`).

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A digits-only registered tax identifier (11 or 14 digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

impl TaxId {
    /// Normalize and validate a tax identifier.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        match digits.len() {
            11 | 14 => Ok(Self(digits)),
            n => Err(DomainError::validation(format!(
                "tax id must have 11 or 14 digits, got {n}"
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the 14-digit company form.
    pub fn is_company(&self) -> bool {
        self.0.len() == 14
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaxId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TaxId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaxId> for String {
    fn from(value: TaxId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_punctuated_form() {
        let id = TaxId::parse("12.345.678/0001-95").unwrap();
        assert_eq!(id.as_str(), "12345678000195");
        assert!(id.is_company());
    }

    #[test]
    fn accepts_personal_form() {
        let id = TaxId::parse("123.456.789-09").unwrap();
        assert_eq!(id.as_str(), "12345678909");
        assert!(!id.is_company());
    }

    #[test]
    fn rejects_other_lengths() {
        assert!(TaxId::parse("12345").is_err());
        assert!(TaxId::parse("").is_err());
    }
}
