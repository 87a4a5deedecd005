//! Distribution service environment flag.

use serde::{Deserialize, Serialize};

/// Which side of the government distribution service a tenant talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Test/homologation environment.
    Homologation,
    /// Production environment.
    Production,
}

impl Environment {
    /// Numeric code carried in protocol requests (1 = production, 2 = homologation).
    pub fn protocol_code(&self) -> u8 {
        match self {
            Environment::Production => 1,
            Environment::Homologation => 2,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::Homologation
    }
}
