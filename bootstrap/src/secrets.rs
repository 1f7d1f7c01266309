//! Source-control credential.

use crate::Error;
use std::fmt;

/// A secret value that never appears in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Reads the credential printed by a secret-store lookup, rejecting an empty value.
    pub fn from_stdout(secret: &str, stdout: &str) -> Result<Self, Error> {
        let value = stdout.trim();
        if value.is_empty() || value == "None" {
            return Err(Error::EmptySecret(secret.to_string()));
        }
        Ok(Self::new(value))
    }

    /// Returns the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}
