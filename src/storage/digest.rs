//! Content digests (`sha256:<hex>`).

use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256};

use crate::error::RegistryError;

const ALGORITHM: &str = "sha256";

/// A validated sha256 content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Digest of the given bytes.
    pub fn of(data: &[u8]) -> Self {
        Self {
            hex: hex::encode(Sha256::digest(data)),
        }
    }

    /// Lowercase hex encoding of the hash.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Algorithm name, always `sha256`.
    pub fn algorithm(&self) -> &'static str {
        ALGORITHM
    }

    /// Check that `data` hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> Result<(), RegistryError> {
        let actual = Self::of(data);
        if actual == *self {
            Ok(())
        } else {
            Err(RegistryError::InvalidDigest(format!(
                "content hashes to {actual}, expected {self}"
            )))
        }
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| RegistryError::InvalidDigest(s.to_string()))?;

        if algorithm != ALGORITHM {
            return Err(RegistryError::InvalidDigest(format!("unsupported algorithm in {s}")));
        }
        if hex.len() != 64 || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(RegistryError::InvalidDigest(s.to_string()));
        }

        Ok(Self { hex: hex.to_string() })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", ALGORITHM, self.hex)
    }
}
