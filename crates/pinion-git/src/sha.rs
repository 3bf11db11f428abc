use std::fmt::Display;
use std::str::{self, FromStr};

use thiserror::Error;

/// A full, 40-character commit hash.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GitSha([u8; 40]);

impl GitSha {
    /// Return the string representation of the hash.
    pub fn as_str(&self) -> &str {
        // Only ever constructed from validated ASCII hex.
        str::from_utf8(&self.0).unwrap_or_default()
    }

    /// Return a truncated representation, i.e., the first 16 characters of the SHA.
    pub fn as_short_str(&self) -> &str {
        &self.as_str()[..16]
    }

    /// Whether `rev` already is a full commit hash.
    pub fn is_full_sha(rev: &str) -> bool {
        rev.len() == 40 && rev.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShaParseError {
    #[error("Commit hash must be exactly 40 hex characters, found {0}")]
    WrongLength(usize),
    #[error("Commit hash contains a non-hex character: `{0}`")]
    InvalidCharacter(String),
}

impl FromStr for GitSha {
    type Err = ShaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            return Err(ShaParseError::WrongLength(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ShaParseError::InvalidCharacter(s.to_string()));
        }
        let mut out = [0; 40];
        out.copy_from_slice(s.to_ascii_lowercase().as_bytes());
        Ok(Self(out))
    }
}

impl Display for GitSha {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl serde::Serialize for GitSha {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.as_str().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for GitSha {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::from_str(&value).map_err(serde::de::Error::custom)
    }
}
