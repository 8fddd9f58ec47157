//! Core value types shared by the intake pipeline and the storage backends.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest key we accept; matches the usual filesystem name limit.
pub const MAX_KEY_LEN: usize = 255;

/// Content type assumed when the client does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// The sole addressable identity of a stored file.
///
/// A key is a single path segment: it never contains separators or control characters and
/// never starts with `.` (dot-names are reserved for staging). Anything that constructs a
/// `StoredKey` goes through [`StoredKey::parse`], so a key is always safe to join onto a
/// storage directory or push onto a URL path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoredKey(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidKey {
    #[error("key is empty")]
    Empty,
    #[error("key exceeds {MAX_KEY_LEN} bytes")]
    TooLong,
    #[error("key starts with '.'")]
    DotPrefixed,
    #[error("key contains a path separator or control character")]
    ForbiddenCharacter,
}

impl StoredKey {
    pub fn parse(raw: &str) -> Result<Self, InvalidKey> {
        if raw.is_empty() {
            return Err(InvalidKey::Empty);
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(InvalidKey::TooLong);
        }
        if raw.starts_with('.') {
            return Err(InvalidKey::DotPrefixed);
        }
        if raw.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
            return Err(InvalidKey::ForbiddenCharacter);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StoredKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StoredKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StoredKey> for String {
    fn from(key: StoredKey) -> Self {
        key.0
    }
}

impl AsRef<str> for StoredKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One file received from a client, after naming and staging.
///
/// The content itself lives in the staging file; this is the metadata that travels with it.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client-supplied file name. Untrusted.
    pub original_name: String,
    /// Assigned once, before the first byte is staged.
    pub stored_key: StoredKey,
    /// Client-declared content type.
    pub mime_type: String,
    pub size_bytes: u64,
}
