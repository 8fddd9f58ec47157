//! Storage key generation.
//!
//! Every upload gets its key here, before any of its bytes are staged. Two policies exist:
//!
//! - [`NamingPolicy::RandomHex`] (default): 16 bytes of OS entropy as lowercase hex, plus the
//!   original file's extension. Collisions are practically impossible, which matters because
//!   both backends commit with create-or-overwrite semantics.
//! - [`NamingPolicy::OriginalName`]: the client's file name, verbatim. Readable, and a
//!   re-upload of the same name deliberately overwrites the previous file. Concurrent uploads
//!   of one name also share the remote backend's staging copy, so a copy kept after a failed
//!   PUT may be removed by another request's successful cleanup.
//!
//! Entropy failure is never papered over with a weaker name: the whole intake fails with
//! [`NamingError::Entropy`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{InvalidKey, StoredKey};

/// Bytes of entropy per random key (~2^128 key space).
pub const KEY_ENTROPY_BYTES: usize = 16;

/// Extensions longer than this are dropped from random keys.
const MAX_EXTENSION_LEN: usize = 32;

/// How stored keys are derived from the original file name.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NamingPolicy {
    #[default]
    RandomHex,
    OriginalName,
}

#[derive(Debug, Error)]
#[error("entropy source failed: {message}")]
pub struct EntropyError {
    pub message: String,
}

#[derive(Debug, Error)]
pub enum NamingError {
    /// Random key generation failed; the upload cannot be named safely.
    #[error(transparent)]
    Entropy(#[from] EntropyError),

    /// The original name cannot be used as a key under the `original_name` policy.
    #[error("file name {name:?} cannot be used as a storage key: {reason}")]
    UnusableName { name: String, reason: InvalidKey },
}

/// Source of cryptographically strong random bytes.
pub trait EntropySource: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError>;
}

/// The operating system's CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError> {
        getrandom::fill(buf).map_err(|e| EntropyError { message: e.to_string() })
    }
}

/// Produces stored keys according to the configured policy.
///
/// Cheap to clone; built once at startup and shared by every request.
#[derive(Clone)]
pub struct KeyGenerator {
    policy: NamingPolicy,
    entropy: Arc<dyn EntropySource>,
}

impl std::fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGenerator").field("policy", &self.policy).finish_non_exhaustive()
    }
}

impl KeyGenerator {
    pub fn new(policy: NamingPolicy) -> Self {
        Self::with_entropy(policy, Arc::new(OsEntropy))
    }

    pub fn with_entropy(policy: NamingPolicy, entropy: Arc<dyn EntropySource>) -> Self {
        Self { policy, entropy }
    }

    /// Generate the key for a file originally called `original_name`.
    pub async fn generate(&self, original_name: &str) -> Result<StoredKey, NamingError> {
        match self.policy {
            NamingPolicy::RandomHex => {
                let raw = self.random_bytes().await?;
                let key = format!("{}{}", hex::encode(raw), extension_of(original_name));
                debug!(key = %key, original_name, "Generated random storage key");
                // Hex plus a filtered extension is always a valid key
                StoredKey::parse(&key).map_err(|reason| NamingError::UnusableName {
                    name: original_name.to_string(),
                    reason,
                })
            }
            NamingPolicy::OriginalName => {
                let name = final_component(original_name);
                StoredKey::parse(name).map_err(|reason| NamingError::UnusableName {
                    name: original_name.to_string(),
                    reason,
                })
            }
        }
    }

    async fn random_bytes(&self) -> Result<[u8; KEY_ENTROPY_BYTES], EntropyError> {
        let entropy = self.entropy.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; KEY_ENTROPY_BYTES];
            entropy.fill(&mut buf).map(|_| buf)
        })
        .await
        .map_err(|e| EntropyError {
            message: format!("entropy task did not complete: {e}"),
        })?
    }
}

/// Last path component of a client-supplied name, splitting on both `/` and `\`.
fn final_component(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Extension of the final path component, including the leading `.`, preserving case.
///
/// Returns an empty string when there is none, when the only dot is a leading one
/// (`.bashrc`), or when the extension is not made of `[A-Za-z0-9_-]`.
pub fn extension_of(original_name: &str) -> &str {
    let name = final_component(original_name);
    let Some(dot) = name.rfind('.') else {
        return "";
    };
    if dot == 0 {
        return "";
    }
    let ext = &name[dot..];
    let body = &ext[1..];
    if ext.len() > MAX_EXTENSION_LEN || !body.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return "";
    }
    ext
}
