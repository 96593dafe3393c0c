//! Cache entry types shared by both cache variants.

use serde::{Deserialize, Serialize};

use super::hash::hash_params;

/// A resolved cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub uniqueness_hash: String,
    pub version_hash: String,
    pub data: T,
}

/// Serialized form of an entry as held by a durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    pub uniqueness_hash: String,
    pub version_hash: String,
    pub payload_json: String,
}

/// Which version of an entry a caller will accept.
#[derive(Debug, Clone, Copy)]
pub enum VersionRequest<'a, V> {
    /// Only an entry produced from exactly this source state.
    Exact(&'a V),
    /// Whatever is cached, regardless of version.
    AnyVersion,
}

/// Outcome of inspecting a resolved payload.
///
/// Produced by the `parse_data` callback every cache is constructed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedData {
    pub should_store: bool,
    pub uniqueness_hash: String,
    pub version_hash: String,
}

impl ParsedData {
    /// Store the payload under the hashes of these parameters.
    ///
    /// Falls back to [`ParsedData::skip`] if the parameters cannot be hashed.
    pub fn store<U: Serialize + ?Sized, V: Serialize + ?Sized>(uniqueness: &U, version: &V) -> Self {
        match (hash_params(uniqueness), hash_params(version)) {
            (Ok(uniqueness_hash), Ok(version_hash)) => Self { should_store: true, uniqueness_hash, version_hash },
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "could not hash parsed cache params; not storing");
                Self::skip()
            }
        }
    }

    /// Do not cache this payload (e.g. an error envelope).
    pub fn skip() -> Self {
        Self { should_store: false, uniqueness_hash: String::new(), version_hash: String::new() }
    }
}
