//! Content-addressed hashing for cache keys.
//!
//! Uniqueness and version parameters are arbitrary serializable values.
//! They are hashed from their JSON form, so two parameter sets that
//! serialize identically share a key.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Error;

/// Hash any serializable parameter set into a 64-char hex digest.
pub fn hash_params<P: Serialize + ?Sized>(params: &P) -> Result<String, Error> {
    let json = serde_json::to_vec(params)?;
    Ok(hash_bytes(&json))
}

/// SHA-256 of raw bytes, hex encoded.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
