//! Versioned, content-addressed caching.
//!
//! This module provides:
//!
//! - [`VersionedCache`]: get/set-with-future cache with request coalescing,
//!   in a client variant (in-memory LRU over SQLite) and a server variant
//!   (Redis, best effort)
//! - SHA-256 hashing of uniqueness/version parameters
//! - The SQLite durable store with automatic schema migrations
//! - The Redis durable store with jittered TTLs

pub mod connection;
pub mod entries;
pub mod entry;
pub mod hash;
pub mod memory;
pub mod migrations;
pub mod redis_store;
pub mod store;
pub mod versioned;

pub use crate::Error;

pub use connection::CacheDb;
pub use entry::{CacheEntry, ParsedData, StoredEntry, VersionRequest};
pub use memory::DEFAULT_MEMORY_CAPACITY;
pub use redis_store::RedisStore;
pub use store::DurableStore;
pub use versioned::{ParseData, VersionedCache};
