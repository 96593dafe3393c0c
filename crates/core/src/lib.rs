//! Core types and shared functionality for panorama.
//!
//! This crate provides:
//! - Versioned cache (client and server variants) with SQLite and Redis stores
//! - Unified error types and the result envelope
//! - Configuration structures
//! - Request supersession guard

pub mod cache;
pub mod config;
pub mod envelope;
pub mod error;
pub mod request_guard;

pub use cache::{CacheDb, ParsedData, VersionRequest, VersionedCache};
pub use config::AppConfig;
pub use envelope::ApiResponse;
pub use error::Error;
pub use request_guard::{RequestGuard, RequestTicket};
