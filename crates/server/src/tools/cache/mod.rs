//! Cache maintenance tools.

pub mod clear;
pub mod purge;

pub use clear::{CacheClearParams, clear_impl};
pub use purge::{CachePurgeParams, purge_impl};
