//! Client-side plumbing for panorama.
//!
//! Images and other auxiliary assets referenced by results are fetched
//! through [`AssetFetcher`], which applies a per-attempt timeout and
//! bounded retry with exponential backoff.

pub mod fetch;

pub use fetch::{AssetError, AssetFetcher, FetchConfig, FetchedAsset, UrlError, parse_asset_url};
