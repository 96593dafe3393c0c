//! fetch_asset tool implementation.
//!
//! Fetches an auxiliary asset (image, logo, attachment) with retry and
//! reports its metadata; the body itself is not returned.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::state::AppState;

/// Parameters for the fetch_asset tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchAssetParams {
    /// Absolute http(s) URL of the asset.
    pub url: String,
}

/// Output from the fetch_asset tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchAssetOutput {
    pub url: String,
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub size: usize,
    /// SHA-256 of the body, hex encoded.
    pub sha256: String,
    pub attempts: u32,
    pub fetch_ms: u64,
}

pub async fn fetch_asset_impl(state: &AppState, params: FetchAssetParams) -> Result<CallToolResult, McpError> {
    let asset = state.fetcher.fetch(&params.url).await?;

    json_result(&FetchAssetOutput {
        url: asset.url.to_string(),
        final_url: asset.final_url.to_string(),
        status: asset.status.as_u16(),
        content_type: asset.content_type,
        size: asset.bytes.len(),
        sha256: asset.sha256,
        attempts: asset.attempts,
        fetch_ms: asset.fetch_ms,
    })
}
