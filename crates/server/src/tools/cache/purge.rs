//! cache_purge tool implementation.
//!
//! Trims the durable client store to its most recently used entries.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::super::json_result;
use crate::error::ToolError;
use crate::state::AppState;

/// Parameters for the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {
    /// Keep only the newest N entries (LRU purge).
    pub max_entries: usize,
}

/// Output from the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    /// Number of entries deleted.
    pub deleted: u64,
    /// Entries left in the store.
    pub remaining: u64,
}

pub async fn purge_impl(state: &AppState, params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    let Some(db) = &state.client_cache else {
        return Err(ToolError::Unsupported(
            "cache_purge needs the local cache store; Redis entries expire on their own".into(),
        )
        .into());
    };

    let deleted = db.purge_lru_entries(params.max_entries).await?;
    let remaining = db.count_entries().await?;
    tracing::info!(deleted, remaining, "purged local cache store");

    json_result(&CachePurgeOutput { deleted, remaining })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::results::{GetResultsParams, get_results_impl};
    use crate::tools::testing::{self, output};
    use serde_json::json;

    #[tokio::test]
    async fn test_purge_lru() {
        let state = testing::state().await;
        for group_by in ["indicator_common_id", "admin_area_2"] {
            let params: GetResultsParams = serde_json::from_value(json!({
                "project_id": "p1",
                "table": "ro_m1_results",
                "fetch_config": {"values": ["count"], "groupBys": [group_by]},
            }))
            .unwrap();
            get_results_impl(&state, params).await.unwrap();
        }

        let out = output(&purge_impl(&state, CachePurgeParams { max_entries: 1 }).await.unwrap());
        assert_eq!(out, json!({"deleted": 1, "remaining": 1}));
    }

    #[tokio::test]
    async fn test_purge_without_local_store() {
        let mut state = testing::state().await;
        state.client_cache = None;

        let err = purge_impl(&state, CachePurgeParams { max_entries: 0 }).await.unwrap_err();
        assert_eq!(err.code.0, -32010);
    }
}
