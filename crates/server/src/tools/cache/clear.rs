//! cache_clear tool implementation.
//!
//! Drops cached answers, either one results entry or everything.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use panorama_query::{FetchConfig, ResultsKey, TableName};

use super::super::json_result;
use crate::error::ToolError;
use crate::state::AppState;

/// Parameters for the cache_clear tool.
///
/// With `project_id`, `table` and `fetch_config` set, only that results
/// entry is dropped; with none of them, every cached answer is dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearParams {
    pub project_id: Option<String>,
    pub table: Option<TableName>,
    pub fetch_config: Option<FetchConfig>,
}

/// Output from the cache_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearOutput {
    /// Durable entries removed (unknown for a single-entry clear).
    pub deleted: Option<u64>,
}

pub async fn clear_impl(state: &AppState, params: CacheClearParams) -> Result<CallToolResult, McpError> {
    let output = match (params.project_id, params.table, params.fetch_config) {
        (None, None, None) => {
            let deleted = state.results.clear_all().await;
            tracing::info!(deleted, "cleared all cached answers");
            CacheClearOutput { deleted: Some(deleted) }
        }
        (Some(project_id), Some(table), Some(fetch_config)) => {
            let key = ResultsKey { project_id, table, fetch_config };
            state.results.clear_results(&key).await?;
            CacheClearOutput { deleted: None }
        }
        _ => {
            return Err(ToolError::InvalidInput(
                "project_id, table and fetch_config must be given together or not at all".into(),
            )
            .into());
        }
    };

    json_result(&output)
}
