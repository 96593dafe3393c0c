//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use crate::state::AppState;
use crate::tools::cache::{CacheClearParams, CachePurgeParams, clear_impl, purge_impl};
use crate::tools::fetch_asset::{FetchAssetParams, fetch_asset_impl};
use crate::tools::results::{
    GetPeriodBoundsParams, GetPossibleValuesParams, GetResultsParams, get_period_bounds_impl,
    get_possible_values_impl, get_results_impl,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for panorama.
#[derive(Clone)]
pub struct PanoramaServer {
    state: Arc<AppState>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl PanoramaServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Aggregate a results table. Takes a fetch config (values, groupBys, filters, periodFilter, postAggregationExpression, includeNationalTotal) and returns versioned rows in a success/err envelope."
    )]
    async fn get_results(&self, params: Parameters<GetResultsParams>) -> Result<CallToolResult, McpError> {
        get_results_impl(&self.state, params.0).await
    }

    #[tool(description = "Minimum and maximum period present in a results table under the given filters.")]
    async fn get_period_bounds(&self, params: Parameters<GetPeriodBoundsParams>) -> Result<CallToolResult, McpError> {
        get_period_bounds_impl(&self.state, params.0).await
    }

    #[tool(
        description = "Distinct values of one dimension in a results table. Reports too_many_values instead of a list when the option cap is exceeded."
    )]
    async fn get_possible_values(
        &self, params: Parameters<GetPossibleValuesParams>,
    ) -> Result<CallToolResult, McpError> {
        get_possible_values_impl(&self.state, params.0).await
    }

    #[tool(description = "Drop one cached results entry, or every cached answer when called without arguments.")]
    async fn cache_clear(&self, params: Parameters<CacheClearParams>) -> Result<CallToolResult, McpError> {
        clear_impl(&self.state, params.0).await
    }

    #[tool(description = "Trim the local cache store to its N most recently used entries.")]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        purge_impl(&self.state, params.0).await
    }

    #[tool(description = "Fetch an image or other asset by URL with retry; returns status, type, size and SHA-256.")]
    async fn fetch_asset(&self, params: Parameters<FetchAssetParams>) -> Result<CallToolResult, McpError> {
        fetch_asset_impl(&self.state, params.0).await
    }
}

impl ServerHandler for PanoramaServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "panorama".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
