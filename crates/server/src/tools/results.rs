//! Query tools: get_results, get_period_bounds, get_possible_values.
//!
//! Each returns the result envelope: `{"success": true, "data": {...}}` for
//! an answer (possibly served from cache) or `{"success": false, "err": ...}`
//! for a request the table cannot satisfy.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use panorama_query::{
    BoundsKey, DisaggregationOption, FetchConfig, Filter, PeriodOption, ResultsKey, TableName, ValuesKey,
};

use super::{json_result, require_non_empty};
use crate::state::AppState;

/// Parameters for the get_results tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetResultsParams {
    /// Project whose database holds the table.
    pub project_id: String,

    /// Long-form results table, e.g. `ro_m1_results`.
    pub table: TableName,

    /// Aggregation request: values, groupBys, filters, periodFilter,
    /// postAggregationExpression, includeNationalTotal.
    pub fetch_config: FetchConfig,
}

/// Parameters for the get_period_bounds tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetPeriodBoundsParams {
    pub project_id: String,
    pub table: TableName,

    /// Restrict the scan to rows matching these filters.
    #[serde(default)]
    pub filters: Vec<Filter>,

    /// Period column to bound; the table's finest available one when omitted.
    #[serde(default)]
    pub period_option: Option<PeriodOption>,
}

/// Parameters for the get_possible_values tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetPossibleValuesParams {
    pub project_id: String,
    pub table: TableName,

    /// Dimension to list distinct values for.
    pub dimension: DisaggregationOption,

    /// Other active filters; a filter on `dimension` itself is ignored.
    #[serde(default)]
    pub filters: Vec<Filter>,
}

pub async fn get_results_impl(state: &AppState, params: GetResultsParams) -> Result<CallToolResult, McpError> {
    require_non_empty("project_id", &params.project_id)?;

    let key = ResultsKey { project_id: params.project_id, table: params.table, fetch_config: params.fetch_config };
    let response = state.results.get_results(key).await?;
    json_result(&response)
}

pub async fn get_period_bounds_impl(
    state: &AppState, params: GetPeriodBoundsParams,
) -> Result<CallToolResult, McpError> {
    require_non_empty("project_id", &params.project_id)?;

    let key = BoundsKey {
        project_id: params.project_id,
        table: params.table,
        filters: params.filters,
        period_option: params.period_option,
    };
    let response = state.results.get_period_bounds(key).await?;
    json_result(&response)
}

pub async fn get_possible_values_impl(
    state: &AppState, params: GetPossibleValuesParams,
) -> Result<CallToolResult, McpError> {
    require_non_empty("project_id", &params.project_id)?;

    let key = ValuesKey {
        project_id: params.project_id,
        table: params.table,
        dimension: params.dimension,
        filters: params.filters,
    };
    let response = state.results.get_possible_values(key).await?;
    json_result(&response)
}
