//! Valid period window of a results table under a set of filters.

use std::collections::HashSet;

use panorama_core::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::columns::{DisaggregationOption, TableName};
use crate::context::QueryContext;
use crate::cte;
use crate::fetch_config::{Filter, PeriodFilter, PeriodOption};
use crate::source::{InstanceConfigSource, QueryExecutor, Row};
use crate::sql::{ComposedQuery, ParamBuilder, filter_condition, where_clause};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PeriodBounds {
    pub period_option: PeriodOption,
    pub min: i64,
    pub max: i64,
}

/// Finest period granularity the table stores physically.
pub fn first_period_option(table_columns: &HashSet<String>) -> Option<PeriodOption> {
    [PeriodOption::PeriodId, PeriodOption::Year]
        .into_iter()
        .find(|option| table_columns.contains(option.column().as_str()))
}

/// `MIN`/`MAX` of `option` under the context's filters.
///
/// The period CTE is only emitted when a filter references a derived
/// column; a derived bound column is computed inline from `period_id`.
pub fn compose_bounds(
    ctx: &QueryContext, table_columns: &HashSet<String>, option: PeriodOption,
) -> Result<ComposedQuery, Error> {
    let col = option.column();
    let target = if table_columns.contains(col.as_str()) {
        ctx.column_sql(col)
    } else {
        match col.period_column() {
            Some(period_col) if ctx.has_period_id => period_col.derive_from_period_id().to_string(),
            _ => return Err(Error::invalid_column(ctx.table.as_str(), col.as_str())),
        }
    };

    let mut params = ParamBuilder::new();
    let mut conditions = Vec::new();
    for filter in ctx.non_facility_filters.iter().chain(&ctx.facility_filters) {
        conditions.push(filter_condition(&ctx.column_sql(filter.col), filter, &mut params)?);
    }

    let sql = format!(
        "{}SELECT MIN({target})::int8 AS min, MAX({target})::int8 AS max{}{}",
        cte::with_clause(ctx),
        cte::from_clause(ctx),
        where_clause(&conditions)
    );
    Ok(params.finish(sql))
}

/// Resolve the period bounds of `table`.
///
/// Returns `None` when no option is given and the table stores no period
/// column, or when no rows match.
pub async fn resolve_bounds(
    instance: &dyn InstanceConfigSource, executor: &dyn QueryExecutor, table: &TableName, filters: &[Filter],
    option: Option<PeriodOption>,
) -> Result<Option<PeriodBounds>, Error> {
    let table_columns = executor.table_columns(table).await?;
    let Some(option) = option.or_else(|| first_period_option(&table_columns)) else {
        return Ok(None);
    };

    let facility = instance.facility_columns().await?;
    let active: Vec<Filter> = filters.iter().filter(|f| !f.values.is_empty()).cloned().collect();
    let referenced: Vec<DisaggregationOption> = active.iter().map(|f| f.col).collect();
    let ctx = QueryContext::classify(table, &table_columns, &facility, &referenced, &active, &[])?;

    let query = compose_bounds(&ctx, &table_columns, option)?;
    let rows = executor.fetch_rows(&query).await?;
    let bounds = rows.first().and_then(|row| bounds_from_row(option, row));
    tracing::debug!(table = %table, ?option, found = bounds.is_some(), "resolved period bounds");
    Ok(bounds)
}

fn bounds_from_row(period_option: PeriodOption, row: &Row) -> Option<PeriodBounds> {
    let min = row.get("min")?.as_i64()?;
    let max = row.get("max")?.as_i64()?;
    Some(PeriodBounds { period_option, min, max })
}

/// Turn `last_n_months` into an inclusive `period_id` window ending at the
/// table's latest period.
pub fn last_n_months_window(bounds: &PeriodBounds, n_months: u32) -> Result<PeriodFilter, Error> {
    if bounds.period_option != PeriodOption::PeriodId {
        return Err(Error::InvalidInput("last_n_months needs a table with period_id".into()));
    }
    if n_months == 0 {
        return Err(Error::InvalidInput("last_n_months needs at least one month".into()));
    }

    let month_index = |period_id: i64| (period_id / 100) * 12 + (period_id % 100 - 1);
    let start = month_index(bounds.max) - (i64::from(n_months) - 1);
    let min = (start / 12) * 100 + start % 12 + 1;

    Ok(PeriodFilter::Custom { period_option: PeriodOption::PeriodId, min: min.max(bounds.min), max: bounds.max })
}
