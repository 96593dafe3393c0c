//! Distinct values of one dimension, capped for display.

use panorama_core::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::columns::{DisaggregationOption, TableName};
use crate::context::QueryContext;
use crate::cte;
use crate::fetch_config::Filter;
use crate::source::{InstanceConfigSource, QueryExecutor, Row};
use crate::sql::{ComposedQuery, ParamBuilder, filter_condition, where_clause};

/// Outcome of a possible-values lookup. `too_many_values` carries no list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PossibleValues {
    Ok { values: Vec<String> },
    TooManyValues,
    NoValuesAvailable,
}

impl PossibleValues {
    pub fn classify(values: Vec<String>, max_options: usize) -> Self {
        match values.len() {
            0 => PossibleValues::NoValuesAvailable,
            n if n > max_options => PossibleValues::TooManyValues,
            _ => PossibleValues::Ok { values },
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            PossibleValues::Ok { .. } => "ok",
            PossibleValues::TooManyValues => "too_many_values",
            PossibleValues::NoValuesAvailable => "no_values_available",
        }
    }
}

/// `SELECT DISTINCT` over `dimension`, fetching one row past the cap.
pub fn compose_possible_values(
    ctx: &QueryContext, dimension: DisaggregationOption, max_options: usize,
) -> Result<ComposedQuery, Error> {
    let column = ctx.column_sql(dimension);
    let mut params = ParamBuilder::new();
    let mut conditions = Vec::new();
    for filter in ctx.non_facility_filters.iter().chain(&ctx.facility_filters) {
        conditions.push(filter_condition(&ctx.column_sql(filter.col), filter, &mut params)?);
    }
    conditions.push(format!("{column} IS NOT NULL"));

    let sql = format!(
        "{}SELECT DISTINCT {column}::text AS value{}{} ORDER BY 1 LIMIT {}",
        cte::with_clause(ctx),
        cte::from_clause(ctx),
        where_clause(&conditions),
        max_options.saturating_add(1)
    );
    Ok(params.finish(sql))
}

/// Filters that still apply when enumerating `dimension`.
pub fn filters_without(dimension: DisaggregationOption, filters: &[Filter]) -> Vec<Filter> {
    filters.iter().filter(|f| f.col != dimension && !f.values.is_empty()).cloned().collect()
}

pub async fn resolve_possible_values(
    instance: &dyn InstanceConfigSource, executor: &dyn QueryExecutor, table: &TableName,
    dimension: DisaggregationOption, filters: &[Filter], max_options: usize,
) -> Result<PossibleValues, Error> {
    let table_columns = executor.table_columns(table).await?;
    let facility = instance.facility_columns().await?;

    let filters = filters_without(dimension, filters);
    let mut referenced = vec![dimension];
    referenced.extend(filters.iter().map(|f| f.col));
    let ctx = QueryContext::classify(table, &table_columns, &facility, &referenced, &filters, &[])?;

    let query = compose_possible_values(&ctx, dimension, max_options)?;
    let rows = executor.fetch_rows(&query).await?;
    let values: Vec<String> = rows.iter().filter_map(value_of).collect();

    let result = PossibleValues::classify(values, max_options);
    tracing::debug!(table = %table, %dimension, status = result.status(), "resolved possible values");
    Ok(result)
}

fn value_of(row: &Row) -> Option<String> {
    row.get("value").and_then(|v| v.as_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::Identifier;
    use crate::source::FacilityColumnsConfig;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;

    const MAX_OPTIONS: usize = 100;

    struct FakeDb {
        columns: HashSet<String>,
        facility: FacilityColumnsConfig,
        distinct: usize,
    }

    #[async_trait]
    impl QueryExecutor for FakeDb {
        async fn fetch_rows(&self, query: &ComposedQuery) -> Result<Vec<Row>, Error> {
            assert!(query.sql.ends_with(&format!("LIMIT {}", MAX_OPTIONS + 1)));
            let n = self.distinct.min(MAX_OPTIONS + 1);
            Ok((0..n).map(|i| json!({"value": format!("v{i}")}).as_object().cloned().unwrap()).collect())
        }

        async fn table_columns(&self, _: &TableName) -> Result<HashSet<String>, Error> {
            Ok(self.columns.clone())
        }

        async fn module_last_run(&self, _: &TableName) -> Result<Option<String>, Error> {
            Ok(None)
        }
    }

    #[async_trait]
    impl InstanceConfigSource for FakeDb {
        async fn facility_columns(&self) -> Result<FacilityColumnsConfig, Error> {
            Ok(self.facility)
        }
    }

    fn db(distinct: usize) -> FakeDb {
        FakeDb {
            columns: ["indicator_common_id", "admin_area_2", "facility_id", "period_id"]
                .into_iter()
                .map(String::from)
                .collect(),
            facility: FacilityColumnsConfig { include_types: true, ..Default::default() },
            distinct,
        }
    }

    fn table() -> TableName {
        Identifier::new("ro_m1_results").unwrap()
    }

    #[test]
    fn test_classification() {
        assert_eq!(PossibleValues::classify(vec![], MAX_OPTIONS), PossibleValues::NoValuesAvailable);
        assert_eq!(
            PossibleValues::classify(vec!["a".into()], MAX_OPTIONS),
            PossibleValues::Ok { values: vec!["a".into()] }
        );
        let many: Vec<String> = (0..=MAX_OPTIONS).map(|i| i.to_string()).collect();
        assert_eq!(PossibleValues::classify(many, MAX_OPTIONS), PossibleValues::TooManyValues);
    }

    #[test]
    fn test_too_many_values_serializes_without_array() {
        let json = serde_json::to_value(PossibleValues::TooManyValues).unwrap();
        assert_eq!(json, json!({"status": "too_many_values"}));

        let json = serde_json::to_value(PossibleValues::Ok { values: vec!["North".into()] }).unwrap();
        assert_eq!(json, json!({"status": "ok", "values": ["North"]}));
    }

    #[test]
    fn test_dimension_is_removed_from_filters() {
        let filters = vec![
            Filter { col: DisaggregationOption::AdminArea2, values: vec!["North".into()] },
            Filter { col: DisaggregationOption::IndicatorCommonId, values: vec!["anc1".into()] },
            Filter { col: DisaggregationOption::Year, values: vec![] },
        ];
        let remaining = filters_without(DisaggregationOption::AdminArea2, &filters);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].col, DisaggregationOption::IndicatorCommonId);
    }

    #[test]
    fn test_query_shape_for_derived_dimension() {
        let columns: HashSet<String> = ["indicator_common_id", "period_id"].into_iter().map(String::from).collect();
        let ctx = QueryContext::classify(
            &table(),
            &columns,
            &FacilityColumnsConfig::default(),
            &[DisaggregationOption::QuarterId],
            &[],
            &[],
        )
        .unwrap();
        let query = compose_possible_values(&ctx, DisaggregationOption::QuarterId, MAX_OPTIONS).unwrap();

        assert!(query.sql.starts_with("WITH period_expanded AS"));
        assert!(query.sql.contains(
            "SELECT DISTINCT quarter_id::text AS value FROM period_expanded WHERE quarter_id IS NOT NULL ORDER BY 1 LIMIT 101"
        ));
    }

    #[tokio::test]
    async fn test_too_many_values() {
        let db = db(500);
        let result =
            resolve_possible_values(&db, &db, &table(), DisaggregationOption::AdminArea2, &[], MAX_OPTIONS)
                .await
                .unwrap();
        assert_eq!(result, PossibleValues::TooManyValues);
    }

    #[tokio::test]
    async fn test_ok_and_empty() {
        let db_some = db(3);
        let result =
            resolve_possible_values(&db_some, &db_some, &table(), DisaggregationOption::FacilityType, &[], MAX_OPTIONS)
                .await
                .unwrap();
        assert_eq!(result, PossibleValues::Ok { values: vec!["v0".into(), "v1".into(), "v2".into()] });

        let db_none = db(0);
        let result =
            resolve_possible_values(&db_none, &db_none, &table(), DisaggregationOption::Year, &[], MAX_OPTIONS)
                .await
                .unwrap();
        assert_eq!(result, PossibleValues::NoValuesAvailable);
    }

    #[tokio::test]
    async fn test_unavailable_column_fails_before_query() {
        let db = db(3);
        let err =
            resolve_possible_values(&db, &db, &table(), DisaggregationOption::FacilityCustom4, &[], MAX_OPTIONS)
                .await
                .unwrap_err();
        assert!(matches!(err, Error::InvalidColumn { column, .. } if column == "facility_custom_4"));

        let err = resolve_possible_values(&db, &db, &table(), DisaggregationOption::RatioType, &[], MAX_OPTIONS)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidColumn { .. }));
    }
}
