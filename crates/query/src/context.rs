//! Classifies a request against the target table and instance settings.
//!
//! The resulting [`QueryContext`] decides whether the facility join and the
//! period decomposition CTE are emitted, and rejects references to columns
//! the table does not expose before any SQL is built.

use std::collections::HashSet;

use panorama_core::Error;

use crate::columns::{DisaggregationOption, FacilityColumn, Identifier, PeriodColumn, TableName};
use crate::fetch_config::{FetchConfig, Filter};
use crate::source::{FacilityColumnsConfig, InstanceConfigSource, QueryExecutor};

const PERIOD_ID: &str = "period_id";
const FACILITY_ID: &str = "facility_id";

/// Read-only classification of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub table: TableName,
    pub has_period_id: bool,
    pub enabled_facility_columns: Vec<FacilityColumn>,
    pub requested_facility_columns: Vec<FacilityColumn>,
    pub needs_facility_join: bool,
    pub needed_period_columns: Vec<PeriodColumn>,
    pub needs_period_cte: bool,
    pub non_facility_filters: Vec<Filter>,
    pub facility_filters: Vec<Filter>,
}

impl QueryContext {
    /// Load the table's columns and the instance facility settings, then classify.
    pub async fn resolve(
        instance: &dyn InstanceConfigSource, executor: &dyn QueryExecutor, table: &TableName, config: &FetchConfig,
    ) -> Result<Self, Error> {
        let table_columns = executor.table_columns(table).await?;
        let facility = instance.facility_columns().await?;
        Self::build(table, &table_columns, &facility, config)
    }

    pub fn build(
        table: &TableName, table_columns: &HashSet<String>, facility: &FacilityColumnsConfig, config: &FetchConfig,
    ) -> Result<Self, Error> {
        let filters: Vec<Filter> = config.active_filters().cloned().collect();
        let mut props: Vec<&Identifier> = config.values.iter().map(|v| &v.prop).collect();
        if let Some(post) = &config.post_aggregation_expression {
            props.extend(post.ingredient_values.iter().map(|i| &i.prop));
        }
        Self::classify(table, table_columns, facility, &config.referenced_columns(), &filters, &props)
    }

    /// Classify an arbitrary set of referenced columns and filters.
    pub fn classify(
        table: &TableName, table_columns: &HashSet<String>, facility: &FacilityColumnsConfig,
        referenced: &[DisaggregationOption], filters: &[Filter], value_props: &[&Identifier],
    ) -> Result<Self, Error> {
        if table_columns.is_empty() {
            return Err(Error::InvalidInput(format!("results table {table} does not exist")));
        }

        let has_period_id = table_columns.contains(PERIOD_ID);
        let mut requested_facility_columns = Vec::new();
        let mut needed_period_columns = Vec::new();

        for &col in referenced {
            if let Some(facility_col) = col.facility_column() {
                if !facility.is_enabled(facility_col) {
                    return Err(Error::invalid_column(table.as_str(), col.as_str()));
                }
                if !requested_facility_columns.contains(&facility_col) {
                    requested_facility_columns.push(facility_col);
                }
                continue;
            }

            if table_columns.contains(col.as_str()) || col.is_guaranteed() {
                continue;
            }

            match col.period_column() {
                Some(period_col) if has_period_id => {
                    if !needed_period_columns.contains(&period_col) {
                        needed_period_columns.push(period_col);
                    }
                }
                _ => return Err(Error::invalid_column(table.as_str(), col.as_str())),
            }
        }

        for prop in value_props {
            if !table_columns.contains(prop.as_str()) {
                return Err(Error::invalid_column(table.as_str(), prop.as_str()));
            }
        }

        let needs_facility_join = !requested_facility_columns.is_empty();
        if needs_facility_join && !table_columns.contains(FACILITY_ID) {
            return Err(Error::invalid_column(table.as_str(), FACILITY_ID));
        }

        needed_period_columns.sort();
        let (facility_filters, non_facility_filters) =
            filters.iter().cloned().partition(|f: &Filter| f.col.facility_column().is_some());

        Ok(Self {
            table: table.clone(),
            has_period_id,
            enabled_facility_columns: facility.enabled(),
            requested_facility_columns,
            needs_facility_join,
            needs_period_cte: has_period_id && !needed_period_columns.is_empty(),
            needed_period_columns,
            non_facility_filters,
            facility_filters,
        })
    }

    /// Column reference for `col`, qualified only when the facility join is present.
    pub fn column_sql(&self, col: DisaggregationOption) -> String {
        match (self.needs_facility_join, col.facility_column().is_some()) {
            (false, _) => col.as_str().to_string(),
            (true, true) => format!("f.{}", col.as_str()),
            (true, false) => format!("b.{}", col.as_str()),
        }
    }

    /// Reference to a value column of the results table.
    pub fn value_sql(&self, prop: &Identifier) -> String {
        if self.needs_facility_join { format!("b.{}", prop.quoted()) } else { prop.quoted() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_config::{PeriodFilter, PeriodOption, ValueSpec};

    fn columns(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn table() -> TableName {
        Identifier::new("ro_m1_results").unwrap()
    }

    fn types_enabled() -> FacilityColumnsConfig {
        FacilityColumnsConfig { include_types: true, ..Default::default() }
    }

    #[test]
    fn test_derived_year_needs_cte_when_period_id_present() {
        let config = FetchConfig {
            values: vec![ValueSpec::sum("count").unwrap()],
            group_bys: vec![DisaggregationOption::IndicatorCommonId],
            period_filter: Some(PeriodFilter::Custom { period_option: PeriodOption::Year, min: 2023, max: 2024 }),
            ..Default::default()
        };
        let cols = columns(&["indicator_common_id", "period_id", "count"]);
        let ctx = QueryContext::build(&table(), &cols, &FacilityColumnsConfig::default(), &config).unwrap();

        assert!(ctx.has_period_id);
        assert!(ctx.needs_period_cte);
        assert_eq!(ctx.needed_period_columns, vec![PeriodColumn::Year]);
        assert!(!ctx.needs_facility_join);
    }

    #[test]
    fn test_physical_year_needs_no_cte() {
        let config = FetchConfig {
            group_bys: vec![DisaggregationOption::Year],
            values: vec![ValueSpec::sum("count").unwrap()],
            ..Default::default()
        };
        let cols = columns(&["indicator_common_id", "year", "count"]);
        let ctx = QueryContext::build(&table(), &cols, &FacilityColumnsConfig::default(), &config).unwrap();

        assert!(!ctx.has_period_id);
        assert!(!ctx.needs_period_cte);
        assert!(ctx.needed_period_columns.is_empty());
    }

    #[test]
    fn test_synthetic_column_without_period_id_is_rejected() {
        let config = FetchConfig { group_bys: vec![DisaggregationOption::Month], ..Default::default() };
        let cols = columns(&["indicator_common_id", "year", "count"]);
        let err = QueryContext::build(&table(), &cols, &FacilityColumnsConfig::default(), &config).unwrap_err();
        assert!(matches!(err, Error::InvalidColumn { column, .. } if column == "month"));
    }

    #[test]
    fn test_facility_filter_triggers_join_and_partition() {
        let config = FetchConfig {
            group_bys: vec![DisaggregationOption::AdminArea2],
            filters: vec![
                Filter { col: DisaggregationOption::FacilityType, values: vec!["hospital".into()] },
                Filter { col: DisaggregationOption::AdminArea2, values: vec!["North".into()] },
            ],
            ..Default::default()
        };
        let cols = columns(&["indicator_common_id", "admin_area_2", "facility_id", "count"]);
        let ctx = QueryContext::build(&table(), &cols, &types_enabled(), &config).unwrap();

        assert!(ctx.needs_facility_join);
        assert_eq!(ctx.requested_facility_columns, vec![FacilityColumn::FacilityType]);
        assert_eq!(ctx.facility_filters.len(), 1);
        assert_eq!(ctx.non_facility_filters.len(), 1);
        assert_eq!(ctx.column_sql(DisaggregationOption::FacilityType), "f.facility_type");
        assert_eq!(ctx.column_sql(DisaggregationOption::AdminArea2), "b.admin_area_2");
    }

    #[test]
    fn test_disabled_facility_column_is_rejected() {
        let config = FetchConfig { group_bys: vec![DisaggregationOption::FacilityOwnership], ..Default::default() };
        let cols = columns(&["indicator_common_id", "facility_id"]);
        let err = QueryContext::build(&table(), &cols, &types_enabled(), &config).unwrap_err();
        assert!(matches!(err, Error::InvalidColumn { column, .. } if column == "facility_ownership"));
    }

    #[test]
    fn test_missing_columns_are_rejected() {
        let cols = columns(&["indicator_common_id", "count"]);

        let config = FetchConfig { group_bys: vec![DisaggregationOption::AdminArea3], ..Default::default() };
        assert!(QueryContext::build(&table(), &cols, &FacilityColumnsConfig::default(), &config).is_err());

        let config = FetchConfig { values: vec![ValueSpec::sum("rate").unwrap()], ..Default::default() };
        assert!(QueryContext::build(&table(), &cols, &FacilityColumnsConfig::default(), &config).is_err());

        let err = QueryContext::build(&table(), &HashSet::new(), &FacilityColumnsConfig::default(), &config)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_unqualified_columns_without_join() {
        let cols = columns(&["indicator_common_id", "count"]);
        let config = FetchConfig::default();
        let ctx = QueryContext::build(&table(), &cols, &FacilityColumnsConfig::default(), &config).unwrap();
        assert_eq!(ctx.column_sql(DisaggregationOption::IndicatorCommonId), "indicator_common_id");
        assert_eq!(ctx.value_sql(&Identifier::new("count").unwrap()), "\"count\"");
    }
}
