//! Declarative aggregation requests.
//!
//! A [`FetchConfig`] names what to aggregate, how to group and filter it,
//! an optional period window and an optional derived column. Column names
//! deserialize into closed enums or validated identifiers, so a malformed
//! request is rejected before any SQL is built.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::columns::{DisaggregationOption, Identifier};

/// Aggregate function applied to a value column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunc {
    #[default]
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateFunc {
    pub fn as_sql(self) -> &'static str {
        match self {
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Count => "COUNT",
        }
    }
}

/// One aggregated column: `func(prop) AS prop`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, JsonSchema)]
pub struct ValueSpec {
    pub prop: Identifier,
    pub func: AggregateFunc,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValueSpec {
    Bare(Identifier),
    Full {
        prop: Identifier,
        #[serde(default)]
        func: AggregateFunc,
    },
}

impl<'de> Deserialize<'de> for ValueSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawValueSpec::deserialize(deserializer)? {
            RawValueSpec::Bare(prop) => ValueSpec { prop, func: AggregateFunc::Sum },
            RawValueSpec::Full { prop, func } => ValueSpec { prop, func },
        })
    }
}

impl ValueSpec {
    pub fn sum(prop: &str) -> Result<Self, panorama_core::Error> {
        Ok(Self { prop: Identifier::new(prop)?, func: AggregateFunc::Sum })
    }
}

/// Restrict a column to a set of values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Filter {
    pub col: DisaggregationOption,
    pub values: Vec<String>,
}

/// Granularity a period window is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PeriodOption {
    /// YYYYMM
    PeriodId,
    /// YYYYQ
    QuarterId,
    Year,
}

impl PeriodOption {
    pub fn column(self) -> DisaggregationOption {
        match self {
            PeriodOption::PeriodId => DisaggregationOption::PeriodId,
            PeriodOption::QuarterId => DisaggregationOption::QuarterId,
            PeriodOption::Year => DisaggregationOption::Year,
        }
    }
}

/// Period window applied on top of the column filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "filterType", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PeriodFilter {
    /// Inclusive bounds in the given granularity.
    Custom { period_option: PeriodOption, min: i64, max: i64 },
    /// The most recent `n_months` months present in the table.
    LastNMonths { n_months: u32 },
}

impl PeriodFilter {
    /// Column the window constrains.
    pub fn column(&self) -> DisaggregationOption {
        match self {
            PeriodFilter::Custom { period_option, .. } => period_option.column(),
            PeriodFilter::LastNMonths { .. } => DisaggregationOption::PeriodId,
        }
    }
}

/// One named aggregate feeding a post-aggregation expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Ingredient {
    pub prop: Identifier,
    #[serde(default)]
    pub func: AggregateFunc,
}

/// Derived column computed over the aggregated rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostAggregationExpression {
    pub ingredient_values: Vec<Ingredient>,
    /// `name = arithmetic over ingredient props`, e.g.
    /// `pct_diff = (count_sum - count_expect_sum) / count_expect_sum`.
    pub expression: String,
}

/// A declarative aggregation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchConfig {
    #[serde(default)]
    pub values: Vec<ValueSpec>,
    #[serde(default)]
    pub group_bys: Vec<DisaggregationOption>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_filter: Option<PeriodFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_aggregation_expression: Option<PostAggregationExpression>,
    /// Append a national row set with admin-area groupings collapsed.
    #[serde(default)]
    pub include_national_total: bool,
}

impl FetchConfig {
    /// Filters that actually constrain something.
    pub fn active_filters(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter().filter(|f| !f.values.is_empty())
    }

    /// Every column the request reads from the table, deduplicated, in first-use order.
    pub fn referenced_columns(&self) -> Vec<DisaggregationOption> {
        let mut columns = Vec::new();
        let candidates = self
            .group_bys
            .iter()
            .copied()
            .chain(self.active_filters().map(|f| f.col))
            .chain(self.period_filter.as_ref().map(PeriodFilter::column));
        for col in candidates {
            if !columns.contains(&col) {
                columns.push(col);
            }
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_full_config() {
        let config: FetchConfig = serde_json::from_value(json!({
            "values": ["count", {"prop": "rate", "func": "AVG"}],
            "groupBys": ["indicator_common_id", "admin_area_2"],
            "filters": [{"col": "admin_area_2", "values": ["North"]}],
            "periodFilter": {"filterType": "custom", "periodOption": "year", "min": 2023, "max": 2024},
            "postAggregationExpression": {
                "ingredientValues": [{"prop": "count_sum", "func": "SUM"}],
                "expression": "x = count_sum * 2"
            },
            "includeNationalTotal": true
        }))
        .unwrap();

        assert_eq!(config.values[0], ValueSpec::sum("count").unwrap());
        assert_eq!(config.values[1].func, AggregateFunc::Avg);
        assert_eq!(config.group_bys.len(), 2);
        assert_eq!(
            config.period_filter,
            Some(PeriodFilter::Custom { period_option: PeriodOption::Year, min: 2023, max: 2024 })
        );
        assert!(config.include_national_total);
    }

    #[test]
    fn test_last_n_months_filter() {
        let filter: PeriodFilter = serde_json::from_value(json!({"filterType": "last_n_months", "nMonths": 12})).unwrap();
        assert_eq!(filter, PeriodFilter::LastNMonths { n_months: 12 });
        assert_eq!(filter.column(), DisaggregationOption::PeriodId);
    }

    #[test]
    fn test_rejects_unknown_group_by() {
        let result: Result<FetchConfig, _> = serde_json::from_value(json!({"groupBys": ["1; DROP TABLE x"]}));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unsafe_value_prop() {
        let result: Result<FetchConfig, _> = serde_json::from_value(json!({"values": ["count) FROM x; --"]}));
        assert!(result.is_err());
    }

    #[test]
    fn test_referenced_columns_dedup_and_skip_empty_filters() {
        let config = FetchConfig {
            group_bys: vec![DisaggregationOption::IndicatorCommonId],
            filters: vec![
                Filter { col: DisaggregationOption::IndicatorCommonId, values: vec!["anc1".into()] },
                Filter { col: DisaggregationOption::FacilityType, values: vec![] },
            ],
            period_filter: Some(PeriodFilter::Custom { period_option: PeriodOption::Year, min: 2023, max: 2023 }),
            ..Default::default()
        };

        assert_eq!(
            config.referenced_columns(),
            vec![DisaggregationOption::IndicatorCommonId, DisaggregationOption::Year]
        );
    }
}
