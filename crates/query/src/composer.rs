//! Turns a classified [`FetchConfig`] into one parameterized statement.
//!
//! Shape of the output:
//!
//! ```text
//! [WITH period_expanded AS (..), facility_subset AS (..)]
//! [SELECT *, (<derived>)::float8 AS "<name>" FROM (]
//!   SELECT <groupBys>, <aggregates> FROM <source> [JOIN] [WHERE ..] [GROUP BY ..]
//!   [UNION ALL SELECT <national row> ..]
//! [) AS aggregated]
//! LIMIT <max_items + 1>
//! ```

use panorama_core::Error;

use crate::columns::{DisaggregationOption, Identifier};
use crate::context::QueryContext;
use crate::cte;
use crate::expression::DerivedColumn;
use crate::fetch_config::{AggregateFunc, FetchConfig, Filter, PeriodFilter};
use crate::sql::{ComposedQuery, ParamBuilder, filter_condition, where_clause};

const NATIONAL: &str = "'national'";

/// Build the aggregation statement for `config`, fetching at most
/// `max_items + 1` rows so callers can detect truncation.
pub fn compose(ctx: &QueryContext, config: &FetchConfig, max_items: usize) -> Result<ComposedQuery, Error> {
    let aggregates = aggregate_columns(config)?;
    if aggregates.is_empty() && config.group_bys.is_empty() {
        return Err(Error::InvalidInput("request has neither values nor groupBys".into()));
    }

    let derived = match &config.post_aggregation_expression {
        Some(post) => {
            let ingredients: Vec<Identifier> = post.ingredient_values.iter().map(|i| i.prop.clone()).collect();
            let derived = DerivedColumn::parse(&post.expression, &ingredients)?;
            check_name_is_free(&derived.name, config, &aggregates)?;
            Some(derived)
        }
        None => None,
    };

    let mut params = ParamBuilder::new();
    let mut body = aggregation(ctx, config, &aggregates, false, &mut params)?;

    let national = config.include_national_total && config.group_bys.iter().any(|c| c.is_admin_area());
    if national {
        body.push_str(" UNION ALL ");
        body.push_str(&aggregation(ctx, config, &aggregates, true, &mut params)?);
    }

    if let Some(derived) = derived {
        body = format!("SELECT *, ({})::float8 AS {} FROM ({body}) AS aggregated", derived.to_sql(), derived.name.quoted());
    }

    let sql = format!("{}{body} LIMIT {}", cte::with_clause(ctx), max_items.saturating_add(1));
    tracing::debug!(table = %ctx.table, national, params = params.len(), "composed aggregation query");
    Ok(params.finish(sql))
}

/// Every `(func, prop)` the inner query aggregates, values first, each prop once.
fn aggregate_columns(config: &FetchConfig) -> Result<Vec<(AggregateFunc, Identifier)>, Error> {
    let mut out: Vec<(AggregateFunc, Identifier)> = Vec::new();
    let ingredients = config
        .post_aggregation_expression
        .iter()
        .flat_map(|p| p.ingredient_values.iter().map(|i| (i.func, i.prop.clone())));

    for (func, prop) in config.values.iter().map(|v| (v.func, v.prop.clone())).chain(ingredients) {
        match out.iter().find(|(_, existing)| *existing == prop) {
            Some((existing_func, _)) if *existing_func != func => {
                return Err(Error::InvalidInput(format!("{prop} is aggregated with both {existing_func:?} and {func:?}")));
            }
            Some(_) => {}
            None => out.push((func, prop)),
        }
    }
    Ok(out)
}

fn check_name_is_free(
    name: &Identifier, config: &FetchConfig, aggregates: &[(AggregateFunc, Identifier)],
) -> Result<(), Error> {
    let taken = config.group_bys.iter().any(|c| c.as_str() == name.as_str())
        || aggregates.iter().any(|(_, prop)| prop == name);
    if taken {
        return Err(Error::InvalidExpression(format!("result name {name} collides with an existing column")));
    }
    Ok(())
}

fn aggregation(
    ctx: &QueryContext, config: &FetchConfig, aggregates: &[(AggregateFunc, Identifier)], national: bool,
    params: &mut ParamBuilder,
) -> Result<String, Error> {
    let mut select = Vec::new();
    let mut group_by = Vec::new();

    for &col in &config.group_bys {
        if national && col.is_admin_area() {
            select.push(format!("{NATIONAL} AS {}", col.as_str()));
        } else {
            let column = ctx.column_sql(col);
            select.push(alias(&column, col));
            group_by.push(column);
        }
    }
    for (func, prop) in aggregates {
        select.push(format!("{}({})::float8 AS {}", func.as_sql(), ctx.value_sql(prop), prop.quoted()));
    }

    let mut conditions = Vec::new();
    let filters = ctx.non_facility_filters.iter().chain(&ctx.facility_filters);
    for filter in filters.filter(|f: &&Filter| !(national && f.col.is_admin_area())) {
        conditions.push(filter_condition(&ctx.column_sql(filter.col), filter, params)?);
    }
    if let Some(period) = &config.period_filter {
        conditions.push(period_condition(ctx, period)?);
    }

    let mut sql = format!("SELECT {}{}{}", select.join(", "), cte::from_clause(ctx), where_clause(&conditions));
    if !group_by.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
    }
    Ok(sql)
}

/// Qualified columns keep their bare name in the output.
fn alias(column: &str, col: DisaggregationOption) -> String {
    if column == col.as_str() { column.to_string() } else { format!("{column} AS {}", col.as_str()) }
}

fn period_condition(ctx: &QueryContext, period: &PeriodFilter) -> Result<String, Error> {
    match period {
        PeriodFilter::Custom { period_option, min, max } => {
            Ok(format!("{} BETWEEN {min} AND {max}", ctx.column_sql(period_option.column())))
        }
        PeriodFilter::LastNMonths { .. } => {
            Err(Error::InvalidInput("last_n_months must be resolved against period bounds first".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_config::{Ingredient, PeriodOption, PostAggregationExpression, ValueSpec};
    use crate::source::FacilityColumnsConfig;
    use crate::sql::SqlParam;
    use std::collections::HashSet;

    const MAX_ITEMS: usize = 20_000;

    fn cols(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn compose_for(columns: &[&str], facility: FacilityColumnsConfig, config: &FetchConfig) -> ComposedQuery {
        let table = Identifier::new("ro_m1_results").unwrap();
        let ctx = QueryContext::build(&table, &cols(columns), &facility, config).unwrap();
        compose(&ctx, config, MAX_ITEMS).unwrap()
    }

    #[test]
    fn test_year_window_on_period_id_table() {
        let config = FetchConfig {
            group_bys: vec![DisaggregationOption::IndicatorCommonId],
            period_filter: Some(PeriodFilter::Custom { period_option: PeriodOption::Year, min: 2023, max: 2024 }),
            ..Default::default()
        };
        let query = compose_for(&["indicator_common_id", "period_id", "count"], Default::default(), &config);

        assert!(query.sql.starts_with("WITH period_expanded AS (SELECT *, (period_id / 100)::int AS year"));
        assert!(query.sql.contains("FROM period_expanded"));
        assert!(query.sql.contains("WHERE year BETWEEN 2023 AND 2024"));
        assert!(query.sql.contains("GROUP BY indicator_common_id"));
        assert!(query.sql.ends_with("LIMIT 20001"));
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_year_window_without_period_id_never_mentions_it() {
        let config = FetchConfig {
            values: vec![ValueSpec::sum("count").unwrap()],
            group_bys: vec![DisaggregationOption::IndicatorCommonId, DisaggregationOption::Year],
            filters: vec![Filter { col: DisaggregationOption::Year, values: vec!["2023".into()] }],
            period_filter: Some(PeriodFilter::Custom { period_option: PeriodOption::Year, min: 2020, max: 2024 }),
            ..Default::default()
        };
        let query = compose_for(&["indicator_common_id", "year", "count"], Default::default(), &config);

        assert!(!query.sql.contains("period_id"));
        assert!(!query.sql.contains("WITH"));
        assert_eq!(
            query.sql,
            "SELECT indicator_common_id, year, SUM(\"count\")::float8 AS \"count\" FROM \"ro_m1_results\" \
             WHERE year = ANY($1::int8[]) AND year BETWEEN 2020 AND 2024 GROUP BY indicator_common_id, year LIMIT 20001"
        );
        assert_eq!(query.params, vec![SqlParam::IntArray(vec![2023])]);
    }

    #[test]
    fn test_facility_join_qualifies_columns() {
        let config = FetchConfig {
            values: vec![ValueSpec::sum("count").unwrap()],
            group_bys: vec![DisaggregationOption::FacilityType],
            filters: vec![
                Filter { col: DisaggregationOption::AdminArea2, values: vec!["North".into()] },
                Filter { col: DisaggregationOption::FacilityType, values: vec!["hospital".into()] },
            ],
            ..Default::default()
        };
        let facility = FacilityColumnsConfig { include_types: true, ..Default::default() };
        let query = compose_for(&["indicator_common_id", "admin_area_2", "facility_id", "count"], facility, &config);

        assert!(query.sql.starts_with("WITH facility_subset AS (SELECT facility_id, facility_type FROM facilities)"));
        assert!(query.sql.contains(
            "SELECT f.facility_type AS facility_type, SUM(b.\"count\")::float8 AS \"count\" FROM \"ro_m1_results\" b \
             LEFT JOIN facility_subset f ON b.facility_id = f.facility_id"
        ));
        assert!(query.sql.contains("WHERE b.admin_area_2 = ANY($1::text[]) AND f.facility_type = ANY($2::text[])"));
        assert!(query.sql.contains("GROUP BY f.facility_type"));
        assert_eq!(query.params.len(), 2);
    }

    #[test]
    fn test_national_total_union() {
        let config = FetchConfig {
            values: vec![ValueSpec::sum("count").unwrap()],
            group_bys: vec![DisaggregationOption::IndicatorCommonId, DisaggregationOption::AdminArea2],
            filters: vec![
                Filter { col: DisaggregationOption::AdminArea2, values: vec!["North".into()] },
                Filter { col: DisaggregationOption::IndicatorCommonId, values: vec!["anc1".into()] },
            ],
            include_national_total: true,
            ..Default::default()
        };
        let query = compose_for(&["indicator_common_id", "admin_area_2", "count"], Default::default(), &config);

        let (main, national) = query.sql.split_once(" UNION ALL ").unwrap();
        assert!(main.contains("GROUP BY indicator_common_id, admin_area_2"));
        assert!(national.starts_with("SELECT indicator_common_id, 'national' AS admin_area_2"));
        assert!(national.contains("WHERE indicator_common_id = ANY($3::text[])"));
        assert!(!national.contains("admin_area_2 = ANY"));
        assert!(national.contains("GROUP BY indicator_common_id LIMIT 20001"));
        assert_eq!(query.params.len(), 3);
    }

    #[test]
    fn test_national_total_skipped_without_admin_grouping() {
        let config = FetchConfig {
            values: vec![ValueSpec::sum("count").unwrap()],
            group_bys: vec![DisaggregationOption::IndicatorCommonId],
            include_national_total: true,
            ..Default::default()
        };
        let query = compose_for(&["indicator_common_id", "count"], Default::default(), &config);
        assert!(!query.sql.contains("UNION ALL"));
    }

    #[test]
    fn test_post_aggregation_wraps_combined_query() {
        let config = FetchConfig {
            group_bys: vec![DisaggregationOption::IndicatorCommonId],
            post_aggregation_expression: Some(PostAggregationExpression {
                ingredient_values: vec![
                    Ingredient { prop: Identifier::new("count_sum").unwrap(), func: AggregateFunc::Sum },
                    Ingredient { prop: Identifier::new("count_expect_sum").unwrap(), func: AggregateFunc::Sum },
                ],
                expression: "pct_diff = (count_sum - count_expect_sum) / count_expect_sum".into(),
            }),
            ..Default::default()
        };
        let query = compose_for(&["indicator_common_id", "count_sum", "count_expect_sum"], Default::default(), &config);

        assert!(query.sql.starts_with("SELECT *, (((\"count_sum\"::numeric - \"count_expect_sum\"::numeric)"));
        assert!(query.sql.contains("AS \"pct_diff\" FROM (SELECT indicator_common_id, SUM(\"count_sum\")::float8"));
        assert!(query.sql.ends_with(") AS aggregated LIMIT 20001"));
    }

    #[test]
    fn test_post_aggregation_name_collision() {
        let config = FetchConfig {
            values: vec![ValueSpec::sum("count_sum").unwrap()],
            post_aggregation_expression: Some(PostAggregationExpression {
                ingredient_values: vec![Ingredient {
                    prop: Identifier::new("count_sum").unwrap(),
                    func: AggregateFunc::Sum,
                }],
                expression: "count_sum = count_sum * 2".into(),
            }),
            ..Default::default()
        };
        let table = Identifier::new("t").unwrap();
        let ctx = QueryContext::build(&table, &cols(&["count_sum"]), &Default::default(), &config).unwrap();
        assert!(matches!(compose(&ctx, &config, MAX_ITEMS), Err(Error::InvalidExpression(_))));
    }

    #[test]
    fn test_empty_request_rejected() {
        let table = Identifier::new("t").unwrap();
        let config = FetchConfig::default();
        let ctx = QueryContext::build(&table, &cols(&["count"]), &Default::default(), &config).unwrap();
        assert!(matches!(compose(&ctx, &config, MAX_ITEMS), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_unresolved_last_n_months_rejected() {
        let config = FetchConfig {
            values: vec![ValueSpec::sum("count").unwrap()],
            period_filter: Some(PeriodFilter::LastNMonths { n_months: 12 }),
            ..Default::default()
        };
        let table = Identifier::new("t").unwrap();
        let ctx = QueryContext::build(&table, &cols(&["period_id", "count"]), &Default::default(), &config).unwrap();
        assert!(matches!(compose(&ctx, &config, MAX_ITEMS), Err(Error::InvalidInput(_))));
    }
}
