//! Composed statements and their bound parameters.

use panorama_core::Error;
use serde::Serialize;

use crate::columns::DisaggregationOption;
use crate::fetch_config::Filter;

/// A value bound to a `$n` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Text(String),
    TextArray(Vec<String>),
    IntArray(Vec<i64>),
}

impl SqlParam {
    /// Explicit cast for the placeholder this value binds to.
    pub fn array_cast(&self) -> &'static str {
        match self {
            SqlParam::Text(_) => "::text",
            SqlParam::TextArray(_) => "::text[]",
            SqlParam::IntArray(_) => "::int8[]",
        }
    }
}

/// SQL text plus the parameters its placeholders refer to, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Hands out `$n` placeholders while collecting their values.
#[derive(Debug, Default)]
pub struct ParamBuilder {
    params: Vec<SqlParam>,
}

impl ParamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn finish(self, sql: String) -> ComposedQuery {
        ComposedQuery { sql, params: self.params }
    }
}

/// `<column> = ANY($n::<type>[])` for one filter, binding its values with the
/// column's type. The array cast pins the parameter type so an `integer`
/// column or a derived `::int` period column accepts `int8` values.
pub fn filter_condition(column_sql: &str, filter: &Filter, params: &mut ParamBuilder) -> Result<String, Error> {
    let param = filter_param(filter.col, &filter.values)?;
    let cast = param.array_cast();
    let placeholder = params.push(param);
    Ok(format!("{column_sql} = ANY({placeholder}{cast})"))
}

fn filter_param(col: DisaggregationOption, values: &[String]) -> Result<SqlParam, Error> {
    if !col.is_integer() {
        return Ok(SqlParam::TextArray(values.to_vec()));
    }

    values
        .iter()
        .map(|v| {
            v.trim()
                .parse::<i64>()
                .map_err(|_| Error::InvalidInput(format!("{col} filter value {v:?} is not an integer")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(SqlParam::IntArray)
}

/// Join conditions with `AND`, or nothing when there are none.
pub fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_sequential() {
        let mut params = ParamBuilder::new();
        assert_eq!(params.push(SqlParam::Text("a".into())), "$1");
        assert_eq!(params.push(SqlParam::Text("b".into())), "$2");
        let query = params.finish("SELECT $1, $2".into());
        assert_eq!(query.params.len(), 2);
    }

    #[test]
    fn test_text_filter_is_bound_not_inlined() {
        let mut params = ParamBuilder::new();
        let filter = Filter { col: DisaggregationOption::AdminArea2, values: vec!["North'; DROP TABLE x; --".into()] };
        let sql = filter_condition("admin_area_2", &filter, &mut params).unwrap();
        assert_eq!(sql, "admin_area_2 = ANY($1::text[])");
        let query = params.finish(sql);
        assert!(!query.sql.contains("DROP"));
        assert_eq!(query.params[0], SqlParam::TextArray(vec!["North'; DROP TABLE x; --".into()]));
    }

    #[test]
    fn test_integer_filter_parses_values() {
        let mut params = ParamBuilder::new();
        let filter = Filter { col: DisaggregationOption::Year, values: vec!["2023".into(), " 2024".into()] };
        let sql = filter_condition("year", &filter, &mut params).unwrap();
        assert_eq!(sql, "year = ANY($1::int8[])");
        let query = params.finish(sql);
        assert_eq!(query.params[0], SqlParam::IntArray(vec![2023, 2024]));

        let mut params = ParamBuilder::new();
        let bad = Filter { col: DisaggregationOption::PeriodId, values: vec!["2023-01".into()] };
        assert!(matches!(filter_condition("period_id", &bad, &mut params), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_where_clause() {
        assert_eq!(where_clause(&[]), "");
        assert_eq!(where_clause(&["a = 1".into(), "b = 2".into()]), " WHERE a = 1 AND b = 2");
    }
}
