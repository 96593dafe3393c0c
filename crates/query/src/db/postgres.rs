//! Postgres-backed [`QueryExecutor`] and [`InstanceConfigSource`].

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use panorama_core::Error;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use tokio_postgres::types::{FromSql, ToSql, Type};

use super::manager::{ConnectionManager, Permissions};
use crate::columns::TableName;
use crate::source::{ExecutorProvider, FacilityColumnsConfig, InstanceConfigSource, QueryExecutor, Row};
use crate::sql::{ComposedQuery, SqlParam};

const TABLE_COLUMNS_SQL: &str =
    "SELECT column_name::text FROM information_schema.columns WHERE table_schema = 'public' AND table_name = $1";

const MODULE_LAST_RUN_SQL: &str = "SELECT m.last_run::text FROM modules m \
     JOIN results_objects r ON r.module_id = m.id WHERE r.table_name = $1 LIMIT 1";

const FACILITY_COLUMNS_SQL: &str =
    "SELECT config_json_value::text FROM instance_config WHERE config_key = 'facility_columns'";

fn query_failed(err: tokio_postgres::Error) -> Error {
    Error::QueryFailed(err.to_string())
}

fn checkout_failed(err: deadpool_postgres::PoolError) -> Error {
    Error::ConnectionFailed(err.to_string())
}

/// Executes statements on a pooled project or main database.
#[derive(Clone)]
pub struct PgExecutor {
    pool: Pool,
}

impl PgExecutor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, Error> {
        self.pool.get().await.map_err(checkout_failed)
    }
}

fn bind(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| match p {
            SqlParam::Text(v) => v as &(dyn ToSql + Sync),
            SqlParam::TextArray(v) => v as &(dyn ToSql + Sync),
            SqlParam::IntArray(v) => v as &(dyn ToSql + Sync),
        })
        .collect()
}

fn row_to_json(row: &tokio_postgres::Row) -> Result<Row, Error> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = cell_to_json(row, idx, column.type_()).map_err(query_failed)?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn cell_to_json(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<Value, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::from),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(Value::from),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(Value::from),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::from),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(|v| Value::from(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::from),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx)?,
        Type::DATE => row.try_get::<_, Option<chrono::NaiveDate>>(idx)?.map(|d| Value::from(d.to_string())),
        Type::TIMESTAMP => row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)?.map(|d| Value::from(d.to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|d| Value::from(d.to_rfc3339())),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(numeric_to_json),
        _ if <String as FromSql>::accepts(ty) => row.try_get::<_, Option<String>>(idx)?.map(Value::from),
        _ => {
            tracing::debug!(column = idx, pg_type = %ty, "undecodable column type; emitting null");
            None
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

/// NUMERIC as a JSON number; the decimal string when it has no finite
/// `f64` form.
fn numeric_to_json(value: Decimal) -> Value {
    match value.to_f64().and_then(serde_json::Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(value.to_string()),
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn fetch_rows(&self, query: &ComposedQuery) -> Result<Vec<Row>, Error> {
        let client = self.client().await?;
        tracing::debug!(sql = %query.sql, params = query.params.len(), "executing query");

        let rows = client.query(query.sql.as_str(), &bind(&query.params)).await.map_err(query_failed)?;
        rows.iter().map(row_to_json).collect()
    }

    async fn table_columns(&self, table: &TableName) -> Result<HashSet<String>, Error> {
        let client = self.client().await?;
        let rows = client.query(TABLE_COLUMNS_SQL, &[&table.as_str()]).await.map_err(query_failed)?;
        rows.iter().map(|row| row.try_get::<_, String>(0).map_err(query_failed)).collect()
    }

    async fn module_last_run(&self, table: &TableName) -> Result<Option<String>, Error> {
        let client = self.client().await?;
        let row = client.query_opt(MODULE_LAST_RUN_SQL, &[&table.as_str()]).await.map_err(query_failed)?;
        match row {
            Some(row) => row.try_get::<_, Option<String>>(0).map_err(query_failed),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl InstanceConfigSource for PgExecutor {
    async fn facility_columns(&self) -> Result<FacilityColumnsConfig, Error> {
        let client = self.client().await?;
        let row = client.query_opt(FACILITY_COLUMNS_SQL, &[]).await.map_err(query_failed)?;
        let raw = match row {
            Some(row) => row.try_get::<_, Option<String>>(0).map_err(query_failed)?,
            None => None,
        };

        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => {
                tracing::debug!("no facility column config; optional facility columns disabled");
                Ok(FacilityColumnsConfig::default())
            }
        }
    }
}

/// Shared read-only pools for query paths; the main database holds
/// instance settings.
impl ExecutorProvider for ConnectionManager {
    fn instance(&self) -> Result<Arc<dyn InstanceConfigSource>, Error> {
        let pool = self.get_connection_from_cache_or_new(&self.config().main_database, Permissions::ReadOnly)?;
        Ok(Arc::new(PgExecutor::new(pool)))
    }

    fn project(&self, project_id: &str) -> Result<Arc<dyn QueryExecutor>, Error> {
        let pool = self.get_connection_from_cache_or_new(project_id, Permissions::ReadOnly)?;
        Ok(Arc::new(PgExecutor::new(pool)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_preserves_order_and_count() {
        let params = vec![
            SqlParam::TextArray(vec!["North".into()]),
            SqlParam::IntArray(vec![2023, 2024]),
            SqlParam::Text("ro_m1_results".into()),
        ];
        assert_eq!(bind(&params).len(), 3);
    }

    #[test]
    fn test_numeric_becomes_json_number() {
        assert_eq!(numeric_to_json(Decimal::new(12345, 2)), serde_json::json!(123.45));
        assert_eq!(numeric_to_json(Decimal::from(42)), serde_json::json!(42.0));
        assert_eq!(numeric_to_json(Decimal::ZERO), serde_json::json!(0.0));
    }

    #[test]
    fn test_text_like_types_take_string_fallback() {
        for ty in [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME] {
            assert!(<String as FromSql>::accepts(&ty), "{ty}");
        }
        for ty in [Type::NUMERIC, Type::BYTEA, Type::UUID] {
            assert!(!<String as FromSql>::accepts(&ty), "{ty}");
        }
    }
}
