//! Seams between query construction and the databases it runs against.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use panorama_core::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::columns::{FacilityColumn, TableName};
use crate::sql::ComposedQuery;

/// One result row, keyed by output column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Runs composed statements against a project database.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn fetch_rows(&self, query: &ComposedQuery) -> Result<Vec<Row>, Error>;

    /// Physical column names of `table`; empty if the table does not exist.
    async fn table_columns(&self, table: &TableName) -> Result<HashSet<String>, Error>;

    /// Last run timestamp of the module that writes `table`, used as the
    /// version of anything read from it.
    async fn module_last_run(&self, table: &TableName) -> Result<Option<String>, Error>;
}

/// Instance-level settings read from the main database.
#[async_trait]
pub trait InstanceConfigSource: Send + Sync {
    async fn facility_columns(&self) -> Result<FacilityColumnsConfig, Error>;
}

/// Hands out executors for the main database and per-project databases.
pub trait ExecutorProvider: Send + Sync {
    fn instance(&self) -> Result<Arc<dyn InstanceConfigSource>, Error>;

    fn project(&self, project_id: &str) -> Result<Arc<dyn QueryExecutor>, Error>;
}

/// Which optional facility attributes this instance exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct FacilityColumnsConfig {
    pub include_names: bool,
    pub include_types: bool,
    pub include_ownership: bool,
    pub include_custom_1: bool,
    pub include_custom_2: bool,
    pub include_custom_3: bool,
    pub include_custom_4: bool,
    pub include_custom_5: bool,
}

impl FacilityColumnsConfig {
    pub fn is_enabled(&self, column: FacilityColumn) -> bool {
        match column {
            FacilityColumn::FacilityName => self.include_names,
            FacilityColumn::FacilityType => self.include_types,
            FacilityColumn::FacilityOwnership => self.include_ownership,
            FacilityColumn::FacilityCustom1 => self.include_custom_1,
            FacilityColumn::FacilityCustom2 => self.include_custom_2,
            FacilityColumn::FacilityCustom3 => self.include_custom_3,
            FacilityColumn::FacilityCustom4 => self.include_custom_4,
            FacilityColumn::FacilityCustom5 => self.include_custom_5,
        }
    }

    /// Enabled columns in canonical order.
    pub fn enabled(&self) -> Vec<FacilityColumn> {
        FacilityColumn::ALL.into_iter().filter(|c| self.is_enabled(*c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_facility_config_from_instance_json() {
        let config: FacilityColumnsConfig =
            serde_json::from_value(json!({"includeTypes": true, "includeCustom2": true})).unwrap();

        assert_eq!(config.enabled(), vec![FacilityColumn::FacilityType, FacilityColumn::FacilityCustom2]);
        assert!(!config.is_enabled(FacilityColumn::FacilityName));
    }

    #[test]
    fn test_facility_config_defaults_to_none_enabled() {
        let config: FacilityColumnsConfig = serde_json::from_value(json!({})).unwrap();
        assert!(config.enabled().is_empty());
    }
}
