//! Dynamic SQL construction over long-form results tables.
//!
//! This crate provides:
//! - The [`FetchConfig`] request model and column allow-lists
//! - Query context resolution (facility join, period decomposition)
//! - The aggregation composer and post-aggregation expressions
//! - Period bounds and possible-values resolvers
//! - Pooled Postgres connections and the statement executor
//! - [`ResultsService`], which puts the versioned cache in front of all of it

pub mod bounds;
pub mod columns;
pub mod composer;
pub mod context;
pub mod cte;
pub mod db;
pub mod expression;
pub mod fetch_config;
pub mod possible_values;
pub mod service;
pub mod source;
pub mod sql;

pub use bounds::PeriodBounds;
pub use columns::{DisaggregationOption, Identifier, TableName};
pub use composer::compose;
pub use context::QueryContext;
pub use db::{ConnectionManager, Permissions};
pub use fetch_config::{FetchConfig, Filter, PeriodFilter, PeriodOption};
pub use possible_values::PossibleValues;
pub use service::{BoundsKey, Limits, ResultsKey, ResultsService, ValuesKey};
pub use source::{ExecutorProvider, InstanceConfigSource, QueryExecutor};
pub use sql::{ComposedQuery, SqlParam};
