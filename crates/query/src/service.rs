//! Cached read paths over results tables.
//!
//! Every answer is keyed on what was asked (project, table, request) and
//! versioned by the last run of the module that writes the table. The
//! version is read before the fetch and again after it; if the module ran
//! in between, the cache drops the answer instead of storing it under the
//! stale version.

use std::borrow::Cow;
use std::sync::Arc;

use panorama_core::cache::{DurableStore, ParsedData, VersionedCache};
use panorama_core::{ApiResponse, Error};
use serde::{Deserialize, Serialize};

use crate::bounds::{PeriodBounds, last_n_months_window, resolve_bounds};
use crate::columns::{DisaggregationOption, TableName};
use crate::composer::compose;
use crate::context::QueryContext;
use crate::fetch_config::{FetchConfig, Filter, PeriodFilter, PeriodOption};
use crate::possible_values::{PossibleValues, resolve_possible_values};
use crate::source::{ExecutorProvider, InstanceConfigSource, QueryExecutor, Row};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsKey {
    pub project_id: String,
    pub table: TableName,
    pub fetch_config: FetchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundsKey {
    pub project_id: String,
    pub table: TableName,
    pub filters: Vec<Filter>,
    pub period_option: Option<PeriodOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesKey {
    pub project_id: String,
    pub table: TableName,
    pub dimension: DisaggregationOption,
    pub filters: Vec<Filter>,
}

/// State of the source data an answer was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceVersion {
    pub module_last_run: Option<String>,
}

/// A payload tagged with the key and version that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer<K, D> {
    pub key: K,
    pub module_last_run: Option<String>,
    pub data: D,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsData {
    pub rows: Vec<Row>,
    /// More than `max_items` rows matched; `rows` holds the first `max_items`.
    pub too_many_items: bool,
}

pub type ResultsResponse = ApiResponse<Answer<ResultsKey, ResultsData>>;
pub type BoundsResponse = ApiResponse<Answer<BoundsKey, Option<PeriodBounds>>>;
pub type ValuesResponse = ApiResponse<Answer<ValuesKey, PossibleValues>>;

type AnswerCache<K, D> = VersionedCache<K, SourceVersion, ApiResponse<Answer<K, D>>>;

/// Row and option caps applied to every query.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_items: usize,
    pub max_replicant_options: usize,
}

fn parse_answer<K: Serialize, D>(response: &ApiResponse<Answer<K, D>>) -> ParsedData {
    match response {
        ApiResponse::Success(answer) => {
            ParsedData::store(&answer.key, &SourceVersion { module_last_run: answer.module_last_run.clone() })
        }
        ApiResponse::Failure(_) => ParsedData::skip(),
    }
}

/// Errors caused by the request itself; reported in the envelope, never cached.
fn is_request_error(err: &Error) -> bool {
    matches!(err, Error::InvalidInput(_) | Error::InvalidColumn { .. } | Error::InvalidExpression(_))
}

async fn answer<K, D>(
    executor: Arc<dyn QueryExecutor>, key: K, table: TableName, outcome: Result<D, Error>,
) -> Result<ApiResponse<Answer<K, D>>, Error> {
    let data = match outcome {
        Ok(data) => data,
        Err(e) if is_request_error(&e) => {
            tracing::debug!(table = %table, error = %e, "request rejected");
            return Ok(ApiResponse::Failure(e.to_string()));
        }
        Err(e) => return Err(e),
    };
    let module_last_run = executor.module_last_run(&table).await?;
    Ok(ApiResponse::Success(Answer { key, module_last_run, data }))
}

pub struct ResultsService {
    provider: Arc<dyn ExecutorProvider>,
    results: AnswerCache<ResultsKey, ResultsData>,
    bounds: AnswerCache<BoundsKey, Option<PeriodBounds>>,
    values: AnswerCache<ValuesKey, PossibleValues>,
    limits: Limits,
}

impl ResultsService {
    /// Best-effort shared caching; `store` is `None` when no Redis is configured.
    pub fn server(
        provider: Arc<dyn ExecutorProvider>, store: Option<Arc<dyn DurableStore>>, prefix: &str, limits: Limits,
    ) -> Self {
        Self {
            provider,
            results: VersionedCache::server(format!("{prefix}-results"), store.clone(), parse_answer),
            bounds: VersionedCache::server(format!("{prefix}-bounds"), store.clone(), parse_answer),
            values: VersionedCache::server(format!("{prefix}-values"), store, parse_answer),
            limits,
        }
    }

    /// Durable local caching with an in-memory LRU of `capacity` entries per cache.
    pub fn client(
        provider: Arc<dyn ExecutorProvider>, store: Arc<dyn DurableStore>, capacity: usize, limits: Limits,
    ) -> Self {
        Self {
            provider,
            results: VersionedCache::client("results", Arc::clone(&store), capacity, parse_answer),
            bounds: VersionedCache::client("bounds", Arc::clone(&store), capacity, parse_answer),
            values: VersionedCache::client("values", store, capacity, parse_answer),
            limits,
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    async fn current_version(executor: &dyn QueryExecutor, table: &TableName) -> Result<SourceVersion, Error> {
        Ok(SourceVersion { module_last_run: executor.module_last_run(table).await? })
    }

    pub async fn get_results(&self, key: ResultsKey) -> Result<ResultsResponse, Error> {
        let instance = self.provider.instance()?;
        let executor = self.provider.project(&key.project_id)?;
        let version = Self::current_version(executor.as_ref(), &key.table).await?;
        let max_items = self.limits.max_items;

        let cache_key = key.clone();
        self.results
            .get_or_fetch(&cache_key, &version, move || async move {
                let table = key.table.clone();
                let outcome =
                    query_results(instance.as_ref(), executor.as_ref(), &table, &key.fetch_config, max_items).await;
                answer(executor, key, table, outcome).await
            })
            .await
    }

    pub async fn get_period_bounds(&self, key: BoundsKey) -> Result<BoundsResponse, Error> {
        let instance = self.provider.instance()?;
        let executor = self.provider.project(&key.project_id)?;
        let version = Self::current_version(executor.as_ref(), &key.table).await?;

        let cache_key = key.clone();
        self.bounds
            .get_or_fetch(&cache_key, &version, move || async move {
                let table = key.table.clone();
                let outcome =
                    resolve_bounds(instance.as_ref(), executor.as_ref(), &table, &key.filters, key.period_option)
                        .await;
                answer(executor, key, table, outcome).await
            })
            .await
    }

    pub async fn get_possible_values(&self, key: ValuesKey) -> Result<ValuesResponse, Error> {
        let instance = self.provider.instance()?;
        let executor = self.provider.project(&key.project_id)?;
        let version = Self::current_version(executor.as_ref(), &key.table).await?;
        let max_options = self.limits.max_replicant_options;

        let cache_key = key.clone();
        self.values
            .get_or_fetch(&cache_key, &version, move || async move {
                let table = key.table.clone();
                let outcome = resolve_possible_values(
                    instance.as_ref(),
                    executor.as_ref(),
                    &table,
                    key.dimension,
                    &key.filters,
                    max_options,
                )
                .await;
                answer(executor, key, table, outcome).await
            })
            .await
    }

    /// Drop every cached answer. Returns the durable entries removed.
    pub async fn clear_all(&self) -> u64 {
        self.results.clear_all().await + self.bounds.clear_all().await + self.values.clear_all().await
    }

    pub async fn clear_results(&self, key: &ResultsKey) -> Result<(), Error> {
        self.results.clear_entry(key).await
    }
}

/// Run one aggregation request uncached.
pub async fn query_results(
    instance: &dyn InstanceConfigSource, executor: &dyn QueryExecutor, table: &TableName, config: &FetchConfig,
    max_items: usize,
) -> Result<ResultsData, Error> {
    let config = resolve_period_window(instance, executor, table, config).await?;
    let ctx = QueryContext::resolve(instance, executor, table, &config).await?;
    let query = compose(&ctx, &config, max_items)?;

    let mut rows = executor.fetch_rows(&query).await?;
    let too_many_items = rows.len() > max_items;
    rows.truncate(max_items);

    tracing::info!(table = %table, rows = rows.len(), too_many_items, "results query complete");
    Ok(ResultsData { rows, too_many_items })
}

/// Replace a `last_n_months` window with concrete `period_id` bounds.
async fn resolve_period_window<'a>(
    instance: &dyn InstanceConfigSource, executor: &dyn QueryExecutor, table: &TableName, config: &'a FetchConfig,
) -> Result<Cow<'a, FetchConfig>, Error> {
    let Some(PeriodFilter::LastNMonths { n_months }) = config.period_filter else {
        return Ok(Cow::Borrowed(config));
    };

    let filters: Vec<Filter> = config.active_filters().cloned().collect();
    let bounds = resolve_bounds(instance, executor, table, &filters, Some(PeriodOption::PeriodId))
        .await?
        .ok_or_else(|| Error::InvalidInput(format!("{table} has no period data for last_n_months")))?;

    let mut resolved = config.clone();
    resolved.period_filter = Some(last_n_months_window(&bounds, n_months)?);
    Ok(Cow::Owned(resolved))
}
