use crate::config::toml_config::{LayoutConfig, LayoutKind, TomlConfig};
use crate::core::cache::QueryCache;
use crate::core::discovery::{
    experiment_key, is_recent, summarize_experiment_document, summarize_flat, summarize_nested,
};
use crate::core::normalize::{normalize_record_with, normalize_records_with, NormalizeOptions, STATION_KEYS};
use crate::core::table::build_table;
use crate::domain::model::{ExperimentSummary, ExperimentTable, Record};
use crate::domain::ports::DocumentSource;
use crate::domain::query::{Direction, Query};
use crate::utils::error::Result;
use crate::utils::validation;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// 實驗資料的讀取入口：依儲存結構組出查詢，經快取後正規化
pub struct ExperimentStore<S: DocumentSource> {
    source: S,
    layout: LayoutConfig,
    query_limit: usize,
    cache: QueryCache,
}

impl<S: DocumentSource> ExperimentStore<S> {
    pub fn new(source: S, layout: LayoutConfig, query_limit: usize, cache: QueryCache) -> Self {
        Self {
            source,
            layout,
            query_limit,
            cache,
        }
    }

    pub fn from_config(source: S, config: &TomlConfig) -> Self {
        Self::new(
            source,
            config.layout.clone(),
            config.query.limit,
            QueryCache::new(config.cache_ttl()),
        )
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// 單一實驗的正規化方式
    pub fn experiment_options(&self) -> NormalizeOptions {
        let layout = &self.layout;
        let options = NormalizeOptions::default().with_time_field(&layout.time_field);
        match layout.kind {
            // 以站點當作實驗欄位時，同一站點包含多次實驗，序號會重複
            LayoutKind::Flat if STATION_KEYS.contains(&layout.experiment_field.as_str()) => {
                options.without_sequence_dedupe()
            }
            LayoutKind::Flat => options.with_experiment_field(&layout.experiment_field),
            LayoutKind::Nested => options,
        }
    }

    pub fn station_options(&self) -> NormalizeOptions {
        NormalizeOptions::default()
            .with_time_field(&self.layout.time_field)
            .without_sequence_dedupe()
    }

    async fn fetch(&self, query: &Query, use_cache: bool) -> Result<Vec<Record>> {
        let key = query.cache_key();

        if use_cache && self.cache.is_enabled() {
            if let Some(records) = self.cache.get(&key) {
                tracing::debug!("Cache hit: {}", key);
                return Ok(records);
            }
        }

        tracing::debug!("Querying datastore: {}", key);
        let records = self.source.run_query(query).await?;
        tracing::debug!("{} documents returned", records.len());

        // 即時查詢同樣更新快取，讓後續的歷史查詢拿到最新資料
        self.cache.insert(key, records.clone());
        Ok(records)
    }

    fn readings_query(&self, experiment_id: &str) -> Result<Query> {
        let layout = &self.layout;
        let query = match layout.kind {
            LayoutKind::Flat => {
                Query::collection(&layout.collection).where_eq(&layout.experiment_field, experiment_id)
            }
            LayoutKind::Nested => {
                // 實驗編號是文件路徑的一段，不可含 '/'
                validation::validate_identifier("experiment_id", experiment_id)?;
                Query::collection(&layout.readings_collection)
                    .under(format!("{}/{}", layout.parent_collection, experiment_id))
            }
        };

        Ok(query
            .order_by(&layout.time_field, Direction::Descending)
            .limit(self.query_limit))
    }

    /// Lists experiments, most recently active first.
    pub async fn list_experiments(&self) -> Result<Vec<ExperimentSummary>> {
        let layout = &self.layout;
        let summaries = match layout.kind {
            LayoutKind::Flat => {
                let query = Query::collection(&layout.collection)
                    .order_by(&layout.time_field, Direction::Descending)
                    .limit(layout.scan_limit);
                let records = self.fetch(&query, true).await?;
                summarize_flat(&records, &layout.experiment_field, &layout.time_field)
            }
            LayoutKind::Nested => {
                let query = Query::collection(&layout.parent_collection).limit(layout.scan_limit);
                let records = self.fetch(&query, true).await?;
                summarize_nested(&records, &layout.status_field)
            }
        };

        tracing::info!("🔎 Found {} experiments", summaries.len());
        Ok(summaries)
    }

    pub async fn active_experiment(&self) -> Result<Option<ExperimentSummary>> {
        self.active_experiment_at(Utc::now()).await
    }

    /// 找出目前執行中的實驗 (不使用快取)
    pub async fn active_experiment_at(&self, now: DateTime<Utc>) -> Result<Option<ExperimentSummary>> {
        let layout = &self.layout;
        match layout.kind {
            LayoutKind::Nested => {
                let query = Query::collection(&layout.parent_collection)
                    .where_eq(&layout.status_field, layout.running_value.as_str())
                    .limit(1);
                let records = self.fetch(&query, false).await?;
                Ok(records
                    .first()
                    .map(|record| summarize_experiment_document(record, &layout.status_field)))
            }
            LayoutKind::Flat => {
                let query = Query::collection(&layout.collection)
                    .order_by(&layout.time_field, Direction::Descending)
                    .limit(1);
                let records = self.fetch(&query, false).await?;
                let Some(latest) = records.first() else {
                    return Ok(None);
                };
                let Some(id) = experiment_key(latest.get(&layout.experiment_field)) else {
                    return Ok(None);
                };

                let row = normalize_record_with(latest, Some(&layout.time_field));
                let Some(last_seen) = row.timestamp else {
                    return Ok(None);
                };
                if !is_recent(last_seen, now, Duration::from_secs(layout.active_window_secs)) {
                    tracing::debug!("Latest reading of {} is older than the active window", id);
                    return Ok(None);
                }

                let mut summary = ExperimentSummary::new(id);
                summary.last_seen = Some(last_seen);
                summary.status = Some(layout.running_value.clone());
                summary.stations.extend(row.station);
                Ok(Some(summary))
            }
        }
    }

    /// Raw readings of one experiment, newest `query_limit` first.
    pub async fn fetch_experiment_records(&self, experiment_id: &str, realtime: bool) -> Result<Vec<Record>> {
        let query = self.readings_query(experiment_id)?;
        let records = self.fetch(&query, !realtime).await?;

        // 平面結構中實驗編號可能以整數儲存
        if records.is_empty() && self.layout.kind == LayoutKind::Flat {
            if let Ok(numeric) = experiment_id.trim().parse::<i64>() {
                let mut numeric_query = query.clone();
                if let Some(filter) = numeric_query.filters.first_mut() {
                    filter.value = numeric.into();
                }
                return self.fetch(&numeric_query, !realtime).await;
            }
        }

        Ok(records)
    }

    pub async fn fetch_station_records(&self, station: &str, limit: usize) -> Result<Vec<Record>> {
        let query = Query::collection(&self.layout.collection)
            .where_eq("station", station)
            .order_by(&self.layout.time_field, Direction::Descending)
            .limit(limit);
        self.fetch(&query, true).await
    }

    pub async fn load_experiment_data(&self, experiment_id: &str, realtime: bool) -> Result<ExperimentTable> {
        let records = self.fetch_experiment_records(experiment_id, realtime).await?;
        let table = build_table(experiment_id, normalize_records_with(&records, &self.experiment_options()));
        tracing::info!(
            "📊 Loaded {} rows for experiment {} ({})",
            table.len(),
            experiment_id,
            if realtime { "realtime" } else { "historical" }
        );
        Ok(table)
    }

    /// 依站點讀取最新的讀數
    pub async fn load_station_data(&self, station: &str, limit: usize) -> Result<ExperimentTable> {
        let records = self.fetch_station_records(station, limit).await?;
        let table = build_table(station, normalize_records_with(&records, &self.station_options()));
        tracing::info!("📊 Loaded {} rows for station {}", table.len(), station);
        Ok(table)
    }
}
