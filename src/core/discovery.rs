//! Grouping of raw documents into logical experiments.

use crate::core::normalize::{coerce_i64, coerce_string, first_timestamp, normalize_record_with, STATION_KEYS};
use crate::domain::model::{ExperimentSummary, Record};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

const START_KEYS: &[&str] = &["start_time", "started_at", "created_at", "timestamp"];
const END_KEYS: &[&str] = &["end_time", "ended_at", "last_update", "updated_at"];
const READING_COUNT_KEYS: &[&str] = &["readings", "reading_count", "num_readings"];

/// Experiment identifiers may be stored as strings or integers.
///
/// Strings are returned as stored so the id can be queried back by equality.
pub fn experiment_key(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => (!s.trim().is_empty()).then(|| s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 平面結構：依實驗欄位分組讀數
pub fn summarize_flat(
    records: &[Record],
    experiment_field: &str,
    time_field: &str,
) -> Vec<ExperimentSummary> {
    let mut seen = HashSet::new();
    let mut groups: BTreeMap<String, ExperimentSummary> = BTreeMap::new();
    let mut unkeyed = 0usize;

    for record in records {
        if !seen.insert(record.id.as_str()) {
            continue;
        }
        let Some(key) = experiment_key(record.get(experiment_field)) else {
            unkeyed += 1;
            continue;
        };

        let row = normalize_record_with(record, Some(time_field));
        let summary = groups
            .entry(key.clone())
            .or_insert_with(|| ExperimentSummary::new(key));

        summary.readings = Some(summary.readings.unwrap_or(0) + 1);
        if let Some(ts) = row.timestamp {
            summary.first_seen = Some(summary.first_seen.map_or(ts, |first| first.min(ts)));
            summary.last_seen = Some(summary.last_seen.map_or(ts, |last| last.max(ts)));
        }
        if let Some(station) = row.station {
            summary.stations.insert(station);
        }
    }

    if unkeyed > 0 {
        tracing::debug!(
            "Skipped {} readings without an '{}' value",
            unkeyed,
            experiment_field
        );
    }

    let mut summaries: Vec<ExperimentSummary> = groups.into_values().collect();
    sort_summaries(&mut summaries);
    summaries
}

/// 巢狀結構：每份實驗文件對應一個實驗
pub fn summarize_nested(records: &[Record], status_field: &str) -> Vec<ExperimentSummary> {
    let mut seen = HashSet::new();
    let mut summaries = Vec::new();

    for record in records {
        if !seen.insert(record.id.as_str()) {
            continue;
        }
        summaries.push(summarize_experiment_document(record, status_field));
    }

    sort_summaries(&mut summaries);
    summaries
}

pub fn summarize_experiment_document(record: &Record, status_field: &str) -> ExperimentSummary {
    let mut summary = ExperimentSummary::new(record.id.clone());
    summary.status = record.get(status_field).and_then(coerce_string);
    summary.first_seen = first_timestamp(record, START_KEYS);
    summary.last_seen = first_timestamp(record, END_KEYS)
        .or(record.update_time)
        .or(summary.first_seen);
    summary.readings = READING_COUNT_KEYS
        .iter()
        .find_map(|key| record.get(key).and_then(coerce_i64))
        .and_then(|count| usize::try_from(count).ok());

    for key in STATION_KEYS.iter().chain(["stations"].iter()) {
        match record.get(key) {
            Some(Value::Array(items)) => {
                summary
                    .stations
                    .extend(items.iter().filter_map(coerce_string));
            }
            Some(value) => summary.stations.extend(coerce_string(value)),
            None => {}
        }
    }

    summary
}

/// Most recent first; experiments without any timestamp last, then by id.
pub fn sort_summaries(summaries: &mut [ExperimentSummary]) {
    summaries.sort_by(|a, b| match (a.last_seen, b.last_seen) {
        (Some(a_ts), Some(b_ts)) => b_ts.cmp(&a_ts).then_with(|| a.id.cmp(&b.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    });
}

pub fn is_recent(last_seen: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match (now - last_seen).to_std() {
        Ok(age) => age <= window,
        // 時鐘偏差：未來的時間戳視為最新
        Err(_) => true,
    }
}
