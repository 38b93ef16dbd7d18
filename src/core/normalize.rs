//! Record → row normalization.
//!
//! Remote documents are loosely shaped: the same quantity shows up under
//! different keys and as numbers, numeric strings, clock strings or epoch
//! values. Everything here resolves those variants into [`Row`]s with a
//! canonical time axis.

use crate::domain::model::{Record, Row};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

pub const PREFERRED_COLUMNS: [&str; 6] = [
    "weight",
    "date",
    "time",
    "experimental_runtime",
    "sequence",
    "station",
];

// 第一個鍵為標準欄位名稱
const WEIGHT_KEYS: &[&str] = &["weight", "weight_g", "mass"];
const DATE_KEYS: &[&str] = &["date"];
const TIME_KEYS: &[&str] = &["time"];
const RUNTIME_KEYS: &[&str] = &[
    "experimental_runtime",
    "runtime",
    "elapsed",
    "elapsed_s",
    "elapsed_seconds",
];
const SEQUENCE_KEYS: &[&str] = &["sequence", "seq", "sequence_number", "index"];
pub(crate) const STATION_KEYS: &[&str] = &["station", "station_id", "device"];
pub(crate) const TIMESTAMP_KEYS: &[&str] = &["timestamp", "ts", "created_at", "recorded_at"];

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Options for normalizing the readings of one load.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Configured time field, read before the timestamp aliases.
    pub time_field: Option<String>,
    /// Field naming the experiment of a reading. Repeated sequence numbers
    /// only collapse within one experiment and station.
    pub experiment_field: Option<String>,
    /// Station loads mix runs that each restart their sequence, so they
    /// deduplicate by document id only.
    pub dedupe_sequences: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            time_field: None,
            experiment_field: None,
            dedupe_sequences: true,
        }
    }
}

impl NormalizeOptions {
    pub fn with_time_field(mut self, field: impl Into<String>) -> Self {
        self.time_field = Some(field.into());
        self
    }

    pub fn with_experiment_field(mut self, field: impl Into<String>) -> Self {
        self.experiment_field = Some(field.into());
        self
    }

    pub fn without_sequence_dedupe(mut self) -> Self {
        self.dedupe_sequences = false;
        self
    }
}

pub fn normalize_record(record: &Record) -> Row {
    normalize_record_with(record, None)
}

/// Normalizes one record, taking the canonical time from `time_field` when it
/// parses and from the timestamp aliases otherwise.
pub fn normalize_record_with(record: &Record, time_field: Option<&str>) -> Row {
    let mut extra: BTreeMap<String, Value> = record
        .data
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let weight = take_first(&mut extra, WEIGHT_KEYS, coerce_f64);
    let experimental_runtime = take_first(&mut extra, RUNTIME_KEYS, coerce_runtime);
    let sequence = take_first(&mut extra, SEQUENCE_KEYS, coerce_i64);
    let station = take_first(&mut extra, STATION_KEYS, coerce_string);
    let date = take_first(&mut extra, DATE_KEYS, coerce_string);
    let time = take_first(&mut extra, TIME_KEYS, coerce_string);

    // 時間戳欄位保留在 extra，但統一輸出為 RFC 3339
    let aliases = TIMESTAMP_KEYS.iter().copied().filter(|key| Some(*key) != time_field);
    let mut timestamp = None;
    for key in time_field.into_iter().chain(aliases) {
        if !extra.contains_key(key) {
            continue;
        }
        if let Some(parsed) = record.get(key).and_then(coerce_timestamp) {
            extra.insert(
                key.to_string(),
                Value::String(parsed.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            );
            if timestamp.is_none() {
                timestamp = Some(parsed);
            }
        }
    }

    if timestamp.is_none() {
        timestamp = combine_date_time(date.as_deref(), time.as_deref());
    }

    let date = date.or_else(|| timestamp.map(|ts| ts.format("%Y-%m-%d").to_string()));
    let time = time.or_else(|| timestamp.map(|ts| ts.format("%H:%M:%S").to_string()));

    Row {
        document_id: record.id.clone(),
        weight,
        date,
        time,
        experimental_runtime,
        sequence,
        station,
        timestamp,
        update_time: record.update_time,
        extra,
    }
}

/// Normalizes the records of one experiment into an ordered, deduplicated row set.
pub fn normalize_records(records: &[Record]) -> Vec<Row> {
    normalize_records_with(records, &NormalizeOptions::default())
}

pub fn normalize_records_with(records: &[Record], options: &NormalizeOptions) -> Vec<Row> {
    let mut seen_ids = HashSet::new();
    let mut rows: Vec<Row> = Vec::with_capacity(records.len());
    let mut by_sequence: HashMap<SequenceKey, usize> = HashMap::new();
    let mut duplicates = 0usize;

    for record in records {
        if !seen_ids.insert(record.id.as_str()) {
            duplicates += 1;
            continue;
        }

        let row = normalize_record_with(record, options.time_field.as_deref());

        if let Some(key) = sequence_key(record, &row, options) {
            if let Some(&index) = by_sequence.get(&key) {
                duplicates += 1;
                let newer = match (row.update_time, rows[index].update_time) {
                    (Some(candidate), Some(existing)) => candidate > existing,
                    _ => false,
                };
                if newer {
                    rows[index] = row;
                }
                continue;
            }
            by_sequence.insert(key, rows.len());
        }

        rows.push(row);
    }

    if duplicates > 0 {
        tracing::debug!("Dropped {} duplicate readings", duplicates);
    }

    derive_runtime(&mut rows);
    rows.sort_by(compare_rows);
    rows
}

/// (experiment, station, sequence)
type SequenceKey = (Option<String>, Option<String>, i64);

fn sequence_key(record: &Record, row: &Row, options: &NormalizeOptions) -> Option<SequenceKey> {
    if !options.dedupe_sequences {
        return None;
    }
    let sequence = row.sequence?;
    let experiment = options
        .experiment_field
        .as_deref()
        .and_then(|field| record.get(field))
        .and_then(coerce_string);
    Some((experiment, row.station.clone(), sequence))
}

/// Fills missing runtimes from the distance to the earliest timestamp in the set.
fn derive_runtime(rows: &mut [Row]) {
    let Some(origin) = rows.iter().filter_map(|row| row.timestamp).min() else {
        return;
    };

    for row in rows.iter_mut() {
        if row.experimental_runtime.is_none() {
            if let Some(ts) = row.timestamp {
                row.experimental_runtime = Some((ts - origin).num_milliseconds() as f64 / 1000.0);
            }
        }
    }
}

fn compare_rows(a: &Row, b: &Row) -> Ordering {
    cmp_present_first(&a.timestamp, &b.timestamp, Ord::cmp)
        .then_with(|| {
            cmp_present_first(&a.experimental_runtime, &b.experimental_runtime, f64::total_cmp)
        })
        .then_with(|| cmp_present_first(&a.sequence, &b.sequence, Ord::cmp))
        .then_with(|| a.document_id.cmp(&b.document_id))
}

fn cmp_present_first<T>(a: &Option<T>, b: &Option<T>, cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Removes the first alias that coerces and returns its value.
///
/// Aliases that fail to coerce stay in `extra`, so a raw canonical value
/// such as `weight: "n/a"` is still exported under its column.
fn take_first<T>(
    extra: &mut BTreeMap<String, Value>,
    keys: &[&str],
    coerce: fn(&Value) -> Option<T>,
) -> Option<T> {
    for key in keys {
        if let Some(parsed) = extra.get(*key).and_then(coerce) {
            extra.remove(*key);
            return Some(parsed);
        }
    }

    if let Some(raw) = extra.get(keys[0]) {
        tracing::debug!("Keeping unparseable {} value as is: {}", keys[0], raw);
    }

    None
}

pub fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

pub fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Runtime in seconds from a number, a numeric string, or a clock string.
///
/// Accepted clock forms: `HH:MM:SS[.fff]`, `MM:SS`, and a leading day count as
/// in `1 day, 02:00:00` or `0 days 00:01:05`.
pub fn coerce_runtime(value: &Value) -> Option<f64> {
    match value {
        Value::Number(_) => coerce_f64(value),
        Value::String(s) => parse_clock(s.trim()),
        _ => None,
    }
}

fn parse_clock(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(seconds) = s.parse::<f64>() {
        return seconds.is_finite().then_some(seconds);
    }

    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest.trim()),
        None => (false, s),
    };

    let (days, clock) = match s.find("day") {
        Some(pos) => {
            let days: f64 = s[..pos].trim().parse().ok()?;
            let rest = s[pos..]
                .trim_start_matches("days")
                .trim_start_matches("day")
                .trim_start_matches(',')
                .trim();
            (days, rest)
        }
        None => (0.0, s),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (h.parse::<f64>().ok()?, m.parse::<f64>().ok()?, s.parse::<f64>().ok()?),
        [m, s] => (0.0, m.parse::<f64>().ok()?, s.parse::<f64>().ok()?),
        [""] if days > 0.0 => (0.0, 0.0, 0.0),
        _ => return None,
    };

    if minutes >= 60.0 || seconds >= 60.0 || hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }

    let total = days * 86_400.0 + hours * 3_600.0 + minutes * 60.0 + seconds;
    Some(if negative { -total } else { total })
}

/// Timestamp from RFC 3339, naive `YYYY-MM-DD[ T]HH:MM:SS[.fff]` (UTC),
/// epoch seconds or milliseconds, or an exported `{seconds|_seconds, nanos}` map.
pub fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(coerce_i64)?;
            let nanos = map
                .get("nanos")
                .or_else(|| map.get("nanoseconds"))
                .or_else(|| map.get("_nanoseconds"))
                .and_then(coerce_i64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, u32::try_from(nanos).ok()?).single()
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    s.parse::<f64>().ok().and_then(from_epoch)
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value > EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

fn combine_date_time(date: Option<&str>, time: Option<&str>) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date?, "%Y-%m-%d").ok()?;
    let time = time?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
        .ok()?;
    Some(date.and_time(time).and_utc())
}

/// 從任一時間欄位取得文件的時間 (用於實驗彙總)
pub fn first_timestamp(record: &Record, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter()
        .find_map(|key| record.get(key).and_then(coerce_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, value: Value) -> Record {
        Record::from_json(id, value)
    }

    #[test]
    fn test_weight_is_kept_under_weight() {
        let row = normalize_record(&record("r1", json!({"weight": 12.5})));
        assert_eq!(row.weight, Some(12.5));
        assert!(row.extra.is_empty());
    }

    #[test]
    fn test_aliases_and_string_numbers() {
        let row = normalize_record(&record(
            "r1",
            json!({
                "weight_g": "41.25",
                "seq": "7",
                "station_id": 3,
                "elapsed": "00:02:05",
                "humidity": 55
            }),
        ));

        assert_eq!(row.weight, Some(41.25));
        assert_eq!(row.sequence, Some(7));
        assert_eq!(row.station.as_deref(), Some("3"));
        assert_eq!(row.experimental_runtime, Some(125.0));
        assert_eq!(row.extra.get("humidity"), Some(&json!(55)));
        assert!(!row.extra.contains_key("weight_g"));
    }

    #[test]
    fn test_unparseable_canonical_field_passes_through() {
        let row = normalize_record(&record("r1", json!({"weight": "n/a", "mass": 3})));
        assert_eq!(row.weight, Some(3.0));
        assert!(!row.extra.contains_key("mass"));

        let row = normalize_record(&record("r2", json!({"weight": "n/a", "humidity": 3})));
        assert_eq!(row.weight, None);
        assert_eq!(row.extra.get("weight"), Some(&json!("n/a")));
        assert_eq!(row.extra.get("humidity"), Some(&json!(3)));
    }

    #[test]
    fn test_configured_time_field_comes_first() {
        let data = json!({
            "measured_at": "2025-04-01T10:00:00Z",
            "created_at": "2025-04-01T09:00:00Z",
            "weight": 2
        });

        let row = normalize_record_with(&record("r1", data.clone()), Some("measured_at"));
        assert_eq!(row.timestamp, Some(Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap()));
        assert_eq!(row.time.as_deref(), Some("10:00:00"));
        assert_eq!(row.extra.get("measured_at"), Some(&json!("2025-04-01T10:00:00Z")));

        let row = normalize_record(&record("r1", data));
        assert_eq!(row.time.as_deref(), Some("09:00:00"));
    }

    #[test]
    fn test_configured_time_field_drives_runtime() {
        let records = vec![
            record("b", json!({"measured_at": 1_743_501_630, "weight": 2})),
            record("a", json!({"measured_at": 1_743_501_600, "weight": 1})),
        ];
        let options = NormalizeOptions::default().with_time_field("measured_at");

        let rows = normalize_records_with(&records, &options);

        assert_eq!(rows[0].document_id, "a");
        assert_eq!(rows[0].experimental_runtime, Some(0.0));
        assert_eq!(rows[1].experimental_runtime, Some(30.0));
        assert!(rows[0].date.is_some());
    }

    #[test]
    fn test_date_and_time_derived_from_timestamp() {
        let row = normalize_record(&record(
            "r1",
            json!({"timestamp": "2025-03-04T05:06:07+02:00", "weight": 1}),
        ));

        assert_eq!(row.date.as_deref(), Some("2025-03-04"));
        assert_eq!(row.time.as_deref(), Some("03:06:07"));
        assert_eq!(row.extra.get("timestamp"), Some(&json!("2025-03-04T03:06:07Z")));
    }

    #[test]
    fn test_timestamp_from_date_and_time() {
        let row = normalize_record(&record("r1", json!({"date": "2025-01-02", "time": "10:11:12"})));
        let expected = Utc.with_ymd_and_hms(2025, 1, 2, 10, 11, 12).unwrap();
        assert_eq!(row.timestamp, Some(expected));
        assert_eq!(row.date.as_deref(), Some("2025-01-02"));
    }

    #[test]
    fn test_epoch_timestamps() {
        let seconds = coerce_timestamp(&json!(1_700_000_000)).unwrap();
        let millis = coerce_timestamp(&json!(1_700_000_000_000i64)).unwrap();
        assert_eq!(seconds, millis);

        let exported = coerce_timestamp(&json!({"_seconds": 1_700_000_000, "_nanoseconds": 0})).unwrap();
        assert_eq!(exported, seconds);
    }

    #[test]
    fn test_clock_formats() {
        assert_eq!(parse_clock("01:00:30"), Some(3630.0));
        assert_eq!(parse_clock("02:30"), Some(150.0));
        assert_eq!(parse_clock("0 days 00:01:05"), Some(65.0));
        assert_eq!(parse_clock("1 day, 2:00:00"), Some(93_600.0));
        assert_eq!(parse_clock("12.5"), Some(12.5));
        assert_eq!(parse_clock("00:75:00"), None);
        assert_eq!(parse_clock("soon"), None);
    }

    #[test]
    fn test_runtime_derived_and_rows_sorted() {
        let records = vec![
            record("b", json!({"timestamp": "2025-01-01T00:00:10Z", "weight": 2})),
            record("a", json!({"timestamp": "2025-01-01T00:00:00Z", "weight": 1})),
            record("c", json!({"weight": 3})),
        ];

        let rows = normalize_records(&records);

        let ids: Vec<&str> = rows.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(rows[0].experimental_runtime, Some(0.0));
        assert_eq!(rows[1].experimental_runtime, Some(10.0));
        assert_eq!(rows[2].experimental_runtime, None);
    }

    #[test]
    fn test_explicit_runtime_is_not_overwritten() {
        let records = vec![
            record("a", json!({"timestamp": "2025-01-01T00:00:00Z", "experimental_runtime": 600})),
            record("b", json!({"timestamp": "2025-01-01T00:01:00Z"})),
        ];

        let rows = normalize_records(&records);
        assert_eq!(rows[0].experimental_runtime, Some(600.0));
        assert_eq!(rows[1].experimental_runtime, Some(60.0));
    }

    #[test]
    fn test_duplicate_ids_and_sequences_collapse() {
        let mut newer = record("r3", json!({"sequence": 1, "weight": 9.5}));
        newer.update_time = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap());
        let mut older = record("r1", json!({"sequence": 1, "weight": 9.0}));
        older.update_time = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());

        let records = vec![
            older.clone(),
            older,
            record("r2", json!({"sequence": 2, "weight": 10.0})),
            newer,
        ];

        let rows = normalize_records(&records);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sequence, Some(1));
        assert_eq!(rows[0].weight, Some(9.5));
        assert_eq!(rows[0].document_id, "r3");
        assert_eq!(rows[1].sequence, Some(2));
    }

    #[test]
    fn test_sequences_only_collapse_within_one_experiment_and_station() {
        let records = vec![
            record("a1", json!({"experiment_id": "exp-a", "station": "S1", "sequence": 1, "weight": 1.0})),
            record("b1", json!({"experiment_id": "exp-b", "station": "S1", "sequence": 1, "weight": 2.0})),
            record("c1", json!({"experiment_id": "exp-a", "station": "S2", "sequence": 1, "weight": 3.0})),
            record("a1-copy", json!({"experiment_id": "exp-a", "station": "S1", "sequence": 1, "weight": 1.0})),
        ];
        let options = NormalizeOptions::default().with_experiment_field("experiment_id");

        let rows = normalize_records_with(&records, &options);
        let ids: Vec<&str> = rows.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b1", "c1"]);

        let rows = normalize_records_with(&records, &options.without_sequence_dedupe());
        assert_eq!(rows.len(), 4);
    }
}
