use crate::domain::model::Record;
use crate::domain::ports::DocumentSource;
use crate::domain::query::{Direction, Query};
use crate::utils::error::{Result, TelemetryError};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

/// 以記憶體中的集合回應查詢 (離線 fixture 與測試用)
///
/// Collections are keyed by their full path, e.g. `measurements` or
/// `experiments/exp-1/readings`. Query semantics follow the datastore:
/// equality filters, documents lacking the order field are excluded from an
/// ordered query, then the limit applies.
#[derive(Debug, Default)]
pub struct MemorySource {
    collections: HashMap<String, Vec<Record>>,
    queries: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, path: impl Into<String>, records: Vec<Record>) -> Self {
        self.collections.entry(path.into()).or_default().extend(records);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, record: Record) {
        self.collections.entry(path.into()).or_default().push(record);
    }

    /// Parses `{ "<collection path>": [ { "id": "...", ...fields } ] }`.
    ///
    /// Documents without an `id` are numbered by position.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let parsed: HashMap<String, Vec<Value>> = serde_json::from_str(content)?;
        let mut source = Self::new();

        for (path, documents) in parsed {
            for (index, document) in documents.into_iter().enumerate() {
                let Value::Object(mut fields) = document else {
                    return Err(TelemetryError::ProcessingError {
                        message: format!("fixture entry {} in '{}' is not an object", index, path),
                    });
                };
                let id = fields
                    .remove("id")
                    .and_then(|id| crate::core::discovery::experiment_key(Some(&id)))
                    .unwrap_or_else(|| index.to_string());
                source.insert(path.clone(), Record::new(id, fields.into_iter().collect()));
            }
        }

        Ok(source)
    }

    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(&path).await?;
        let source = Self::from_json_str(&content)?;
        tracing::info!(
            "🧪 Loaded fixture {} ({} collections)",
            path.as_ref().display(),
            source.collections.len()
        );
        Ok(source)
    }

    /// Number of queries answered so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn run_query(&self, query: &Query) -> Result<Vec<Record>> {
        self.queries.fetch_add(1, AtomicOrdering::SeqCst);

        let Some(documents) = self.collections.get(&query.collection_path()) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<Record> = documents
            .iter()
            .filter(|record| {
                query.filters.iter().all(|filter| {
                    record
                        .get(&filter.field)
                        .is_some_and(|value| values_equal(value, &filter.value))
                })
            })
            .cloned()
            .collect();

        if let Some(order) = &query.order_by {
            matched.retain(|record| record.data.contains_key(&order.field));
            matched.sort_by(|a, b| {
                let ordering = compare_values(&a.data[&order.field], &b.data[&order.field]);
                match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Cross-type order: null < bool < number < string < everything else.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(f64::NAN)
            .total_cmp(&y.as_f64().unwrap_or(f64::NAN)),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
