use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// 遠端資料庫中的一份原始文件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    pub data: HashMap<String, serde_json::Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            id: id.into(),
            update_time: None,
            data,
        }
    }

    /// Builds a record from a JSON object; non-object values yield an empty record.
    pub fn from_json(id: impl Into<String>, value: serde_json::Value) -> Self {
        let data = match value {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Self::new(id, data)
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

/// 正規化後的一列資料
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Row {
    pub document_id: String,
    pub weight: Option<f64>,
    pub date: Option<String>,
    pub time: Option<String>,
    /// Seconds since the experiment started.
    pub experimental_runtime: Option<f64>,
    pub sequence: Option<i64>,
    pub station: Option<String>,
    #[serde(skip)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub update_time: Option<DateTime<Utc>>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSummary {
    pub id: String,
    /// Unknown for layouts that store readings outside the experiment document.
    pub readings: Option<usize>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub stations: BTreeSet<String>,
    pub status: Option<String>,
}

impl ExperimentSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            readings: None,
            first_seen: None,
            last_seen: None,
            stations: BTreeSet::new(),
            status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentTable {
    pub experiment_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ExperimentTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone)]
pub struct TransformResult {
    pub table: ExperimentTable,
    pub csv_output: String,
}
