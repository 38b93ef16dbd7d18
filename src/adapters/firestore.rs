//! Firestore REST adapter (`documents:runQuery`).

use crate::config::toml_config::DatastoreConfig;
use crate::domain::model::Record;
use crate::domain::ports::DocumentSource;
use crate::domain::query::Query;
use crate::utils::error::{Result, TelemetryError};
use crate::utils::validation::validate_required_field;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;

const ERROR_BODY_EXCERPT: usize = 300;

#[derive(Debug, Deserialize)]
struct RunQueryResponse {
    #[serde(default)]
    document: Option<FirestoreDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    update_time: Option<DateTime<Utc>>,
}

/// HTTP client 於第一次查詢時建立，之後重複使用
pub struct FirestoreClient {
    base_url: String,
    project_id: String,
    database: String,
    access_token: Option<String>,
    timeout: Duration,
    http: OnceCell<Client>,
}

impl FirestoreClient {
    pub fn new(base_url: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            database: "(default)".to_string(),
            access_token: None,
            timeout: Duration::from_secs(30),
            http: OnceCell::new(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &DatastoreConfig) -> Result<Self> {
        let project_id = validate_required_field("datastore.project_id", &config.project_id)?;

        let mut client = Self::new(&config.base_url, project_id.as_str())
            .with_database(&config.database)
            .with_timeout(config.timeout());
        if let Some(token) = config.access_token() {
            client = client.with_access_token(token);
        } else {
            tracing::debug!("No access token configured, sending unauthenticated requests");
        }
        Ok(client)
    }

    async fn http(&self) -> Result<&Client> {
        self.http
            .get_or_try_init(|| async {
                tracing::debug!("Initializing datastore client for project {}", self.project_id);
                Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(TelemetryError::from)
            })
            .await
    }

    pub fn documents_root(&self) -> String {
        format!(
            "{}/v1/projects/{}/databases/{}/documents",
            self.base_url, self.project_id, self.database
        )
    }

    pub fn run_query_url(&self, query: &Query) -> String {
        match &query.parent {
            Some(parent) => format!("{}/{}:runQuery", self.documents_root(), parent.trim_matches('/')),
            None => format!("{}:runQuery", self.documents_root()),
        }
    }
}

#[async_trait]
impl DocumentSource for FirestoreClient {
    async fn run_query(&self, query: &Query) -> Result<Vec<Record>> {
        let url = self.run_query_url(query);
        let body = json!({ "structuredQuery": structured_query(query) });

        let mut request = self.http().await?.post(&url).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        tracing::debug!("POST {}", url);
        let response = request
            .send()
            .await
            .map_err(|e| TelemetryError::datastore(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(ERROR_BODY_EXCERPT).collect();
            return Err(TelemetryError::datastore(format!(
                "runQuery returned HTTP {}: {}",
                status,
                excerpt.trim()
            )));
        }

        let results: Vec<RunQueryResponse> = response.json().await.map_err(|e| {
            TelemetryError::datastore(format!("unexpected runQuery response: {}", e))
        })?;

        Ok(results
            .into_iter()
            .filter_map(|result| result.document)
            .map(into_record)
            .collect())
    }
}

fn into_record(document: FirestoreDocument) -> Record {
    let id = document
        .name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    let data: HashMap<String, Value> = document
        .fields
        .iter()
        .map(|(key, value)| (key.clone(), decode_value(value)))
        .collect();

    Record {
        id,
        update_time: document.update_time,
        data,
    }
}

/// Builds the `structuredQuery` body for a [`Query`].
pub fn structured_query(query: &Query) -> Value {
    let mut structured = Map::new();
    structured.insert(
        "from".to_string(),
        json!([{ "collectionId": query.collection }]),
    );

    let filters: Vec<Value> = query
        .filters
        .iter()
        .map(|filter| {
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": field_path(&filter.field) },
                    "op": "EQUAL",
                    "value": encode_value(&filter.value),
                }
            })
        })
        .collect();

    match filters.len() {
        0 => {}
        1 => {
            structured.insert("where".to_string(), filters.into_iter().next().unwrap_or_default());
        }
        _ => {
            structured.insert(
                "where".to_string(),
                json!({ "compositeFilter": { "op": "AND", "filters": filters } }),
            );
        }
    }

    if let Some(order) = &query.order_by {
        structured.insert(
            "orderBy".to_string(),
            json!([{
                "field": { "fieldPath": field_path(&order.field) },
                "direction": order.direction.as_str(),
            }]),
        );
    }

    if let Some(limit) = query.limit {
        structured.insert("limit".to_string(), json!(limit));
    }

    Value::Object(structured)
}

/// Field names outside `[A-Za-z_][A-Za-z0-9_]*` must be backtick-quoted.
fn field_path(field: &str) -> String {
    let simple = field
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if simple {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

/// 將 Firestore 的型別化值轉成一般 JSON
pub fn decode_value(value: &Value) -> Value {
    let Value::Object(typed) = value else {
        return value.clone();
    };
    let Some((kind, inner)) = typed.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => inner.clone(),
        "integerValue" => match inner {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or_else(|_| inner.clone()),
            other => other.clone(),
        },
        "doubleValue" => match inner {
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            other => other.clone(),
        },
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "geoPointValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(|fields| {
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), decode_value(v)))
                        .collect()
                })
                .unwrap_or_default(),
        ),
        _ => value.clone(),
    }
}
