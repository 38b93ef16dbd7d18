use anyhow::Result;
use experiment_telemetry::{
    EtlEngine, ExperimentStore, ExportPipeline, ExportTarget, FirestoreClient, LocalStorage,
    TelemetryError, TomlConfig,
};
use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const RUN_QUERY_PATH: &str = "/v1/projects/water-capture/databases/(default)/documents:runQuery";

fn document(id: &str, fields: serde_json::Value) -> serde_json::Value {
    json!({
        "document": {
            "name": format!("projects/water-capture/databases/(default)/documents/measurements/{}", id),
            "fields": fields,
            "updateTime": "2025-04-01T12:00:00Z"
        },
        "readTime": "2025-04-01T12:00:00Z"
    })
}

fn config_for(server: &MockServer, output_path: &str) -> Result<TomlConfig> {
    let content = format!(
        r#"
[datastore]
project_id = "water-capture"
base_url = "{}"

[export]
output_path = "{}"
"#,
        server.base_url(),
        output_path.replace('\\', "/")
    );
    Ok(TomlConfig::from_toml_str(&content)?)
}

/// 從模擬的 Firestore 讀取實驗資料並匯出 CSV
#[tokio::test]
async fn test_export_experiment_from_firestore() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output_path = temp_dir.path().to_str().unwrap().to_string();

    let server = MockServer::start();
    let api_mock = server.mock(|when, then| {
        when.method(POST)
            .path(RUN_QUERY_PATH)
            .body_contains("\"fieldPath\":\"experiment_id\"")
            .body_contains("\"stringValue\":\"exp-42\"");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(json!([
                document("b", json!({
                    "experiment_id": {"stringValue": "exp-42"},
                    "timestamp": {"timestampValue": "2025-04-01T10:00:30Z"},
                    "weight": {"doubleValue": 251.5},
                    "sequence": {"integerValue": "2"},
                    "station": {"stringValue": "roof"}
                })),
                document("a", json!({
                    "experiment_id": {"stringValue": "exp-42"},
                    "timestamp": {"timestampValue": "2025-04-01T10:00:00Z"},
                    "weight": {"integerValue": "250"},
                    "sequence": {"integerValue": "1"},
                    "station": {"stringValue": "roof"},
                    "humidity": {"doubleValue": 81.0}
                }))
            ]));
    });

    let config = config_for(&server, &output_path)?;
    let client = FirestoreClient::from_config(&config.datastore)?;
    let store = Arc::new(ExperimentStore::from_config(client, &config));

    let storage = LocalStorage::new(output_path.clone());
    let pipeline = ExportPipeline::new(
        storage,
        store,
        config,
        ExportTarget::Experiment("exp-42".to_string()),
    );
    let engine = EtlEngine::new(pipeline);

    let written = engine.run().await?;
    api_mock.assert();
    assert!(written.ends_with("exp-42_data.csv"));

    let csv = std::fs::read_to_string(temp_dir.path().join("exp-42_data.csv"))?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "weight,date,time,experimental_runtime,sequence,station,experiment_id,humidity,timestamp"
    );
    assert_eq!(
        lines[1],
        "250.0,2025-04-01,10:00:00,00:00:00,1,roof,exp-42,81.0,2025-04-01T10:00:00Z"
    );
    assert_eq!(
        lines[2],
        "251.5,2025-04-01,10:00:30,00:00:30,2,roof,exp-42,,2025-04-01T10:00:30Z"
    );
    assert_eq!(lines.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_export_unknown_experiment_fails_without_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output_path = temp_dir.path().to_str().unwrap().to_string();

    let server = MockServer::start();
    let api_mock = server.mock(|when, then| {
        when.method(POST).path(RUN_QUERY_PATH);
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(json!([{"readTime": "2025-04-01T12:00:00Z"}]));
    });

    let config = config_for(&server, &output_path)?;
    let client = FirestoreClient::from_config(&config.datastore)?;
    let store = Arc::new(ExperimentStore::from_config(client, &config));
    let pipeline = ExportPipeline::new(
        LocalStorage::new(output_path.clone()),
        store,
        config,
        ExportTarget::Experiment("exp-missing".to_string()),
    );

    let result = EtlEngine::new(pipeline).run().await;

    api_mock.assert();
    let err = result.expect_err("export of an unknown experiment must fail");
    assert!(matches!(err, TelemetryError::ExperimentNotFound { .. }));
    assert_ne!(err.exit_code(), 0);
    assert!(!temp_dir.path().join("exp-missing_data.csv").exists());
    Ok(())
}

#[tokio::test]
async fn test_datastore_outage_is_reported() -> Result<()> {
    let server = MockServer::start();
    let api_mock = server.mock(|when, then| {
        when.method(POST).path(RUN_QUERY_PATH);
        then.status(500).body("internal");
    });

    let config = config_for(&server, "./unused")?;
    let client = FirestoreClient::from_config(&config.datastore)?;
    let store = ExperimentStore::from_config(client, &config);

    let result = store.list_experiments().await;

    api_mock.assert();
    let err = result.expect_err("outage should surface as an error");
    assert!(matches!(err, TelemetryError::DatastoreUnavailable { .. }));
    assert_eq!(err.exit_code(), 2);
    Ok(())
}

#[tokio::test]
async fn test_list_experiments_is_cached() -> Result<()> {
    let server = MockServer::start();
    let api_mock = server.mock(|when, then| {
        when.method(POST).path(RUN_QUERY_PATH);
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(json!([
                document("r1", json!({
                    "experiment_id": {"stringValue": "exp-1"},
                    "timestamp": {"timestampValue": "2025-04-01T10:00:00Z"}
                })),
                document("r2", json!({
                    "experiment_id": {"stringValue": "exp-2"},
                    "timestamp": {"timestampValue": "2025-04-02T10:00:00Z"}
                }))
            ]));
    });

    let config = config_for(&server, "./unused")?;
    let client = FirestoreClient::from_config(&config.datastore)?;
    let store = ExperimentStore::from_config(client, &config);

    let first = store.list_experiments().await?;
    let second = store.list_experiments().await?;

    api_mock.assert_hits(1);
    assert_eq!(first, second);
    assert_eq!(
        first.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
        vec!["exp-2", "exp-1"]
    );
    Ok(())
}
