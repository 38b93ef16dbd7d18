use crate::core::normalize::normalize_records_with;
use crate::core::store::ExperimentStore;
use crate::core::table::{build_table, to_csv};
use crate::domain::model::{Record, TransformResult};
use crate::domain::ports::{ConfigProvider, DocumentSource, Pipeline, Storage};
use crate::utils::error::{Result, TelemetryError};
use std::sync::Arc;

/// 匯出目標：單一實驗或單一站點
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    Experiment(String),
    Station { name: String, limit: Option<usize> },
}

impl ExportTarget {
    pub fn label(&self) -> &str {
        match self {
            ExportTarget::Experiment(id) => id,
            ExportTarget::Station { name, .. } => name,
        }
    }

    /// `<label>_data.csv`, with characters unsafe in file names replaced by `_`.
    pub fn file_name(&self) -> String {
        let safe: String = self
            .label()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}_data.csv", safe)
    }
}

pub struct ExportPipeline<S: Storage, D: DocumentSource, C: ConfigProvider> {
    storage: S,
    store: Arc<ExperimentStore<D>>,
    config: C,
    target: ExportTarget,
}

impl<S: Storage, D: DocumentSource, C: ConfigProvider> ExportPipeline<S, D, C> {
    pub fn new(storage: S, store: Arc<ExperimentStore<D>>, config: C, target: ExportTarget) -> Self {
        Self {
            storage,
            store,
            config,
            target,
        }
    }

    pub fn target(&self) -> &ExportTarget {
        &self.target
    }
}

#[async_trait::async_trait]
impl<S: Storage, D: DocumentSource, C: ConfigProvider> Pipeline for ExportPipeline<S, D, C> {
    async fn extract(&self) -> Result<Vec<Record>> {
        let records = match &self.target {
            ExportTarget::Experiment(id) => self.store.fetch_experiment_records(id, false).await?,
            ExportTarget::Station { name, limit } => {
                let limit = limit.unwrap_or_else(|| self.config.query_limit());
                self.store.fetch_station_records(name, limit).await?
            }
        };

        if records.is_empty() {
            return Err(TelemetryError::ExperimentNotFound {
                id: self.target.label().to_string(),
            });
        }

        tracing::info!("📥 Extracted {} documents for {}", records.len(), self.target.label());
        Ok(records)
    }

    async fn transform(&self, data: Vec<Record>) -> Result<TransformResult> {
        let options = match &self.target {
            ExportTarget::Experiment(_) => self.store.experiment_options(),
            ExportTarget::Station { .. } => self.store.station_options(),
        };
        let rows = normalize_records_with(&data, &options);
        let table = build_table(self.target.label(), rows);
        let csv_output = to_csv(&table)?;

        tracing::info!(
            "🔧 Normalized {} documents into {} rows ({} columns)",
            data.len(),
            table.len(),
            table.columns.len()
        );

        Ok(TransformResult { table, csv_output })
    }

    async fn load(&self, result: TransformResult) -> Result<String> {
        let file_name = self.target.file_name();
        let output_path = format!(
            "{}/{}",
            self.config.output_path().trim_end_matches('/'),
            file_name
        );

        tracing::debug!(
            "Writing {} bytes of CSV for {}",
            result.csv_output.len(),
            result.table.experiment_id
        );
        self.storage
            .write_file(&file_name, result.csv_output.as_bytes())
            .await?;

        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemorySource;
    use crate::config::toml_config::LayoutConfig;
    use crate::core::cache::QueryCache;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Clone)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        fn new() -> Self {
            Self {
                files: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned()
        }
    }

    impl Storage for MockStorage {
        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(path.to_string(), data.to_vec());
            Ok(())
        }
    }

    struct MockConfig {
        output_path: String,
        query_limit: usize,
    }

    impl ConfigProvider for MockConfig {
        fn output_path(&self) -> &str {
            &self.output_path
        }

        fn query_limit(&self) -> usize {
            self.query_limit
        }
    }

    fn mock_config() -> MockConfig {
        MockConfig {
            output_path: "test_output/".to_string(),
            query_limit: 2,
        }
    }

    fn store() -> Arc<ExperimentStore<MemorySource>> {
        let source = MemorySource::new().with_collection(
            "measurements",
            vec![
                Record::from_json("r1", json!({"experiment_id": "exp 1", "station": "S1", "timestamp": "2025-03-01T10:00:00Z", "weight": 5})),
                Record::from_json("r2", json!({"experiment_id": "exp 1", "station": "S1", "timestamp": "2025-03-01T10:00:10Z", "weight": 5.5})),
                Record::from_json("r3", json!({"experiment_id": "exp 2", "station": "S1", "timestamp": "2025-03-01T10:00:20Z", "weight": 7})),
            ],
        );
        Arc::new(ExperimentStore::new(
            source,
            LayoutConfig::default(),
            100,
            QueryCache::disabled(),
        ))
    }

    #[test]
    fn test_file_name_is_sanitized() {
        let target = ExportTarget::Experiment("exp 1/a".to_string());
        assert_eq!(target.file_name(), "exp_1_a_data.csv");
    }

    #[tokio::test]
    async fn test_extract_missing_experiment_is_not_found() {
        let pipeline = ExportPipeline::new(
            MockStorage::new(),
            store(),
            mock_config(),
            ExportTarget::Experiment("exp-404".to_string()),
        );

        let result = pipeline.extract().await;
        assert!(matches!(result, Err(TelemetryError::ExperimentNotFound { id }) if id == "exp-404"));
    }

    #[tokio::test]
    async fn test_transform_and_load_experiment() {
        let storage = MockStorage::new();
        let pipeline = ExportPipeline::new(
            storage.clone(),
            store(),
            mock_config(),
            ExportTarget::Experiment("exp 1".to_string()),
        );

        let records = pipeline.extract().await.unwrap();
        assert_eq!(records.len(), 2);

        let result = pipeline.transform(records).await.unwrap();
        assert_eq!(result.table.len(), 2);

        let output_path = pipeline.load(result).await.unwrap();
        assert_eq!(output_path, "test_output/exp_1_data.csv");

        let csv = String::from_utf8(storage.get_file("exp_1_data.csv").await.unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "weight,date,time,experimental_runtime,station,experiment_id,timestamp"
        );
        assert_eq!(
            lines[1],
            "5.0,2025-03-01,10:00:00,00:00:00,S1,exp 1,2025-03-01T10:00:00Z"
        );
        assert_eq!(
            lines[2],
            "5.5,2025-03-01,10:00:10,00:00:10,S1,exp 1,2025-03-01T10:00:10Z"
        );
    }

    #[tokio::test]
    async fn test_station_export_uses_config_limit() {
        let pipeline = ExportPipeline::new(
            MockStorage::new(),
            store(),
            mock_config(),
            ExportTarget::Station {
                name: "S1".to_string(),
                limit: None,
            },
        );

        let records = pipeline.extract().await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r2"]);
    }
}
