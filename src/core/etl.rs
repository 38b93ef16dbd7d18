use crate::domain::ports::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self) -> Result<String> {
        tracing::info!("🚀 Starting export");
        self.monitor.log_stats("Start");

        let raw_data = self.pipeline.extract().await?;
        self.monitor.log_stats("Extract");

        let transformed = self.pipeline.transform(raw_data).await?;
        tracing::info!(
            "Transformed {} rows for {}",
            transformed.table.len(),
            transformed.table.experiment_id
        );
        self.monitor.log_stats("Transform");

        let output_path = self.pipeline.load(transformed).await?;
        self.monitor.log_stats("Load");
        self.monitor.log_final_stats();

        tracing::info!("📁 Output saved to: {}", output_path);
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::build_table;
    use crate::domain::model::{Record, TransformResult};
    use crate::utils::error::TelemetryError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubPipeline {
        fail_extract: bool,
        loads: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Pipeline for StubPipeline {
        async fn extract(&self) -> Result<Vec<Record>> {
            if self.fail_extract {
                return Err(TelemetryError::datastore("offline"));
            }
            Ok(vec![Record::default()])
        }

        async fn transform(&self, data: Vec<Record>) -> Result<TransformResult> {
            Ok(TransformResult {
                table: build_table("stub", Vec::new()),
                csv_output: format!("{} records", data.len()),
            })
        }

        async fn load(&self, _result: TransformResult) -> Result<String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok("out/stub_data.csv".to_string())
        }
    }

    #[tokio::test]
    async fn test_run_returns_output_path() {
        let engine = EtlEngine::new(StubPipeline {
            fail_extract: false,
            loads: AtomicUsize::new(0),
        });

        assert_eq!(engine.run().await.unwrap(), "out/stub_data.csv");
        assert_eq!(engine.pipeline.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_extract_failure_stops_run() {
        let engine = EtlEngine::new_with_monitoring(
            StubPipeline {
                fail_extract: true,
                loads: AtomicUsize::new(0),
            },
            true,
        );

        let result = engine.run().await;
        assert!(matches!(result, Err(TelemetryError::DatastoreUnavailable { .. })));
        assert_eq!(engine.pipeline.loads.load(Ordering::SeqCst), 0);
    }
}
