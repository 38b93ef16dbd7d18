pub mod export_pipeline;

pub use export_pipeline::{ExportPipeline, ExportTarget};
