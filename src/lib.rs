pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use adapters::{FirestoreClient, MemorySource};
pub use app::pipelines::{ExportPipeline, ExportTarget};
pub use config::{cli::LocalStorage, toml_config::TomlConfig};
pub use crate::core::{etl::EtlEngine, store::ExperimentStore};
pub use utils::error::{Result, TelemetryError};
