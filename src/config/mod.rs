pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use toml_config::TomlConfig;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "experiment-telemetry")]
#[command(about = "Experiment telemetry loader with CSV export")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Read documents from a JSON fixture instead of the datastore
    #[arg(long, global = true)]
    pub fixture: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log CPU and memory usage per export phase
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Show the running experiment, or the number of stored experiments
    Status,

    /// List experiments, most recent first
    List,

    /// Summarize an experiment (defaults to the running one)
    Show {
        id: Option<String>,

        /// Skip the query cache
        #[arg(long)]
        realtime: bool,

        /// Number of trailing rows to print
        #[arg(long, default_value = "10")]
        tail: usize,
    },

    /// Write an experiment's readings to `<id>_data.csv`
    Export {
        id: String,

        #[arg(long)]
        output_path: Option<String>,
    },

    /// Write the newest readings of one station to `<station>_data.csv`
    Station {
        name: String,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        output_path: Option<String>,
    },
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 載入配置檔 (未指定時使用預設值)，並套用環境變數與命令列覆蓋
    pub fn load_config(&self) -> Result<TomlConfig> {
        let mut config = match &self.config {
            Some(path) => {
                tracing::info!("📁 Loading configuration from: {}", path);
                TomlConfig::from_file(path)?
            }
            None => TomlConfig::default(),
        };

        config.apply_env_overrides();

        match &self.command {
            Command::Export {
                output_path: Some(path),
                ..
            }
            | Command::Station {
                output_path: Some(path),
                ..
            } => {
                tracing::info!("🔧 Output path overridden to: {}", path);
                config.export.output_path = path.clone();
            }
            _ => {}
        }

        Ok(config)
    }
}
