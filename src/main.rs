use clap::Parser;
use experiment_telemetry::app::commands;
use experiment_telemetry::domain::ports::DocumentSource;
use experiment_telemetry::utils::{logger, validation::Validate};
use experiment_telemetry::{
    CliConfig, Command, EtlEngine, ExperimentStore, ExportPipeline, ExportTarget, FirestoreClient,
    LocalStorage, MemorySource, TelemetryError, TomlConfig,
};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting experiment-telemetry");
    tracing::debug!("CLI config: {:?}", cli);

    if let Err(e) = run(&cli).await {
        tracing::error!(
            "❌ {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        std::process::exit(e.exit_code());
    }
}

async fn run(cli: &CliConfig) -> Result<(), TelemetryError> {
    let config = cli.load_config()?;
    config.validate()?;
    tracing::debug!("Layout: {:?}", config.layout);

    let source: Arc<dyn DocumentSource> = match &cli.fixture {
        Some(path) => Arc::new(MemorySource::from_file(path).await?),
        None => Arc::new(FirestoreClient::from_config(&config.datastore)?),
    };
    let store = Arc::new(ExperimentStore::from_config(source, &config));

    match &cli.command {
        Command::Status => println!("{}", commands::status(store.as_ref()).await?),
        Command::List => println!("{}", commands::list(store.as_ref()).await?),
        Command::Show { id, realtime, tail } => {
            println!("{}", commands::show(store.as_ref(), id.as_deref(), *realtime, *tail).await?)
        }
        Command::Export { id, .. } => {
            export(cli, config, store, ExportTarget::Experiment(id.clone())).await?
        }
        Command::Station { name, limit, .. } => {
            let target = ExportTarget::Station {
                name: name.clone(),
                limit: *limit,
            };
            export(cli, config, store, target).await?
        }
    }

    Ok(())
}

async fn export(
    cli: &CliConfig,
    config: TomlConfig,
    store: Arc<ExperimentStore<Arc<dyn DocumentSource>>>,
    target: ExportTarget,
) -> Result<(), TelemetryError> {
    if cli.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let storage = LocalStorage::new(config.export.output_path.clone());
    let pipeline = ExportPipeline::new(storage, store, config, target);
    let engine = EtlEngine::new_with_monitoring(pipeline, cli.monitor);

    let output_path = engine.run().await?;
    println!("✅ Export completed successfully!");
    println!("📁 Output saved to: {}", output_path);
    Ok(())
}
