use clap::{Parser, Subcommand};
use configuration::{Config, Environment, load_config, telemetry::init_tracing};
use database::{ConnectionManager, PlantRepository, RetryPolicy, SeedOptions, TransactionEnvelope};
use health::HealthAggregator;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use web_server::AppState;

/// The main entry point for the Plantwatch backend.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(environment) = cli.environment {
        config.environment = environment;
    }

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = match init_tracing(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Plant monitoring backend: REST API over PostgreSQL with health reporting.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Missing files are ignored.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides the configured environment.
    #[arg(long, value_enum)]
    environment: Option<Environment>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API.
    Serve,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Run a single health check, print it as JSON and exit non-zero when unhealthy.
    Health,
    /// Insert sample plants with soil readings.
    Seed(SeedArgs),
}

#[derive(Parser)]
struct SeedArgs {
    /// Delete all existing plants and soil data first.
    #[arg(long)]
    clear: bool,

    /// Required together with `--clear`.
    #[arg(long)]
    confirm_clear: bool,
}

impl From<&SeedArgs> for SeedOptions {
    fn from(args: &SeedArgs) -> Self {
        SeedOptions {
            clear_existing: args.clear,
            confirm_clear: args.confirm_clear,
        }
    }
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn run(command: Commands, config: Config) -> anyhow::Result<ExitCode> {
    let manager = Arc::new(ConnectionManager::new(config.database.clone(), config.environment));

    let result = match command {
        Commands::Serve => serve(&config, manager.clone()).await,
        Commands::Migrate => migrate(&manager).await,
        Commands::Health => check_health(manager.clone()).await,
        Commands::Seed(args) => seed(&config, manager.clone(), SeedOptions::from(&args)).await,
    };

    // Every exit path releases the pool.
    manager.stop().await;
    result
}

async fn serve(config: &Config, manager: Arc<ConnectionManager>) -> anyhow::Result<ExitCode> {
    tracing::info!(environment = ?config.environment, "Starting plantwatch");
    manager.start().await?;

    let state = Arc::new(AppState {
        health: HealthAggregator::new(manager.clone()),
        plants: plant_repository(config, manager),
    });

    web_server::run_server(&config.server, state, shutdown_signal()).await?;
    Ok(ExitCode::SUCCESS)
}

async fn seed(
    config: &Config,
    manager: Arc<ConnectionManager>,
    options: SeedOptions,
) -> anyhow::Result<ExitCode> {
    // Refuse before connecting, not after.
    if options.clear_existing && !options.confirm_clear {
        return Err(database::DbError::ClearNotConfirmed.into());
    }
    manager.start().await?;

    let summary = database::seed(&plant_repository(config, manager), options).await?;
    let report = serde_json::json!({
        "clearedPlants": summary.cleared_plants,
        "clearedSoilReadings": summary.cleared_soil_readings,
        "plants": summary.plants,
        "soilReadings": summary.soil_readings,
    });
    println!("{}", report);
    Ok(ExitCode::SUCCESS)
}

fn plant_repository(config: &Config, manager: Arc<ConnectionManager>) -> PlantRepository {
    PlantRepository::new(
        manager,
        RetryPolicy::from_settings(&config.retry),
        TransactionEnvelope::from_settings(&config.transaction),
    )
}

async fn migrate(manager: &ConnectionManager) -> anyhow::Result<ExitCode> {
    manager.connect().await?;
    manager.run_migrations().await?;
    Ok(ExitCode::SUCCESS)
}

/// Unlike `serve`, a failed connect is reported in the snapshot rather than aborting.
async fn check_health(manager: Arc<ConnectionManager>) -> anyhow::Result<ExitCode> {
    if let Err(e) = manager.connect().await {
        tracing::warn!(error = %e, "Could not connect to the database");
    }

    let snapshot = HealthAggregator::new(manager).check_health().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(if snapshot.is_healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
