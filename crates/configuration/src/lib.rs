use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;
pub mod telemetry;

// Re-export the core types to provide a clean public API.
pub use settings::{
    Config, DatabaseSettings, Environment, LoggingSettings, RetrySettings, ServerSettings,
    TransactionSettings,
};

/// Prefix for environment overrides, e.g. `PLANTWATCH__SERVER__PORT=8080`.
pub const ENV_PREFIX: &str = "PLANTWATCH";

/// Loads the application configuration.
///
/// Sources are layered in increasing priority: built-in defaults, the optional
/// TOML file at `path`, `PLANTWATCH__*` environment variables and finally
/// `DATABASE_URL` (which may come from a `.env` file). The result is validated
/// before it is returned.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    // A missing .env file is normal in production.
    dotenvy::dotenv().ok();

    let file = config::File::from(path).required(false);
    let mut config = build_config(file)?;

    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database.url = url;
    }

    config.validate()?;
    Ok(config)
}

/// Layers a file source and the environment over the defaults.
fn build_config<S>(file: S) -> Result<Config, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let builder = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    // Attempt to deserialize the entire configuration into our `Config` struct
    let config = builder.try_deserialize::<Config>()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};
    use core_types::IsolationLevel;

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            environment = "production"

            [database]
            url = "postgres://plants@db/plants"
            max_connections = 5
            min_connections = 1
            acquire_timeout_secs = 3
            idle_timeout_secs = 60
            probe_timeout_ms = 250
            run_migrations = false

            [transaction]
            max_wait_ms = 1000
            timeout_ms = 2000
            isolation_level = "serializable"
        "#;
        let config = build_config(File::from_str(toml, FileFormat::Toml)).unwrap();

        assert!(config.environment.is_production());
        assert_eq!(config.database.max_connections, 5);
        assert!(!config.database.run_migrations);
        assert_eq!(config.transaction.isolation_level, IsolationLevel::Serializable);
        // Untouched sections keep their defaults.
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = build_config(File::from_str("", FileFormat::Toml)).unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.database.url.is_empty());
    }
}
