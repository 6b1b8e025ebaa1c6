//! Configuration management for the seed warehouse server
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with SEMENTES__ prefix
//! 4. The flat deployment variables (DB_HOST, SESSION_SECRET, ...)

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Session token verification and idle logout
    pub session: SessionConfig,

    /// Photo blob storage
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,

    /// Requests running longer than this are aborted and their transaction rolled back
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Run embedded migrations on start-up outside development too
    pub run_migrations: bool,
}

impl DatabaseConfig {
    /// Connection options built field by field; credentials are never spliced into a URL
    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.name);
        if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Shared secret of the auth service; verifies bearer tokens and keys history checksums
    pub secret: String,

    /// Idle time before the client logs the operator out
    pub auto_logout_delay_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding photo blobs
    pub photo_dir: String,

    /// Largest accepted photo upload
    pub max_photo_bytes: usize,
}

/// Secret used when nothing is configured; refused outside development
const DEVELOPMENT_SECRET: &str = "development-secret-key";

/// Read a flat deployment variable, ignoring empty values
fn flat_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("SEMENTES_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let auto_logout = flat_env("AUTO_LOGOUT_DELAY_SECONDS")
            .map(|v| {
                v.parse::<u32>().map(i64::from).map_err(|_| {
                    ConfigError::Message("AUTO_LOGOUT_DELAY_SECONDS must be an integer".into())
                })
            })
            .transpose()?;
        let db_port = flat_env("DB_PORT")
            .map(|v| {
                v.parse::<u16>()
                    .map(i64::from)
                    .map_err(|_| ConfigError::Message("DB_PORT must be a port number".into()))
            })
            .transpose()?;

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("database.name", "sementes")?
            .set_default("database.user", "postgres")?
            .set_default("database.password", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.run_migrations", false)?
            .set_default("session.secret", DEVELOPMENT_SECRET)?
            .set_default("session.auto_logout_delay_seconds", 1800)?
            .set_default("storage.photo_dir", "media/photos")?
            .set_default("storage.max_photo_bytes", 10 * 1024 * 1024)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (SEMENTES__ prefix)
            .add_source(
                Environment::with_prefix("SEMENTES")
                    .separator("__")
                    .try_parsing(true),
            )
            // Flat deployment variables win over everything else
            .set_override_option("database.host", flat_env("DB_HOST"))?
            .set_override_option("database.port", db_port)?
            .set_override_option("database.name", flat_env("DB_NAME"))?
            .set_override_option("database.user", flat_env("DB_USER"))?
            .set_override_option("database.password", flat_env("DB_PASSWORD"))?
            .set_override_option("session.secret", flat_env("SESSION_SECRET"))?
            .set_override_option("session.auto_logout_delay_seconds", auto_logout)?
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let weak = self.session.secret.len() < 16 || self.session.secret == DEVELOPMENT_SECRET;
        if weak && self.environment != "development" {
            return Err(ConfigError::Message(
                "SESSION_SECRET must be at least 16 characters outside development".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(password: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".into(),
            port: 5433,
            name: "sementes".into(),
            user: "app".into(),
            password: password.into(),
            max_connections: 5,
            min_connections: 1,
            run_migrations: false,
        }
    }

    #[test]
    fn test_connect_options() {
        let options = database("pw").connect_options();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_username(), "app");
        assert_eq!(options.get_database(), Some("sementes"));
    }

    #[test]
    fn test_password_with_url_delimiters_keeps_target() {
        let options = database("p@ss/w#rd:1").connect_options();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("sementes"));
    }
}
