use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config::{self as core_config, get_env, Environment};
use service_core::error::AppError;
use sqlx::postgres::PgConnectOptions;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
}

/// Connection parameters for PostgreSQL.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    /// Database holding the service tables; created on startup if absent.
    pub name: String,
    /// Database used to look up and create `name`.
    pub admin_database: String,
}

impl DatabaseConfig {
    /// Options for the service database.
    pub fn connect_options(&self) -> PgConnectOptions {
        self.options_for(&self.name)
    }

    /// Options for the administrative database.
    pub fn admin_connect_options(&self) -> PgConnectOptions {
        self.options_for(&self.admin_database)
    }

    fn options_for(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(self.password.expose_secret())
            .database(database)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl NotificationConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let environment = Environment::current()?;
        let is_prod = environment.is_prod();

        Ok(NotificationConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("notification-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                host: get_env("DB_HOST", Some("localhost"), is_prod)?,
                port: parse_port(&get_env("DB_PORT", Some("5432"), is_prod)?)?,
                user: get_env("DB_USER", Some("postgres"), is_prod)?,
                password: Secret::new(get_env("DB_PASSWORD", Some("postgres"), is_prod)?),
                name: get_env("DB_NAME", Some("notifications_db"), is_prod)?,
                admin_database: get_env("DB_ADMIN_DATABASE", Some("postgres"), is_prod)?,
            },
            cors: CorsConfig {
                allowed_origins: split_origins(&get_env(
                    "CORS_ALLOWED_ORIGINS",
                    Some("*"),
                    is_prod,
                )?),
            },
        })
    }
}

fn parse_port(value: &str) -> Result<u16, AppError> {
    value.trim().parse().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Invalid DB_PORT '{}': {}", value, e))
    })
}

fn split_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
