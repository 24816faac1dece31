use std::env;
use std::fmt;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use thiserror::Error;

/// Value some deployment templates write into a variable that has not been
/// provisioned yet. Treated the same as an absent variable.
const UNSET_SENTINEL: &str = "None";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LogConfig,
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "bind_host", default = "default_bind_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on closing the pool during shutdown, in milliseconds
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

/// PostgreSQL settings, read from the flat `DB_*` variables.
///
/// The four credentials are optional here: their absence is not a startup
/// error, it keeps the service in degraded mode until they are provided.
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "db_host")]
    pub host: Option<String>,
    #[serde(rename = "db_user")]
    pub user: Option<String>,
    #[serde(rename = "db_pass")]
    pub password: Option<String>,
    #[serde(rename = "db_name")]
    pub name: Option<String>,
    #[serde(rename = "db_port", default = "default_db_port")]
    pub port: u16,
    /// Only the literal `"true"` turns TLS on
    #[serde(rename = "db_ssl")]
    pub ssl: Option<String>,
    #[serde(rename = "db_pool_max", default = "default_pool_max")]
    pub pool_max: u32,
    #[serde(rename = "db_idle_timeout_ms", default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(rename = "db_conn_timeout_ms", default = "default_conn_timeout_ms")]
    pub conn_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(rename = "log_format", default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(rename = "otel_enabled", default)]
    pub enabled: bool,
    #[serde(rename = "otel_endpoint", default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(rename = "otel_service_name", default = "default_service_name")]
    pub service_name: String,
    #[serde(rename = "otel_sampling_ratio", default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

/// Required database variables that are absent, empty or still hold the
/// unset sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("database not configured, missing: {}", .0.join(", "))]
pub struct MissingSettings(pub Vec<&'static str>);

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

fn default_db_port() -> u16 {
    5432
}

fn default_pool_max() -> u32 {
    10
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_conn_timeout_ms() -> u64 {
    5_000
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "db-status-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    /// Load settings from `.env`, optional config files and the process environment.
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        Self::build(Environment::default())
    }

    /// Load settings from an explicit variable map instead of the process
    /// environment. Keys use the same names as the environment (`DB_HOST`, ...).
    pub fn from_env_map<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let source = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();

        Self::build(Environment::default().source(Some(source)))
    }

    fn build(environment: Environment) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .set_default("bind_host", default_bind_host())?
            .set_default("port", i64::from(default_port()))?
            .set_default("db_port", i64::from(default_db_port()))?
            .set_default("db_pool_max", i64::from(default_pool_max()))?
            .set_default("db_idle_timeout_ms", default_idle_timeout_ms() as i64)?
            .set_default("db_conn_timeout_ms", default_conn_timeout_ms() as i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Flat keys: PORT -> port, DB_POOL_MAX -> db_pool_max.
            // Empty variables count as unset.
            .add_source(environment.ignore_empty(true))
            .build()?;

        Ok(Self {
            server: config.clone().try_deserialize()?,
            database: config.clone().try_deserialize()?,
            logging: config.clone().try_deserialize()?,
            otel: config.try_deserialize()?,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn provided(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty() && *v != UNSET_SENTINEL)
}

impl DatabaseConfig {
    pub fn tls_enabled(&self) -> bool {
        self.ssl.as_deref() == Some("true")
    }

    pub fn is_configured(&self) -> bool {
        self.missing().is_empty()
    }

    /// Host for startup logs, `not set` when absent.
    pub fn host_for_log(&self) -> &str {
        self.host.as_deref().unwrap_or("not set")
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.conn_timeout_ms)
    }

    fn missing(&self) -> Vec<&'static str> {
        [
            ("DB_HOST", &self.host),
            ("DB_USER", &self.user),
            ("DB_PASS", &self.password),
            ("DB_NAME", &self.name),
        ]
        .into_iter()
        .filter(|(_, value)| provided(value).is_none())
        .map(|(key, _)| key)
        .collect()
    }

    /// Connection options for a pool, or the list of missing variables.
    ///
    /// With TLS on, the server certificate is not verified.
    pub fn connect_options(&self) -> Result<PgConnectOptions, MissingSettings> {
        let (Some(host), Some(user), Some(password), Some(name)) = (
            provided(&self.host),
            provided(&self.user),
            provided(&self.password),
            provided(&self.name),
        ) else {
            return Err(MissingSettings(self.missing()));
        };

        let ssl_mode = if self.tls_enabled() {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        };

        Ok(PgConnectOptions::new()
            .host(host)
            .port(self.port)
            .username(user)
            .password(password)
            .database(name)
            .ssl_mode(ssl_mode)
            .application_name(env!("CARGO_PKG_NAME")))
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("name", &self.name)
            .field("port", &self.port)
            .field("ssl", &self.ssl)
            .field("pool_max", &self.pool_max)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("conn_timeout_ms", &self.conn_timeout_ms)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_port(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            password: None,
            name: None,
            port: default_db_port(),
            ssl: None,
            pool_max: default_pool_max(),
            idle_timeout_ms: default_idle_timeout_ms(),
            conn_timeout_ms: default_conn_timeout_ms(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> DatabaseConfig {
        DatabaseConfig {
            host: Some("db.internal".into()),
            user: Some("app".into()),
            password: Some("secret".into()),
            name: Some("status".into()),
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn test_default_values() {
        let settings = Settings::from_env_map(Vec::<(String, String)>::new()).unwrap();

        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.server.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(settings.database.port, 5432);
        assert_eq!(settings.database.pool_max, 10);
        assert_eq!(settings.database.idle_timeout(), Duration::from_millis(30_000));
        assert_eq!(settings.database.connect_timeout(), Duration::from_millis(5_000));
        assert!(!settings.database.is_configured());
        assert!(!settings.database.tls_enabled());
        assert_eq!(settings.logging.format, LogFormat::Text);
        assert!(!settings.otel.enabled);
        assert_eq!(settings.server_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_environment_overrides() {
        let settings = Settings::from_env_map([
            ("PORT", "8080"),
            ("DB_HOST", "db.internal"),
            ("DB_USER", "app"),
            ("DB_PASS", "secret"),
            ("DB_NAME", "status"),
            ("DB_PORT", "6543"),
            ("DB_SSL", "true"),
            ("DB_POOL_MAX", "4"),
            ("DB_IDLE_TIMEOUT_MS", "1000"),
            ("DB_CONN_TIMEOUT_MS", "250"),
            ("LOG_FORMAT", "json"),
            ("OTEL_ENABLED", "true"),
            ("OTEL_SAMPLING_RATIO", "0.25"),
        ])
        .unwrap();

        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.database.host.as_deref(), Some("db.internal"));
        assert_eq!(settings.database.port, 6543);
        assert!(settings.database.tls_enabled());
        assert_eq!(settings.database.pool_max, 4);
        assert_eq!(settings.database.idle_timeout_ms, 1000);
        assert_eq!(settings.database.conn_timeout_ms, 250);
        assert!(settings.database.is_configured());
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert!(settings.otel.enabled);
        assert_eq!(settings.otel.sampling_ratio, 0.25);
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let settings = Settings::from_env_map([("DB_PORT", ""), ("DB_HOST", "")]).unwrap();
        assert_eq!(settings.database.port, 5432);
        assert!(settings.database.host.is_none());
    }

    #[test]
    fn test_malformed_port_is_rejected() {
        let result = Settings::from_env_map([("PORT", "not-a-port")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_tls_requires_literal_true() {
        let mut config = configured();
        for value in ["1", "yes", "TRUE", ""] {
            config.ssl = Some(value.into());
            assert!(!config.tls_enabled(), "{value:?} must not enable TLS");
        }
        config.ssl = Some("true".into());
        assert!(config.tls_enabled());
    }

    #[test]
    fn test_missing_credentials_are_listed() {
        let config = DatabaseConfig {
            host: Some(UNSET_SENTINEL.into()),
            password: Some(String::new()),
            ..configured()
        };

        let err = config.connect_options().unwrap_err();
        assert_eq!(err.0, vec!["DB_HOST", "DB_PASS"]);
        assert!(err.to_string().contains("DB_HOST, DB_PASS"));
        assert!(!config.is_configured());
    }

    #[test]
    fn test_connect_options_when_configured() {
        let mut config = configured();
        config.port = 6543;

        let options = config.connect_options().unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "app");
        assert_eq!(options.get_database(), Some("status"));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Disable));

        config.ssl = Some("true".into());
        let options = config.connect_options().unwrap();
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Require));
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", configured());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_host_for_log() {
        assert_eq!(DatabaseConfig::default().host_for_log(), "not set");
        assert_eq!(configured().host_for_log(), "db.internal");
    }
}
