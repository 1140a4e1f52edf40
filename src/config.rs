//! Configuration management for the Cookbook API.
//!
//! Settings come from an optional `config.yaml`, overlaid by environment
//! variables (`AUTH0_DOMAIN`, `TESTING`, `TELEMETRY__LEVEL`, ...).

use std::net::IpAddr;
use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};

use crate::auth::VerifierConfig;

/// Application configuration settings.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Bypasses bearer verification entirely. Integration testing only.
    #[serde(default, deserialize_with = "enabled")]
    pub testing: bool,
    /// Host of the token issuer, e.g. `example.eu.auth0.com`.
    #[serde(default, deserialize_with = "non_empty")]
    pub auth0_domain: Option<String>,
    /// Audience the issued tokens must carry.
    #[serde(default, deserialize_with = "non_empty")]
    pub auth0_audience: Option<String>,
    /// Interface the HTTP listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub key_set: KeySetConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Settings {
    pub fn verifier_config(&self) -> VerifierConfig {
        VerifierConfig {
            testing: self.testing,
            issuer_domain: self.auth0_domain.clone(),
            audience: self.auth0_audience.clone(),
            leeway: self.key_set.leeway_secs,
        }
    }
}

/// Tuning for the issuer key-set cache.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct KeySetConfig {
    /// How long a fetched key set is served before it is refreshed.
    pub ttl_secs: u64,
    /// Upper bound on a single key-set fetch.
    pub fetch_timeout_secs: u64,
    /// Clock skew tolerated on `exp` and `nbf`.
    pub leeway_secs: u64,
}

impl KeySetConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for KeySetConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            fetch_timeout_secs: 10,
            leeway_secs: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Logging and trace export settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub level: LogLevel,
    /// Level for the HTTP stack (`axum`, `hyper`, `reqwest`, ...), usually
    /// quieter than the service itself.
    pub dependency_level: LogLevel,
    /// Level for the authentication and request audit events. Audit events
    /// are emitted at `info`, so anything above that silences them.
    pub audit_level: LogLevel,
    pub format: LoggingFormat,
    /// Export spans over OTLP/gRPC to the collector named by the standard
    /// `OTEL_EXPORTER_OTLP_*` variables.
    pub otlp_enabled: bool,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            dependency_level: LogLevel::Warn,
            audit_level: LogLevel::Info,
            format: LoggingFormat::Json,
            otlp_enabled: false,
            service_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8000
}

/// Treats blank strings the same as an unset variable.
fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

/// Reads a bool-like switch. Only `1`, `true`, `yes` and `on` (any case)
/// turn it on; every other value, including a blank one, leaves it off.
fn enabled<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    // With `try_parsing` the environment hands over bools, numbers or strings.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Switch {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Option::<Switch>::deserialize(deserializer)? {
        Some(Switch::Bool(value)) => value,
        Some(Switch::Int(value)) => value == 1,
        Some(Switch::Float(_)) | None => false,
        Some(Switch::Text(value)) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
    })
}

/// Loads configuration from `config.yaml` (if present) and the process environment.
#[tracing::instrument]
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(Environment::default())
}

fn load_config_from(environment: Environment) -> Result<Settings, ConfigError> {
    let cfg = config::Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(environment.separator("__").try_parsing(true))
        .build()
        .map_err(|e| {
            tracing::error!("Failed to build configuration: {}", e);
            e
        })?;

    cfg.try_deserialize::<Settings>().map_err(|e| {
        tracing::error!("Failed to deserialize configuration: {}", e);
        e
    })
}
