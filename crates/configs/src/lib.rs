//! # configs
//!
//! Layered settings for the karma-board server.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults (`Settings::default()`)
//! 2. `config/default.toml` (optional)
//! 3. `config/{APP_ENV}.toml` (optional)
//! 4. `KARMA__`-prefixed environment variables, `__` between sections,
//!    e.g. `KARMA__VOTES__ALLOW_SELF_VOTE=true`
//!
//! A `.env` file is loaded first so its variables feed step 4.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub votes: VoteSettings,
    pub stats: StatsSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: IpAddr,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Postgres URL. Unset means the in-memory store.
    pub url: Option<SecretString>,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoteSettings {
    pub allow_self_vote: bool,
    pub allow_retraction: bool,
    pub max_conflict_retries: u32,
}

/// Upper bound on `stats.active_window_hours`: one year.
pub const MAX_ACTIVE_WINDOW_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsSettings {
    pub cache_ttl_secs: u64,
    pub active_window_hours: i64,
    pub compute_timeout_ms: u64,
    /// 0 disables the background refresher; stats are then computed on demand.
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            run_migrations: true,
        }
    }
}

impl Default for VoteSettings {
    fn default() -> Self {
        Self {
            allow_self_vote: false,
            allow_retraction: true,
            max_conflict_retries: 5,
        }
    }
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            active_window_hours: 24,
            compute_timeout_ms: 5_000,
            refresh_interval_secs: 0,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info,karma_board=debug,services=debug,tower_http=debug".to_string(),
            json: false,
        }
    }
}

impl ServerSettings {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl StatsSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn compute_timeout(&self) -> Duration {
        Duration::from_millis(self.compute_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

impl Settings {
    /// Loads `.env`, then every layer described in the crate docs.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let settings: Settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{app_env}")).required(false))
            .add_source(
                Environment::with_prefix("KARMA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.votes.max_conflict_retries == 0 {
            return Err(ConfigError::Invalid(
                "votes.max_conflict_retries must be at least 1".into(),
            ));
        }
        if self.stats.active_window_hours <= 0 {
            return Err(ConfigError::Invalid(
                "stats.active_window_hours must be positive".into(),
            ));
        }
        if self.stats.active_window_hours > MAX_ACTIVE_WINDOW_HOURS {
            return Err(ConfigError::Invalid(format!(
                "stats.active_window_hours must be at most {MAX_ACTIVE_WINDOW_HOURS}"
            )));
        }
        if self.stats.compute_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "stats.compute_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
