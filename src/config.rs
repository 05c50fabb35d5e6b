//! Process configuration assembled from the environment (and `.env`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::chunk::BatchSize;
use crate::error::ConfigError;
use crate::source::{SourceConfig, DEFAULT_SNAPSHOT_PATH, DEFAULT_SOURCE_URL};
use crate::store::StoreConfig;
use crate::util::env::{env_flag, env_opt};

/// Keys echoed (redacted) in the startup configuration snapshot.
pub const SNAPSHOT_KEYS: &[&str] = &[
    "DATABASE_URL",
    "DB_MAX_CONNS",
    "DB_ACQUIRE_TIMEOUT_SECS",
    "DB_STATEMENT_TIMEOUT_MS",
    "AUTO_MIGRATE",
    "MIGRATIONS_DIR",
    "API_HOST",
    "API_PORT",
    "ALLOWED_ORIGINS",
    "SYNC_API_TOKEN",
    "SYNC_BATCH_SIZE",
    "SYNC_INTERVAL_SECS",
    "SHOW_SOURCE",
    "SHOW_SOURCE_URL",
    "SHOW_SOURCE_PATH",
    "SHOW_SOURCE_TIMEOUT_SECS",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: String,
    /// Bearer token required by `POST /sync`; open when unset.
    pub sync_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            allowed_origins: "*".to_string(),
            sync_token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch_size: BatchSize,
    pub source: SourceConfig,
    /// In-process schedule for `serve`; disabled when unset.
    pub interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub server: ServerConfig,
    pub sync: SyncSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            store: store_from_env()?,
            server: server_from_env()?,
            sync: sync_from_env()?,
        })
    }
}

pub fn store_from_env() -> Result<StoreConfig, ConfigError> {
    let database_url = env_opt("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
    Ok(StoreConfig {
        database_url,
        max_connections: parsed("DB_MAX_CONNS", 10u32)?,
        acquire_timeout: Duration::from_secs(parsed("DB_ACQUIRE_TIMEOUT_SECS", 10u64)?),
        statement_timeout: Duration::from_millis(parsed("DB_STATEMENT_TIMEOUT_MS", 30_000u64)?),
        auto_migrate: env_flag("AUTO_MIGRATE", false),
        migrations_dir: env_opt("MIGRATIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./migrations")),
    })
}

pub fn server_from_env() -> Result<ServerConfig, ConfigError> {
    let defaults = ServerConfig::default();
    Ok(ServerConfig {
        host: env_opt("API_HOST").unwrap_or(defaults.host),
        port: parsed("API_PORT", defaults.port)?,
        allowed_origins: env_opt("ALLOWED_ORIGINS").unwrap_or(defaults.allowed_origins),
        sync_token: env_opt("SYNC_API_TOKEN").map(|t| t.trim().to_string()),
    })
}

pub fn sync_from_env() -> Result<SyncSettings, ConfigError> {
    let batch_size = parsed("SYNC_BATCH_SIZE", BatchSize::default())?;
    let interval = match env_opt("SYNC_INTERVAL_SECS") {
        Some(raw) => parse_interval(&raw)?,
        None => None,
    };
    let source = source_from_parts(
        env_opt("SHOW_SOURCE").as_deref(),
        env_opt("SHOW_SOURCE_URL"),
        env_opt("SHOW_SOURCE_PATH"),
        parsed("SHOW_SOURCE_TIMEOUT_SECS", 30u64)?,
    )?;
    Ok(SyncSettings {
        batch_size,
        source,
        interval,
    })
}

/// Pick the show source. `kind` defaults to `file`.
pub fn source_from_parts(
    kind: Option<&str>,
    url: Option<String>,
    path: Option<String>,
    timeout_secs: u64,
) -> Result<SourceConfig, ConfigError> {
    match kind.map(|k| k.trim().to_ascii_lowercase()).as_deref() {
        None | Some("file") => Ok(SourceConfig::File {
            path: PathBuf::from(path.unwrap_or_else(|| DEFAULT_SNAPSHOT_PATH.to_string())),
        }),
        Some("http") => {
            if timeout_secs == 0 {
                return Err(ConfigError::Invalid {
                    key: "SHOW_SOURCE_TIMEOUT_SECS",
                    reason: "must be greater than zero".into(),
                });
            }
            Ok(SourceConfig::Http {
                url: url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                timeout: Duration::from_secs(timeout_secs),
            })
        }
        Some(other) => Err(ConfigError::Invalid {
            key: "SHOW_SOURCE",
            reason: format!("expected `file` or `http`, got `{other}`"),
        }),
    }
}

/// `0` disables the schedule like an unset value.
fn parse_interval(raw: &str) -> Result<Option<Duration>, ConfigError> {
    let secs: u64 = parse_value("SYNC_INTERVAL_SECS", raw)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

/// Default when unset; a present value that fails to parse is an error.
fn parsed<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("{raw:?}: {e}"),
    })
}
