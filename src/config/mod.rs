//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::keys;

mod cli;

pub use cli::{
    CliArgs, Command, ServeArgs, ServeOverrides, StatusArgs, StorageBackendArg, StorageOverrides,
    SweepArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "newscache";
const ENV_PREFIX: &str = "NEWSCACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 7070;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 10;
const DEFAULT_STORAGE_ROOT: &str = "storage";
const DEFAULT_TABLES_DIR: &str = "storage/tables";
const DEFAULT_SOURCE: &str = "yle";
const DEFAULT_FEED_NAME: &str = "paauutiset";
const DEFAULT_FEED_TTL_HOURS: u64 = 1;
const DEFAULT_ARTICLE_TTL_HOURS: u64 = 1;
const DEFAULT_TRANSLATION_TTL_HOURS: u64 = 24;
const DEFAULT_RATE_LIMIT_TABLE: &str = "rateLimits";
const DEFAULT_DAILY_LIMIT: u64 = 50;
const DEFAULT_IP_WINDOW_MINUTES: u64 = 15;
const DEFAULT_IP_MAX_REQUESTS: u64 = 60;
const DEFAULT_TRANSLATION_MAX_RETRIES: u32 = 3;
const DEFAULT_TRANSLATION_RETRY_DELAY_MS: u64 = 2000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub translation: TranslationSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub root: PathBuf,
    pub tables_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub source: String,
    pub feed_name: String,
    pub feed_ttl_hours: NonZeroU32,
    pub article_ttl_hours: NonZeroU32,
    pub translation_ttl_hours: NonZeroU32,
    pub sweep_on_request: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Table holding both daily and per-IP counters.
    pub table: String,
    pub feed_daily_limit: NonZeroU32,
    pub article_daily_limit: NonZeroU32,
    pub translation_daily_limit: NonZeroU32,
    /// Width of a per-IP window; windows align to the top of the hour.
    pub ip_window_minutes: NonZeroU32,
    pub ip_max_requests: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct TranslationSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    load_layered(cli, environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

fn load_layered(cli: &CliArgs, environment: Environment) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(environment);

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sweep(args)) => raw.apply_storage_overrides(&args.storage),
        Some(Command::Status(args)) => raw.apply_storage_overrides(&args.storage),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    cache: RawCacheSettings,
    rate_limit: RawRateLimitSettings,
    translation: RawTranslationSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }

        self.apply_storage_overrides(&overrides.storage);
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(backend) = overrides.backend {
            self.storage.backend = Some(backend.into());
        }
        if let Some(root) = overrides.root.as_ref() {
            self.storage.root = Some(root.clone());
        }
        if let Some(dir) = overrides.tables_dir.as_ref() {
            self.storage.tables_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            storage,
            cache,
            rate_limit,
            translation,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage)?,
            cache: build_cache_settings(cache)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            translation: build_translation_settings(translation)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let root = storage
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("storage.root", "path must not be empty"));
    }

    let tables_dir = storage
        .tables_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TABLES_DIR));
    if tables_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.tables_dir",
            "path must not be empty",
        ));
    }

    Ok(StorageSettings {
        backend: storage.backend.unwrap_or(StorageBackend::Local),
        root,
        tables_dir,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let source = cache.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string());
    keys::source_prefix(&source).map_err(|err| LoadError::invalid("cache.source", err.to_string()))?;

    let feed_name = cache
        .feed_name
        .unwrap_or_else(|| DEFAULT_FEED_NAME.to_string());
    keys::feed_key(&source, &feed_name)
        .map_err(|err| LoadError::invalid("cache.feed_name", err.to_string()))?;

    Ok(CacheSettings {
        source,
        feed_name,
        feed_ttl_hours: non_zero_u32(
            cache.feed_ttl_hours.unwrap_or(DEFAULT_FEED_TTL_HOURS),
            "cache.feed_ttl_hours",
        )?,
        article_ttl_hours: non_zero_u32(
            cache.article_ttl_hours.unwrap_or(DEFAULT_ARTICLE_TTL_HOURS),
            "cache.article_ttl_hours",
        )?,
        translation_ttl_hours: non_zero_u32(
            cache
                .translation_ttl_hours
                .unwrap_or(DEFAULT_TRANSLATION_TTL_HOURS),
            "cache.translation_ttl_hours",
        )?,
        sweep_on_request: cache.sweep_on_request.unwrap_or(true),
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let table = rate_limit
        .table
        .unwrap_or_else(|| DEFAULT_RATE_LIMIT_TABLE.to_string());
    let table_ok = !table.is_empty()
        && table
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if !table_ok {
        return Err(LoadError::invalid(
            "rate_limit.table",
            "must be non-empty ASCII letters, digits, `_` or `-`",
        ));
    }

    let ip_window_minutes = non_zero_u32(
        rate_limit
            .ip_window_minutes
            .unwrap_or(DEFAULT_IP_WINDOW_MINUTES),
        "rate_limit.ip_window_minutes",
    )?;
    if ip_window_minutes.get() > 60 {
        return Err(LoadError::invalid(
            "rate_limit.ip_window_minutes",
            "must be between 1 and 60",
        ));
    }

    Ok(RateLimitSettings {
        table,
        feed_daily_limit: non_zero_u32(
            rate_limit.feed_daily_limit.unwrap_or(DEFAULT_DAILY_LIMIT),
            "rate_limit.feed_daily_limit",
        )?,
        article_daily_limit: non_zero_u32(
            rate_limit.article_daily_limit.unwrap_or(DEFAULT_DAILY_LIMIT),
            "rate_limit.article_daily_limit",
        )?,
        translation_daily_limit: non_zero_u32(
            rate_limit
                .translation_daily_limit
                .unwrap_or(DEFAULT_DAILY_LIMIT),
            "rate_limit.translation_daily_limit",
        )?,
        ip_window_minutes,
        ip_max_requests: non_zero_u32(
            rate_limit.ip_max_requests.unwrap_or(DEFAULT_IP_MAX_REQUESTS),
            "rate_limit.ip_max_requests",
        )?,
    })
}

fn build_translation_settings(
    translation: RawTranslationSettings,
) -> Result<TranslationSettings, LoadError> {
    let max_retries = translation
        .max_retries
        .unwrap_or(DEFAULT_TRANSLATION_MAX_RETRIES);
    if max_retries == 0 {
        return Err(LoadError::invalid(
            "translation.max_retries",
            "must be greater than zero",
        ));
    }

    let retry_delay_ms = translation
        .retry_delay_ms
        .unwrap_or(DEFAULT_TRANSLATION_RETRY_DELAY_MS);

    Ok(TranslationSettings {
        max_retries,
        retry_delay: Duration::from_millis(retry_delay_ms),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    backend: Option<StorageBackend>,
    root: Option<PathBuf>,
    tables_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    source: Option<String>,
    feed_name: Option<String>,
    feed_ttl_hours: Option<u64>,
    article_ttl_hours: Option<u64>,
    translation_ttl_hours: Option<u64>,
    sweep_on_request: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    table: Option<String>,
    feed_daily_limit: Option<u64>,
    article_daily_limit: Option<u64>,
    translation_daily_limit: Option<u64>,
    ip_window_minutes: Option<u64>,
    ip_max_requests: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTranslationSettings {
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
