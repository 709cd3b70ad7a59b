//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::enrich::EnrichConfig;
use crate::application::jobs::cron_schedule;
use crate::cache::{CacheBackend, CacheConfig};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "plaza";
const ENV_PREFIX: &str = "PLAZA";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_NODE_ID: u16 = 1;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_COLLABORATOR_BASE_URL: &str = "http://127.0.0.1:8081";
const DEFAULT_COLLABORATOR_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_POPULAR_REBUILD_CRON: &str = "0 */10 * * * *";
const DEFAULT_TRIM_CRON: &str = "0 0 * * * *";

/// Command-line arguments for the Plaza binary.
#[derive(Debug, Parser)]
#[command(name = "plaza", version, about = "Plaza community feed server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PLAZA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the feed HTTP service and its maintenance workers.
    Serve(Box<ServeArgs>),
    /// Rebuild every popularity snapshot once and exit.
    #[command(name = "rebuild-popular")]
    RebuildPopular(MaintenanceArgs),
    /// Trim every community's feed caches once and exit.
    #[command(name = "trim-caches")]
    TrimCaches(MaintenanceArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MaintenanceArgs {
    #[command(flatten)]
    pub store: StoreOverrides,
}

/// Overrides for the stores every command talks to.
#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the cache backend (redis|memory).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub store: StoreOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the number of in-flight enrichment calls per batch.
    #[arg(long = "enrich-max-in-flight", value_name = "COUNT")]
    pub enrich_max_in_flight: Option<usize>,

    /// Toggle the periodic maintenance workers.
    #[arg(
        long = "jobs-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub jobs_enabled: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheConfig,
    pub enrich: EnrichConfig,
    pub collaborators: CollaboratorSettings,
    pub jobs: JobsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub node_id: u16,
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

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

/// Base URLs of the collaborator services.
#[derive(Debug, Clone)]
pub struct CollaboratorSettings {
    pub users_url: String,
    pub communities_url: String,
    pub likes_url: String,
    pub comments_url: String,
    pub collects_url: String,
    pub follows_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub enabled: bool,
    pub popular_rebuild_cron: String,
    pub trim_cron: String,
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
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::RebuildPopular(args)) | Some(Command::TrimCaches(args)) => {
            raw.apply_store_overrides(&args.store)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
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
    database: RawDatabaseSettings,
    cache: CacheConfig,
    enrich: EnrichConfig,
    collaborators: RawCollaboratorSettings,
    jobs: RawJobsSettings,
    #[serde(skip)]
    cache_backend_override: Option<String>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_store_overrides(&overrides.store);

        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(max) = overrides.enrich_max_in_flight {
            self.enrich.max_in_flight = max;
        }
        if let Some(enabled) = overrides.jobs_enabled {
            self.jobs.enabled = Some(enabled);
        }
    }

    fn apply_store_overrides(&mut self, overrides: &StoreOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache_backend_override = Some(backend.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            mut cache,
            enrich,
            collaborators,
            jobs,
            cache_backend_override,
        } = raw;

        if let Some(backend) = cache_backend_override {
            cache.backend = CacheBackend::from_str(&backend)
                .map_err(|reason| LoadError::invalid("cache.backend", reason))?;
        }

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            enrich: build_enrich_settings(enrich)?,
            collaborators: build_collaborator_settings(collaborators)?,
            jobs: build_jobs_settings(jobs)?,
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

    let node_id = server.node_id.unwrap_or(DEFAULT_NODE_ID);
    if node_id >= 1024 {
        return Err(LoadError::invalid("server.node_id", "must be below 1024"));
    }

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
        node_id,
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: CacheConfig) -> Result<CacheConfig, LoadError> {
    cache
        .validate()
        .map_err(|(key, reason)| LoadError::invalid(key, reason))?;
    if cache.backend == CacheBackend::Redis && cache.redis_url.as_deref().is_none_or(str::is_empty)
    {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "required when cache.backend is `redis`",
        ));
    }
    Ok(cache)
}

fn build_enrich_settings(enrich: EnrichConfig) -> Result<EnrichConfig, LoadError> {
    if enrich.max_in_flight == 0 {
        return Err(LoadError::invalid(
            "enrich.max_in_flight",
            "must be greater than zero",
        ));
    }
    if enrich.call_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "enrich.call_timeout_ms",
            "must be greater than zero",
        ));
    }
    Ok(enrich)
}

fn build_collaborator_settings(
    raw: RawCollaboratorSettings,
) -> Result<CollaboratorSettings, LoadError> {
    let base = raw
        .base_url
        .unwrap_or_else(|| DEFAULT_COLLABORATOR_BASE_URL.to_string());
    let base = base.trim_end_matches('/').to_string();
    if base.is_empty() {
        return Err(LoadError::invalid(
            "collaborators.base_url",
            "must not be empty",
        ));
    }
    let service_url = |value: Option<String>| {
        value
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| base.clone())
    };

    let timeout_ms = raw.timeout_ms.unwrap_or(DEFAULT_COLLABORATOR_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "collaborators.timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(CollaboratorSettings {
        users_url: service_url(raw.users_url),
        communities_url: service_url(raw.communities_url),
        likes_url: service_url(raw.likes_url),
        comments_url: service_url(raw.comments_url),
        collects_url: service_url(raw.collects_url),
        follows_url: service_url(raw.follows_url),
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let popular_rebuild_cron = jobs
        .popular_rebuild_cron
        .unwrap_or_else(|| DEFAULT_POPULAR_REBUILD_CRON.to_string());
    cron_schedule(&popular_rebuild_cron)
        .map_err(|err| LoadError::invalid("jobs.popular_rebuild_cron", err.reason))?;

    let trim_cron = jobs
        .trim_cron
        .unwrap_or_else(|| DEFAULT_TRIM_CRON.to_string());
    cron_schedule(&trim_cron).map_err(|err| LoadError::invalid("jobs.trim_cron", err.reason))?;

    Ok(JobsSettings {
        enabled: jobs.enabled.unwrap_or(true),
        popular_rebuild_cron,
        trim_cron,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    node_id: Option<u16>,
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
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCollaboratorSettings {
    base_url: Option<String>,
    users_url: Option<String>,
    communities_url: Option<String>,
    likes_url: Option<String>,
    comments_url: Option<String>,
    collects_url: Option<String>,
    follows_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    enabled: Option<bool>,
    popular_rebuild_cron: Option<String>,
    trim_cron: Option<String>,
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
