//! Watcher configuration loading.
//!
//! TOML is the sole config source.  Default config path:
//! `/etc/squad-aegis/logwatcher.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - At least one `[[servers]]` entry with a `[servers.source]` table
//! - Remote sources additionally need `host`, `username`, `password`
//!
//! # Example
//! ```toml
//! schema_version = 1
//!
//! [[servers]]
//! name = "EU #1"
//! [servers.source]
//! type = "sftp"
//! host = "game.example.com"
//! path = "/logs/SquadGame.log"
//! username = "squad"
//! password = "secret"
//! ```

use crate::source::{FtpConfig, HostKeyPolicy, SftpConfig, SourceConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_CONFIG_PATH: &str = "/etc/squad-aegis/logwatcher.toml";
const DEFAULT_POLL_FREQUENCY_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Validated config types
// ---------------------------------------------------------------------------

/// Top-level watcher configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub schema_version: u32,
    pub servers: Vec<ServerEntry>,
    pub dispatcher_queue_size: usize,
    pub bus_subscriber_queue_size: usize,
    pub metrics_window: Duration,
    /// `None` disables the restart scan.
    pub health_check_interval: Option<Duration>,
    /// `None` disables the status endpoint.
    pub status_http_bind: Option<String>,
}

/// One watched server.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub id: Uuid,
    pub name: String,
    pub source: SourceConfig,
    pub store: StoreChoice,
}

/// Which event-store backend the server uses.
#[derive(Debug, Clone)]
pub enum StoreChoice {
    Memory,
    Redis { url: String },
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (Option for every field)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    servers: Option<Vec<RawServer>>,
    dispatcher: Option<RawDispatcher>,
    bus: Option<RawBus>,
    metrics: Option<RawMetrics>,
    manager: Option<RawManager>,
    status_http: Option<RawStatusHttp>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    id: Option<String>,
    name: Option<String>,
    source: Option<RawSource>,
    store: Option<RawStore>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(rename = "type")]
    source_type: Option<String>,
    path: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    poll_frequency_secs: Option<u64>,
    read_from_start: Option<bool>,
    /// SFTP only: pin the server's SHA-256 host-key fingerprint.
    host_key_fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStore {
    backend: Option<String>,
    redis_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDispatcher {
    queue_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawBus {
    subscriber_queue_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawMetrics {
    window_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawManager {
    /// 0 disables the health loop.
    health_check_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawStatusHttp {
    bind: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load config from the default path.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(Path::new(DEFAULT_CONFIG_PATH))
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<AppConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let raw_servers = raw
        .servers
        .ok_or_else(|| ConfigError::MissingField("servers".to_owned()))?;
    if raw_servers.is_empty() {
        return Err(ConfigError::InvalidValue(
            "at least one [[servers]] entry is required".to_owned(),
        ));
    }
    let mut servers = Vec::with_capacity(raw_servers.len());
    for (i, raw_server) in raw_servers.into_iter().enumerate() {
        servers.push(validate_server(raw_server, i)?);
    }

    let health_check_interval = match raw
        .manager
        .and_then(|m| m.health_check_interval_secs)
        .unwrap_or(30)
    {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    Ok(AppConfig {
        schema_version,
        servers,
        dispatcher_queue_size: raw
            .dispatcher
            .and_then(|d| d.queue_size)
            .unwrap_or(1000)
            .max(1),
        bus_subscriber_queue_size: raw
            .bus
            .and_then(|b| b.subscriber_queue_size)
            .unwrap_or(256)
            .max(1),
        metrics_window: Duration::from_secs(
            raw.metrics
                .and_then(|m| m.window_seconds)
                .unwrap_or(60)
                .max(1),
        ),
        health_check_interval,
        status_http_bind: raw.status_http.and_then(|s| s.bind),
    })
}

// ---------------------------------------------------------------------------
// Per-server validation
// ---------------------------------------------------------------------------

fn validate_server(raw: RawServer, index: usize) -> Result<ServerEntry, ConfigError> {
    let id = match raw.id {
        Some(text) => Uuid::parse_str(&text).map_err(|_| {
            ConfigError::InvalidValue(format!("servers[{index}].id is not a UUID: {text:?}"))
        })?,
        None => Uuid::new_v4(),
    };
    let name = raw.name.unwrap_or_else(|| id.to_string());

    let raw_source = raw
        .source
        .ok_or_else(|| ConfigError::MissingField(format!("servers[{index}].source")))?;
    let source = validate_source(raw_source, index)?;

    let store = match raw.store {
        None => StoreChoice::Memory,
        Some(raw_store) => match raw_store.backend.as_deref().unwrap_or("memory") {
            "memory" => StoreChoice::Memory,
            "redis" => StoreChoice::Redis {
                url: raw_store.redis_url.ok_or_else(|| {
                    ConfigError::MissingField(format!("servers[{index}].store.redis_url"))
                })?,
            },
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "servers[{index}].store.backend must be \"memory\" or \"redis\", got {other:?}"
                )));
            }
        },
    };

    Ok(ServerEntry {
        id,
        name,
        source,
        store,
    })
}

fn validate_source(raw: RawSource, index: usize) -> Result<SourceConfig, ConfigError> {
    let field = |name: &str| format!("servers[{index}].source.{name}");
    let source_type = raw
        .source_type
        .ok_or_else(|| ConfigError::MissingField(field("type")))?;
    let path = raw
        .path
        .ok_or_else(|| ConfigError::MissingField(field("path")))?;
    let read_from_start = raw.read_from_start.unwrap_or(false);
    let poll_interval = Duration::from_secs(
        raw.poll_frequency_secs
            .unwrap_or(DEFAULT_POLL_FREQUENCY_SECS)
            .max(1),
    );

    match source_type.as_str() {
        "local" => Ok(SourceConfig::Local {
            path: PathBuf::from(path),
            read_from_start,
        }),
        "sftp" => Ok(SourceConfig::Sftp(SftpConfig {
            host: raw
                .host
                .ok_or_else(|| ConfigError::MissingField(field("host")))?,
            port: raw.port.unwrap_or(22),
            username: raw
                .username
                .ok_or_else(|| ConfigError::MissingField(field("username")))?,
            password: raw
                .password
                .ok_or_else(|| ConfigError::MissingField(field("password")))?,
            path,
            poll_interval,
            read_from_start,
            host_key: match raw.host_key_fingerprint {
                Some(fp) => HostKeyPolicy::Fingerprint(fp),
                None => HostKeyPolicy::AcceptAny,
            },
        })),
        "ftp" => Ok(SourceConfig::Ftp(FtpConfig {
            host: raw
                .host
                .ok_or_else(|| ConfigError::MissingField(field("host")))?,
            port: raw.port.unwrap_or(21),
            username: raw
                .username
                .ok_or_else(|| ConfigError::MissingField(field("username")))?,
            password: raw
                .password
                .ok_or_else(|| ConfigError::MissingField(field("password")))?,
            path,
            poll_interval,
            read_from_start,
        })),
        other => Err(ConfigError::InvalidValue(format!(
            "servers[{index}].source.type must be \"local\", \"sftp\" or \"ftp\", got {other:?}"
        ))),
    }
}
