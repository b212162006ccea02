//! Configuration management for the MCP relay
//!
//! The client side reads a JSON file mapping server ids to base URLs, with
//! per-server and per-tool overrides. The server side reads environment
//! variables.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RelayError, Result};

/// Environment variable pointing at the client config file
pub const CONFIG_ENV_VAR: &str = "MCP_RELAY_CONFIG";

/// Client configuration: known servers and invocation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Global invocation defaults
    #[serde(default)]
    pub defaults: InvocationDefaults,

    /// Per-server connection pool bounds
    #[serde(default)]
    pub pool: PoolConfig,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Health probing of unreachable servers
    #[serde(default)]
    pub health: HealthConfig,

    /// Server id -> settings
    pub servers: BTreeMap<String, ServerSettings>,
}

/// Global invocation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationDefaults {
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,

    /// Total attempts per invocation, including the first
    pub max_attempts: u32,

    #[serde(rename = "cache_ttl_ms", with = "millis")]
    pub cache_ttl: Duration,

    /// Consecutive failures after which a server is marked unreachable
    pub failure_threshold: u32,

    /// Replaces every category's backoff base when set
    #[serde(rename = "backoff_base_ms", with = "opt_millis")]
    pub backoff_base: Option<Duration>,

    #[serde(rename = "max_backoff_ms", with = "millis")]
    pub max_backoff: Duration,

    /// Spread each backoff delay over [0.5x, 1.5x]
    pub jitter: bool,
}

impl Default for InvocationDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            cache_ttl: Duration::from_secs(60),
            failure_threshold: 3,
            backoff_base: None,
            max_backoff: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Per-server connection pool bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle keep-alive connections kept per server
    pub max_idle: usize,

    /// Requests allowed in flight per server
    pub max_in_flight: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 8,
            max_in_flight: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Health probing of unreachable servers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// First probe delay after a server becomes unreachable
    #[serde(rename = "probe_interval_ms", with = "millis")]
    pub probe_interval: Duration,

    /// Upper bound for the doubling probe delay
    #[serde(rename = "max_probe_interval_ms", with = "millis")]
    pub max_probe_interval: Duration,

    #[serde(rename = "probe_timeout_ms", with = "millis")]
    pub probe_timeout: Duration,

    /// How often the health monitor looks for due probes
    #[serde(rename = "tick_ms", with = "millis")]
    pub tick: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            max_probe_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(2),
            tick: Duration::from_secs(1),
        }
    }
}

/// Settings for one server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSettings {
    pub base_url: String,

    #[serde(default, rename = "timeout_ms", with = "opt_millis")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default, rename = "cache_ttl_ms", with = "opt_millis")]
    pub cache_ttl: Option<Duration>,

    #[serde(default)]
    pub failure_threshold: Option<u32>,

    /// Tool name -> overrides
    #[serde(default)]
    pub tools: BTreeMap<String, ToolOverrides>,
}

impl ServerSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// Per-tool overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOverrides {
    #[serde(default, rename = "timeout_ms", with = "opt_millis")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default, rename = "cache_ttl_ms", with = "opt_millis")]
    pub cache_ttl: Option<Duration>,

    /// Takes precedence over what the server advertises
    #[serde(default)]
    pub cacheable: Option<bool>,
}

impl ClientConfig {
    /// Build a config from `(server id, base url)` pairs with default policy
    pub fn with_servers<I, S, U>(servers: I) -> Self
    where
        I: IntoIterator<Item = (S, U)>,
        S: Into<String>,
        U: Into<String>,
    {
        Self {
            defaults: InvocationDefaults::default(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            health: HealthConfig::default(),
            servers: servers
                .into_iter()
                .map(|(id, url)| (id.into(), ServerSettings::new(url)))
                .collect(),
        }
    }

    /// Load configuration.
    ///
    /// Order: explicit path, then `MCP_RELAY_CONFIG`, then
    /// `~/.mcp-relay/servers.json`. Without any file the default
    /// two-server layout is used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    }
                    .into());
                }
                Self::from_file(&path)?
            }
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// `~/.mcp-relay/servers.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".mcp-relay").join("servers.json"))
    }

    /// Reject configurations the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(invalid("no servers configured"));
        }
        if self.defaults.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        if self.defaults.failure_threshold == 0 {
            return Err(invalid("failure_threshold must be at least 1"));
        }
        if self.pool.max_in_flight == 0 {
            return Err(invalid("pool.max_in_flight must be at least 1"));
        }

        for (id, server) in &self.servers {
            let url = reqwest::Url::parse(&server.base_url).map_err(|e| {
                invalid(format!("server '{}' has invalid base_url: {}", id, e))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid(format!(
                    "server '{}' must use http or https, got {}",
                    id,
                    url.scheme()
                )));
            }
            if server.max_attempts == Some(0) || server.failure_threshold == Some(0) {
                return Err(invalid(format!(
                    "server '{}' overrides must be at least 1",
                    id
                )));
            }
            if server.tools.values().any(|t| t.max_attempts == Some(0)) {
                return Err(invalid(format!(
                    "server '{}' has a tool override with max_attempts 0",
                    id
                )));
            }
        }

        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::with_servers([
            ("personal_assistant", "http://127.0.0.1:8001"),
            ("knowledge_base", "http://127.0.0.1:8002"),
        ])
    }
}

fn invalid(message: impl Into<String>) -> RelayError {
    RelayError::Config(ConfigError::InvalidConfig {
        message: message.into(),
    })
}

/// Tool server configuration, read from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (`MCP_RELAY_BIND`)
    pub bind: SocketAddr,

    /// Concurrently running handlers (`MCP_RELAY_MAX_HANDLERS`)
    pub max_concurrent_handlers: usize,

    /// Timeout for resource reads (`MCP_RELAY_RESOURCE_TIMEOUT_MS`)
    pub resource_timeout: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let bind = env_or("MCP_RELAY_BIND", SocketAddr::from(([127, 0, 0, 1], 8001)))?;
        let max_concurrent_handlers = env_or("MCP_RELAY_MAX_HANDLERS", 64usize)?;
        let resource_timeout_ms = env_or("MCP_RELAY_RESOURCE_TIMEOUT_MS", 10_000u64)?;

        if max_concurrent_handlers == 0 {
            return Err(ConfigError::InvalidEnvVar {
                var: "MCP_RELAY_MAX_HANDLERS".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }

        Ok(Self {
            bind,
            max_concurrent_handlers,
            resource_timeout: Duration::from_millis(resource_timeout_ms),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8001)),
            max_concurrent_handlers: 64,
            resource_timeout: Duration::from_secs(10),
        }
    }
}

fn env_or<T>(var: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| {
            ConfigError::InvalidEnvVar {
                var: var.to_string(),
                message: e.to_string(),
            }
            .into()
        }),
        Err(_) => Ok(default),
    }
}

/// Durations as integer milliseconds
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
