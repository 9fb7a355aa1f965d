use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Coordinator configuration.
/// Loaded from `FL__*` environment variables and/or the TOML file named by `FL_CONFIG`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,
    /// WebSocket + HTTP port (default: 5000)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory received bulk artifacts are written to
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

impl AppConfig {
    /// Load config from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        load_layered("FL_CONFIG", "FL")
    }
}

/// Agent configuration.
/// Loaded from `FL_AGENT__*` environment variables and/or the TOML file named by `FL_AGENT_CONFIG`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Coordinator URL; its last path segment names this agent,
    /// e.g. `wss://localhost:5000/sample/robot1/`
    pub server_url: String,
    /// Sender name in outbound envelopes (default: identity from `server_url`)
    #[serde(default)]
    pub robot_name: Option<String>,
    /// Pause between reconnection attempts (default: 5)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Announced in the INNITIAL_CONNECTION envelope
    #[serde(default)]
    pub initial: InitialConfig,
    /// Graph files pushed as bulk frames on every (re)connect
    #[serde(default)]
    pub artifacts: Vec<ArtifactConfig>,
    /// Parameters pushed in the handshake PARAM envelope
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Directory listed when the coordinator asks for rosbags
    #[serde(default)]
    pub rosbag_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitialConfig {
    #[serde(default)]
    pub map_id: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub building_number: i64,
    #[serde(default)]
    pub floor_level: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    pub path: PathBuf,
    /// Name on the wire (default: file name of `path`)
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub map_id: String,
    #[serde(default)]
    pub floor_id: String,
}

impl ArtifactConfig {
    pub fn wire_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

impl AgentConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        load_layered("FL_AGENT_CONFIG", "FL_AGENT")
    }
}

/// Optional TOML file first, environment on top.
fn load_layered<T: serde::de::DeserializeOwned>(
    file_var: &str,
    env_prefix: &str,
) -> Result<T, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Ok(path) = std::env::var(file_var) {
        tracing::debug!(%path, "Loading config file");
        builder = builder.add_source(config::File::with_name(&path));
    }
    let cfg = builder
        .add_source(
            config::Environment::default()
                .prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    cfg.try_deserialize()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}
fn default_reconnect_delay() -> u64 {
    5
}
