//! Configuration system for hopsync.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HOPSYNC_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/hopsync/config.toml
//!   3. ~/.config/hopsync/config.toml
//!
//! The on/off toggle is kept apart from the config, in `state.toml` next to
//! it, because the daemon rewrites it at runtime.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HopsyncConfig {
    pub network: NetworkConfig,
    pub peers: PeersConfig,
    pub forwarder: ForwarderConfig,
    pub transport: TransportConfig,
    pub platform: PlatformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Prefix of the group interface name, e.g. "p2p" matches "p2p-wlan0-0".
    pub interface_prefix: String,
    /// Transport kind used for endpoints toward peers ("udp4", "tcp4", "udp6", "tcp6").
    pub transport: String,
    /// Local HTTP API port.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    /// Maximum number of admitted group members.
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// "nfdc" drives a local NFD, "memory" keeps an in-process table.
    pub backend: String,
    /// Path to the nfdc binary.
    pub nfdc_path: PathBuf,
    /// Face id of the local producer that answers probes; the own discovery
    /// prefix is registered toward it. Must be set for the nfdc backend:
    /// nexthop 0 means nfdc's own control face, which closes when the
    /// command exits and takes the route with it.
    pub local_endpoint: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Path to the ndnpeek binary used to express probe requests.
    pub ndnpeek_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Path to wpa_cli.
    pub wpa_cli_path: PathBuf,
    /// Interface wpa_supplicant runs P2P on.
    pub interface: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface_prefix: "p2p".into(),
            transport: "udp4".into(),
            api_port: 9101,
        }
    }
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self { capacity: 7 }
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            backend: "nfdc".into(),
            nfdc_path: PathBuf::from("nfdc"),
            local_endpoint: 0,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ndnpeek_path: PathBuf::from("ndnpeek"),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            wpa_cli_path: PathBuf::from("wpa_cli"),
            interface: "wlan0".into(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("hopsync")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HopsyncConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HOPSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Path of the runtime state file, next to the config file.
    pub fn state_path() -> PathBuf {
        let config = Self::file_path();
        config
            .parent()
            .map(|p| p.join("state.toml"))
            .unwrap_or_else(|| PathBuf::from("state.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            write_toml(&path, &HopsyncConfig::default())?;
        }
        Ok(path)
    }

    /// Apply HOPSYNC_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HOPSYNC_NETWORK__INTERFACE_PREFIX") {
            self.network.interface_prefix = v;
        }
        if let Ok(v) = std::env::var("HOPSYNC_NETWORK__TRANSPORT") {
            self.network.transport = v;
        }
        if let Ok(v) = std::env::var("HOPSYNC_NETWORK__API_PORT") {
            if let Ok(p) = v.parse() {
                self.network.api_port = p;
            }
        }
        if let Ok(v) = std::env::var("HOPSYNC_PEERS__CAPACITY") {
            if let Ok(n) = v.parse() {
                self.peers.capacity = n;
            }
        }
        if let Ok(v) = std::env::var("HOPSYNC_FORWARDER__BACKEND") {
            self.forwarder.backend = v;
        }
        if let Ok(v) = std::env::var("HOPSYNC_FORWARDER__NFDC_PATH") {
            self.forwarder.nfdc_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HOPSYNC_FORWARDER__LOCAL_ENDPOINT") {
            if let Ok(id) = v.parse() {
                self.forwarder.local_endpoint = id;
            }
        }
        if let Ok(v) = std::env::var("HOPSYNC_TRANSPORT__NDNPEEK_PATH") {
            self.transport.ndnpeek_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HOPSYNC_PLATFORM__WPA_CLI_PATH") {
            self.platform.wpa_cli_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HOPSYNC_PLATFORM__INTERFACE") {
            self.platform.interface = v;
        }
    }

    /// Reject combinations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forwarder.backend == "nfdc" && self.forwarder.local_endpoint == 0 {
            return Err(ConfigError::Invalid(
                "forwarder.local_endpoint must name the producer face when backend = \"nfdc\""
                    .into(),
            ));
        }
        Ok(())
    }
}

fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
    }
    let text = toml::to_string_pretty(value).map_err(ConfigError::SerializeFailed)?;
    std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
}

// ── Persisted toggle ──────────────────────────────────────────────────────────

/// The single piece of state that survives restarts: is the feature on?
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToggleState {
    pub enabled: bool,
}

impl ToggleState {
    /// Read the toggle. A missing file means "off".
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    pub fn store(&self, path: &Path) -> Result<(), ConfigError> {
        write_toml(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hopsync-{}-{}", name, std::process::id()))
    }

    #[test]
    fn default_config_is_sane() {
        let config = HopsyncConfig::default();
        assert_eq!(config.network.transport, "udp4");
        assert_eq!(config.forwarder.backend, "nfdc");
        assert!(config.peers.capacity > 0);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = scratch("config-partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[peers]\ncapacity = 3\n").unwrap();

        let config = HopsyncConfig::load_from(&path).unwrap();
        assert_eq!(config.peers.capacity, 3);
        assert_eq!(config.network.interface_prefix, "p2p");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let config = HopsyncConfig::load_from(&scratch("config-missing").join("nope.toml")).unwrap();
        assert_eq!(config.network.api_port, 9101);
    }

    #[test]
    fn nfdc_backend_needs_a_producer_face() {
        let mut config = HopsyncConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.forwarder.local_endpoint = 270;
        assert!(config.validate().is_ok());

        config.forwarder.local_endpoint = 0;
        config.forwarder.backend = "memory".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_reach_every_section() {
        std::env::set_var("HOPSYNC_FORWARDER__LOCAL_ENDPOINT", "271");
        std::env::set_var("HOPSYNC_PLATFORM__WPA_CLI_PATH", "/usr/sbin/wpa_cli");
        let mut config = HopsyncConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("HOPSYNC_FORWARDER__LOCAL_ENDPOINT");
        std::env::remove_var("HOPSYNC_PLATFORM__WPA_CLI_PATH");

        assert_eq!(config.forwarder.local_endpoint, 271);
        assert_eq!(config.platform.wpa_cli_path, PathBuf::from("/usr/sbin/wpa_cli"));
    }

    #[test]
    fn toggle_round_trips_through_state_file() {
        let dir = scratch("toggle");
        let path = dir.join("state.toml");

        assert!(!ToggleState::load(&path).unwrap().enabled);
        ToggleState { enabled: true }.store(&path).unwrap();
        assert!(ToggleState::load(&path).unwrap().enabled);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
