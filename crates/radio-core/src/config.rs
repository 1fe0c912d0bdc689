use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;
use crate::history::{DEFAULT_HISTORY_CAPACITY, DEFAULT_MAX_ENTRY_LEN};
use crate::machine::DEFAULT_MAX_RESTARTS;
use crate::sleep_timer::DEFAULT_SLEEP_DURATION;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub stations: StationsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

/// Station list source: a local TOML file, falling back to an m3u URL or path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsConfig {
    /// Defaults to `$XDG_CONFIG_HOME/radio/stations.toml`.
    #[serde(default = "default_stations_toml")]
    pub stations_toml: PathBuf,
    /// http(s) URL or file path of an m3u list.  Empty disables it.
    #[serde(default)]
    pub m3u_url: String,
}

/// Tunables of the playback session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_sleep_timer_secs")]
    pub sleep_timer_secs: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_max_entry_len")]
    pub max_entry_len: usize,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u8,
}

impl SessionConfig {
    pub fn sleep_duration(&self) -> Duration {
        Duration::from_secs(self.sleep_timer_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            state_file: default_state_file(),
            history_file: default_history_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            stations_toml: default_stations_toml(),
            m3u_url: String::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sleep_timer_secs: default_sleep_timer_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            history_capacity: default_history_capacity(),
            max_entry_len: default_max_entry_len(),
            max_restarts: default_max_restarts(),
        }
    }
}

fn default_pid_file() -> PathBuf {
    platform::data_dir().join("daemon.pid")
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_history_file() -> PathBuf {
    platform::data_dir().join("metadata_history.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_volume() -> f32 {
    0.5
}

fn default_stations_toml() -> PathBuf {
    platform::config_dir().join("stations.toml")
}

fn default_sleep_timer_secs() -> u64 {
    DEFAULT_SLEEP_DURATION.as_secs()
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_max_entry_len() -> usize {
    DEFAULT_MAX_ENTRY_LEN
}

fn default_max_restarts() -> u8 {
    DEFAULT_MAX_RESTARTS
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8989);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert!(config.stations.m3u_url.is_empty());
        assert!(config
            .stations
            .stations_toml
            .ends_with("radio/stations.toml"));
        assert_eq!(config.session.sleep_duration(), Duration::from_secs(900));
        assert_eq!(config.session.history_capacity, 25);
        assert_eq!(config.session.max_entry_len, 127);
        assert_eq!(config.session.max_restarts, 5);
    }

    #[test]
    fn test_partial_session_section() {
        let config: Config = toml::from_str(
            r#"
[session]
sleep_timer_secs = 60
"#,
        )
        .unwrap();
        assert_eq!(config.session.sleep_duration(), Duration::from_secs(60));
        assert_eq!(config.session.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.session.max_restarts, 5);
        assert_eq!(config.http.port, 8989);
    }
}
