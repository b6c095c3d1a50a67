use crate::stream::reconnect::ReconnectPolicy;
use crate::stream::{ChannelKind, StreamError};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const ENV_PREFIX: &str = "STORYBOARD_STREAM";

#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct StreamConfig {
    #[serde(default = "default_socket_base")]
    pub socket_base: String,
    #[serde(default = "default_event_stream_base")]
    pub event_stream_base: String,
    #[serde(default)]
    pub channel: ChannelKind,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
}

fn default_socket_base() -> String {
    "ws://localhost:8000".to_string()
}

fn default_event_stream_base() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    25
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            socket_base: default_socket_base(),
            event_stream_base: default_event_stream_base(),
            channel: ChannelKind::default(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
        }
    }
}

impl StreamConfig {
    fn config_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("storyboard_stream")
    }

    pub fn config_file_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default config file (optional) plus `STORYBOARD_STREAM_*` overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_file_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::load_layered(path, Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    fn load_layered(path: &Path, environment: Environment) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(environment)
            .build()?;

        config.try_deserialize()
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.max_reconnect_attempts,
            Duration::from_millis(self.reconnect_base_delay_ms),
        )
    }

    pub fn base_for(&self, channel: ChannelKind) -> &str {
        match channel {
            ChannelKind::WebSocket => &self.socket_base,
            ChannelKind::EventStream => &self.event_stream_base,
        }
    }

    /// `{base}/{channel segment}/{session_id}`, with the session id percent-encoded.
    pub fn address(&self, channel: ChannelKind, session_id: &str) -> Result<String, StreamError> {
        let base = self.base_for(channel);
        let mut url = Url::parse(base)
            .map_err(|e| StreamError::Connection(format!("invalid base URL '{}': {}", base, e)))?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StreamError::Connection(format!("base URL '{}' cannot carry a path", base)))?;
            segments.pop_if_empty().push(channel.path_segment()).push(session_id);
        }

        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("storyboard_stream_test_{}", uuid::Uuid::new_v4()))
            .join("config.toml")
    }

    fn fake_env(vars: &[(&str, &str)]) -> Environment {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).try_parsing(true).source(Some(source))
    }

    #[test]
    fn test_defaults_without_file() {
        let path = temp_config_path();
        let config = StreamConfig::load_layered(&path, fake_env(&[])).unwrap();

        assert_eq!(config, StreamConfig::default());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(25));
        assert_eq!(config.reconnect_policy(), ReconnectPolicy::new(3, Duration::from_secs(1)));
        assert_eq!(config.channel, ChannelKind::WebSocket);
    }

    #[test]
    fn test_save_and_reload() {
        let path = temp_config_path();
        let config = StreamConfig {
            socket_base: "ws://studio:9000".to_string(),
            channel: ChannelKind::EventStream,
            heartbeat_interval_secs: 10,
            ..StreamConfig::default()
        };
        config.save_to(&path).unwrap();

        let loaded = StreamConfig::load_layered(&path, fake_env(&[])).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let path = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "max_reconnect_attempts = 5\n").unwrap();

        let loaded = StreamConfig::load_layered(&path, fake_env(&[])).unwrap();
        assert_eq!(loaded.max_reconnect_attempts, 5);
        assert_eq!(loaded.socket_base, "ws://localhost:8000");

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_environment_overrides_file() {
        let path = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "heartbeat_interval_secs = 40\n").unwrap();

        let env = fake_env(&[
            ("STORYBOARD_STREAM_HEARTBEAT_INTERVAL_SECS", "5"),
            ("STORYBOARD_STREAM_CHANNEL", "event_stream"),
        ]);
        let loaded = StreamConfig::load_layered(&path, env).unwrap();
        assert_eq!(loaded.heartbeat_interval_secs, 5);
        assert_eq!(loaded.channel, ChannelKind::EventStream);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_address() {
        let config = StreamConfig::default();

        assert_eq!(
            config.address(ChannelKind::WebSocket, "abc-123").unwrap(),
            "ws://localhost:8000/ws/abc-123"
        );
        assert_eq!(
            config.address(ChannelKind::EventStream, "abc-123").unwrap(),
            "http://localhost:8000/api/events/abc-123"
        );
        assert_eq!(
            config.address(ChannelKind::WebSocket, "a b/c").unwrap(),
            "ws://localhost:8000/ws/a%20b%2Fc"
        );
    }

    #[test]
    fn test_address_with_trailing_slash_and_bad_base() {
        let config = StreamConfig {
            event_stream_base: "http://localhost:8000/api/".to_string(),
            socket_base: "not a url".to_string(),
            ..StreamConfig::default()
        };

        assert_eq!(
            config.address(ChannelKind::EventStream, "s1").unwrap(),
            "http://localhost:8000/api/events/s1"
        );
        assert!(matches!(
            config.address(ChannelKind::WebSocket, "s1"),
            Err(StreamError::Connection(_))
        ));
    }
}
