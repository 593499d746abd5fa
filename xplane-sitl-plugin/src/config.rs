//! Plugin configuration, loaded once at startup from `sitl.json` next to
//! the plugin. Every field has a default so a missing or partial file still
//! yields a working session.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use sitl_schema::MAX_CHANNELS;

pub const DEFAULT_REMOTE_ADDR: &str = "127.0.0.1:9002";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9003";
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 5;
pub const DEFAULT_CHANNEL_COUNT: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SitlConfig {
    /// Autopilot endpoint the plugin sends state frames to.
    pub remote_addr: String,
    /// Local bind address for the UDP socket.
    pub bind_addr: String,
    /// Blocking-receive deadline in lock-step mode, milliseconds.
    pub recv_timeout_ms: u64,
    /// Start in lock-step (paused) mode instead of free-running.
    pub lockstep: bool,
    /// Actuator channel count agreed with the autopilot, 1..=16.
    pub channel_count: usize,
}

impl Default for SitlConfig {
    fn default() -> Self {
        SitlConfig {
            remote_addr: DEFAULT_REMOTE_ADDR.to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
            lockstep: false,
            channel_count: DEFAULT_CHANNEL_COUNT,
        }
    }
}

impl SitlConfig {
    /// Read and parse a config file. A missing file is not an error; it
    /// yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let mut cfg: SitlConfig = serde_json::from_str(&text)?;
        cfg.channel_count = cfg.channel_count.clamp(1, MAX_CHANNELS);
        Ok(cfg)
    }

    pub fn remote_socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.remote_addr.parse()
    }

    pub fn bind_socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.bind_addr.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = SitlConfig::default();
        assert!(cfg.remote_socket_addr().is_ok());
        assert!(cfg.bind_socket_addr().is_ok());
        assert_eq!(cfg.channel_count, 4);
        assert!(!cfg.lockstep);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = SitlConfig::load(Path::new("/nonexistent/sitl.json")).unwrap();
        assert_eq!(cfg.remote_addr, DEFAULT_REMOTE_ADDR);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = std::env::temp_dir().join("xsitl-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial.json");
        std::fs::write(&path, r#"{"lockstep": true, "recv_timeout_ms": 20}"#).unwrap();

        let cfg = SitlConfig::load(&path).unwrap();
        assert!(cfg.lockstep);
        assert_eq!(cfg.recv_timeout_ms, 20);
        assert_eq!(cfg.remote_addr, DEFAULT_REMOTE_ADDR);
    }

    #[test]
    fn channel_count_is_clamped() {
        let dir = std::env::temp_dir().join("xsitl-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("channels.json");
        std::fs::write(&path, r#"{"channel_count": 99}"#).unwrap();

        let cfg = SitlConfig::load(&path).unwrap();
        assert_eq!(cfg.channel_count, MAX_CHANNELS);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = std::env::temp_dir().join("xsitl-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            SitlConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
