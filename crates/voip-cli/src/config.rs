//! Client configuration at `~/.voip/config.toml`.
//!
//! Provides the default router host, ports, and login token.
//! CLI flags always override config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default connection settings.
    #[serde(default)]
    pub default: DefaultConfig,
}

/// Default connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultConfig {
    /// Router host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Router TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// UDP tunnel port (current protocol).
    #[serde(default = "default_tunnel_port")]
    pub tunnel_port: u16,

    /// Access token used for login and tunnel auth. Without one the CLI
    /// falls back to a uid-only login and cannot use the tunnel.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tunnel_port: default_tunnel_port(),
            token: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    20000
}

fn default_tunnel_port() -> u16 {
    20002
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// `~/.voip/config.toml`, or a relative path if there is no home directory.
    pub fn default_path() -> std::path::PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".voip")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.default.host, "127.0.0.1");
        assert_eq!(cfg.default.port, 20000);
        assert_eq!(cfg.default.tunnel_port, 20002);
        assert!(cfg.default.token.is_none());
    }

    #[test]
    fn parse_partial_toml_config() {
        let toml_str = r#"
[default]
host = "router.example.com"
token = "abcd"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.default.host, "router.example.com");
        assert_eq!(cfg.default.token.as_deref(), Some("abcd"));
        assert_eq!(cfg.default.port, 20000); // default
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.default.tunnel_port, 20002);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[default]\nport = 21000\ntunnel_port = 21002\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.default.port, 21000);
        assert_eq!(cfg.default.tunnel_port, 21002);
    }

    #[test]
    fn bad_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[default\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
