//! Router configuration: TOML file + CLI overrides.

use crate::route::LoginPolicy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use voip_core::{VoipError, VoipResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tunnel: TunnelSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub push: PushSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default)]
    pub login_policy: LoginPolicy,
    #[serde(default = "default_appid")]
    pub fallback_appid: i64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            idle_timeout: default_idle_timeout(),
            login_policy: LoginPolicy::default(),
            fallback_appid: default_appid(),
        }
    }
}

/// `[tunnel]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tunnel_port")]
    pub port: u16,
    #[serde(default = "default_tunnel_port_v2")]
    pub port_v2: u16,
    #[serde(default = "default_appid")]
    pub legacy_appid: i64,
    #[serde(default = "default_gc_interval")]
    pub gc_interval: u64,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_tunnel_port(),
            port_v2: default_tunnel_port_v2(),
            legacy_appid: default_appid(),
            gc_interval: default_gc_interval(),
            client_timeout: default_client_timeout(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded HMAC secret for access tokens.
    pub token_secret: Option<String>,
}

/// `[push]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct PushSection {
    #[serde(default = "default_queue_dir")]
    pub queue_dir: String,
    #[serde(default)]
    pub per_app_queues: Vec<i64>,
}

impl Default for PushSection {
    fn default() -> Self {
        Self {
            queue_dir: default_queue_dir(),
            per_app_queues: Vec::new(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:20000".to_string()
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_appid() -> i64 {
    1006
}
fn default_tunnel_port() -> u16 {
    20001
}
fn default_tunnel_port_v2() -> u16 {
    20002
}
fn default_gc_interval() -> u64 {
    300
}
fn default_client_timeout() -> u64 {
    60
}
fn default_queue_dir() -> String {
    "~/.voip-router/queues".to_string()
}
fn default_true() -> bool {
    true
}

/// Values given on the command line. `None` keeps the file's value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen: Option<String>,
    pub tunnel_port: Option<u16>,
    pub tunnel_port_v2: Option<u16>,
    pub no_tunnel: bool,
    pub login_policy: Option<String>,
    pub idle_timeout: Option<u64>,
}

/// Resolved tunnel settings.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub enabled: bool,
    pub port: u16,
    pub port_v2: u16,
    pub legacy_appid: i64,
    pub gc_interval: Duration,
    pub client_timeout: Duration,
}

/// Resolved router configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub idle_timeout: Duration,
    pub login_policy: LoginPolicy,
    pub fallback_appid: i64,
    pub tunnel: TunnelConfig,
    /// Decoded token secret; `None` means generate one at startup.
    pub token_secret: Option<Vec<u8>>,
    pub queue_dir: PathBuf,
    pub per_app_queues: Vec<i64>,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> VoipResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse_config(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, cli)
    }

    /// Merge a parsed file with CLI overrides.
    pub fn resolve(file: ConfigFile, cli: &CliOverrides) -> VoipResult<Self> {
        let listen_str = cli.listen.clone().unwrap_or(file.server.listen);
        let listen: SocketAddr = listen_str
            .parse()
            .map_err(|e| VoipError::Config(format!("invalid listen address {listen_str:?}: {e}")))?;

        let login_policy = match &cli.login_policy {
            Some(s) => s.parse()?,
            None => file.server.login_policy,
        };

        let token_secret = file
            .auth
            .token_secret
            .as_deref()
            .map(|s| {
                hex::decode(s.trim())
                    .map_err(|e| VoipError::Config(format!("token_secret is not hex: {e}")))
            })
            .transpose()?;
        if matches!(&token_secret, Some(s) if s.is_empty()) {
            return Err(VoipError::Config("token_secret is empty".into()));
        }

        let idle_timeout = cli.idle_timeout.unwrap_or(file.server.idle_timeout);
        for (name, secs) in [
            ("idle_timeout", idle_timeout),
            ("gc_interval", file.tunnel.gc_interval),
            ("client_timeout", file.tunnel.client_timeout),
        ] {
            if secs == 0 {
                return Err(VoipError::Config(format!("{name} must be at least 1 second")));
            }
        }

        Ok(Self {
            listen,
            idle_timeout: Duration::from_secs(idle_timeout),
            login_policy,
            fallback_appid: file.server.fallback_appid,
            tunnel: TunnelConfig {
                enabled: file.tunnel.enabled && !cli.no_tunnel,
                port: cli.tunnel_port.unwrap_or(file.tunnel.port),
                port_v2: cli.tunnel_port_v2.unwrap_or(file.tunnel.port_v2),
                legacy_appid: file.tunnel.legacy_appid,
                gc_interval: Duration::from_secs(file.tunnel.gc_interval),
                client_timeout: Duration::from_secs(file.tunnel.client_timeout),
            },
            token_secret,
            queue_dir: expand_tilde_str(&file.push.queue_dir),
            per_app_queues: file.push.per_app_queues,
        })
    }
}

fn parse_config(content: &str) -> VoipResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| VoipError::Config(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = ServerConfig::resolve(ConfigFile::default(), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:20000".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.idle_timeout, Duration::from_secs(600));
        assert_eq!(cfg.login_policy, LoginPolicy::Multi);
        assert_eq!(cfg.fallback_appid, 1006);
        assert!(cfg.tunnel.enabled);
        assert_eq!(cfg.tunnel.port, 20001);
        assert_eq!(cfg.tunnel.port_v2, 20002);
        assert_eq!(cfg.tunnel.gc_interval, Duration::from_secs(300));
        assert_eq!(cfg.tunnel.client_timeout, Duration::from_secs(60));
        assert!(cfg.token_secret.is_none());
        assert!(cfg.per_app_queues.is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let file = parse_config(
            r#"
            [server]
            listen = "127.0.0.1:3000"
            login_policy = "single"

            [tunnel]
            enabled = false
            client_timeout = 30

            [auth]
            token_secret = "00ff"

            [push]
            queue_dir = "/var/spool/voip"
            per_app_queues = [7, 8]
            "#,
        )
        .unwrap();
        let cfg = ServerConfig::resolve(file, &CliOverrides::default()).unwrap();
        assert_eq!(cfg.listen.port(), 3000);
        assert_eq!(cfg.login_policy, LoginPolicy::Single);
        assert!(!cfg.tunnel.enabled);
        assert_eq!(cfg.tunnel.client_timeout, Duration::from_secs(30));
        assert_eq!(cfg.tunnel.port, 20001);
        assert_eq!(cfg.token_secret, Some(vec![0x00, 0xff]));
        assert_eq!(cfg.queue_dir, PathBuf::from("/var/spool/voip"));
        assert_eq!(cfg.per_app_queues, vec![7, 8]);
    }

    #[test]
    fn test_cli_overrides_win() {
        let cli = CliOverrides {
            listen: Some("127.0.0.1:4000".into()),
            tunnel_port: Some(5001),
            tunnel_port_v2: Some(5002),
            no_tunnel: true,
            login_policy: Some("single".into()),
            idle_timeout: Some(5),
        };
        let cfg = ServerConfig::resolve(ConfigFile::default(), &cli).unwrap();
        assert_eq!(cfg.listen.port(), 4000);
        assert_eq!(cfg.tunnel.port, 5001);
        assert_eq!(cfg.tunnel.port_v2, 5002);
        assert!(!cfg.tunnel.enabled);
        assert_eq!(cfg.login_policy, LoginPolicy::Single);
        assert_eq!(cfg.idle_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values() {
        let cli = CliOverrides {
            login_policy: Some("sometimes".into()),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(ConfigFile::default(), &cli).is_err());

        let cli = CliOverrides {
            listen: Some("not an address".into()),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(ConfigFile::default(), &cli).is_err());

        let file = parse_config("[auth]\ntoken_secret = \"zz\"").unwrap();
        assert!(matches!(
            ServerConfig::resolve(file, &CliOverrides::default()),
            Err(VoipError::Config(_))
        ));

        assert!(parse_config("[server]\nlogin_policy = \"both\"").is_err());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let cli = CliOverrides {
            idle_timeout: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            ServerConfig::resolve(ConfigFile::default(), &cli),
            Err(VoipError::Config(_))
        ));

        for toml in [
            "[server]\nidle_timeout = 0",
            "[tunnel]\ngc_interval = 0",
            "[tunnel]\nclient_timeout = 0",
        ] {
            let file = parse_config(toml).unwrap();
            assert!(
                ServerConfig::resolve(file, &CliOverrides::default()).is_err(),
                "{toml} accepted"
            );
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nidle_timeout = 42").unwrap();
        let cfg = ServerConfig::load(Some(file.path()), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.idle_timeout, Duration::from_secs(42));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServerConfig::load(
            Some(&dir.path().join("absent.toml")),
            &CliOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde_str("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde_str("~/q"), home.join("q"));
        }
    }
}
