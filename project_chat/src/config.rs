use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::Role;

/// Command line options for the service.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API (default).
    Serve,
    /// Print a bearer token for a user, signed with the configured secret.
    Token {
        #[arg(long)]
        user: Uuid,
        #[arg(long, value_enum)]
        role: Role,
    },
}

/// Signing secret for bearer tokens. Never printed.
#[derive(Clone)]
pub struct JwtSecret(String);

impl JwtSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JwtSecret(<redacted>)")
    }
}

/// Runtime configuration for the server resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Directory holding the SQLite database.
    pub data_dir: PathBuf,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Secret used to verify bearer tokens; the server refuses to start without one.
    pub jwt_secret: Option<JwtSecret>,
    /// Lifetime of tokens printed by the `token` command.
    pub token_ttl_hours: i64,
    /// Messages per page when the client does not ask for a size.
    pub page_size: u32,
    /// Upper bound on a requested page size.
    pub max_page_size: u32,
    /// How long a typing signal stays live.
    pub typing_window: Duration,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    auth: FileAuth,
    #[serde(default)]
    chat: FileChat,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize)]
struct FileAuth {
    #[serde(default)]
    jwt_secret: Option<String>,
    #[serde(default = "default_token_ttl_hours")]
    token_ttl_hours: i64,
}

#[derive(Deserialize)]
struct FileChat {
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default = "default_max_page_size")]
    max_page_size: u32,
    #[serde(default = "default_typing_window_secs")]
    typing_window_secs: u64,
}

fn default_port() -> u16 {
    8790
}

fn default_logging() -> bool {
    true
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_page_size() -> u32 {
    50
}

fn default_max_page_size() -> u32 {
    200
}

fn default_typing_window_secs() -> u64 {
    5
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for FileAuth {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

impl Default for FileChat {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            typing_window_secs: default_typing_window_secs(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("PROJECT_CHAT_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/project_chat.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };
        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;
        let mut jwt_secret = file_cfg.auth.jwt_secret;

        // environment overrides
        if let Ok(p) = std::env::var("PROJECT_CHAT_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("PROJECT_CHAT_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Ok(s) = std::env::var("PROJECT_CHAT_JWT_SECRET") {
            jwt_secret = Some(s);
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        let chat = file_cfg.chat;
        if chat.max_page_size == 0 || chat.page_size == 0 || chat.page_size > chat.max_page_size {
            anyhow::bail!("invalid_page_size");
        }
        if file_cfg.auth.token_ttl_hours <= 0 {
            anyhow::bail!("invalid_token_ttl");
        }

        // bind address precedence for host override
        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        Ok(Self {
            bind,
            data_dir,
            logging_enabled: logging,
            jwt_secret: jwt_secret.filter(|s| !s.is_empty()).map(JwtSecret::new),
            token_ttl_hours: file_cfg.auth.token_ttl_hours,
            page_size: chat.page_size,
            max_page_size: chat.max_page_size,
            typing_window: Duration::from_secs(chat.typing_window_secs),
        })
    }

    /// Location of the SQLite database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("project_chat.db")
    }
}

/// Determine the default data directory for the service.
pub fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".local/share/project_chat");
        p
    } else {
        PathBuf::from("./project_chat_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        std::env::remove_var("PROJECT_CHAT_PORT");
        std::env::remove_var("PROJECT_CHAT_LOGGING");
        std::env::remove_var("PROJECT_CHAT_JWT_SECRET");
        std::env::remove_var("BIND");
    }

    fn load_with(contents: &str, cli: Cli) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, contents).unwrap();
        Config::load(&Cli {
            config: Some(path),
            ..cli
        })
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let cfg = load_with(
            "[server]\nport=5555\n[logging]\nenabled=false\n[auth]\njwt_secret=\"s3cret\"\n[chat]\npage_size=20\n",
            Cli::default(),
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:5555");
        assert!(!cfg.logging_enabled);
        assert_eq!(cfg.jwt_secret.unwrap().as_bytes(), b"s3cret");
        assert_eq!(cfg.page_size, 20);
        assert_eq!(cfg.max_page_size, 200);
    }

    #[test]
    #[serial]
    fn invalid_port_fails() {
        clear_env();
        assert!(load_with("[server]\nport=80\n", Cli::default()).is_err());
    }

    #[test]
    #[serial]
    fn page_size_must_fit_max() {
        clear_env();
        assert!(load_with("[chat]\npage_size=300\n", Cli::default()).is_err());
        assert!(load_with("[chat]\npage_size=0\n", Cli::default()).is_err());
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let cfg = load_with("", Cli::default()).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8790");
        assert!(cfg.logging_enabled);
        assert!(cfg.jwt_secret.is_none());
        assert_eq!(cfg.page_size, 50);
        assert_eq!(cfg.typing_window, Duration::from_secs(5));
        assert_eq!(cfg.token_ttl_hours, 24);
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        std::env::set_var("PROJECT_CHAT_PORT", "2222");
        std::env::set_var("PROJECT_CHAT_JWT_SECRET", "from-env");
        let cfg = load_with(
            "[server]\nport=1111\n[auth]\njwt_secret=\"from-file\"\n",
            Cli {
                port: Some(3333),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:3333");
        assert_eq!(cfg.jwt_secret.unwrap().as_bytes(), b"from-env");
        clear_env();
    }

    #[test]
    #[serial]
    fn secret_is_redacted() {
        clear_env();
        let cfg = load_with("[auth]\njwt_secret=\"hunter2\"\n", Cli::default()).unwrap();
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("hunter2"));
    }
}
