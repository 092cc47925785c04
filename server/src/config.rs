use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Command line options for the room server.
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
}

/// Upstream places/geocoding API settings.
#[derive(Clone)]
pub struct PlacesConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Upstream chat completions API used for restaurant descriptions.
#[derive(Clone)]
pub struct AiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl std::fmt::Debug for PlacesConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacesConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl std::fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .finish()
    }
}

/// Runtime configuration for the server resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Directory holding the room database and the token secret.
    pub data_dir: PathBuf,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    pub places: PlacesConfig,
    pub ai: AiConfig,
    /// Participants not seen for this long are marked offline.
    pub presence_timeout: Duration,
    /// Rooms idle for this long are deleted.
    pub room_ttl: Duration,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    places: FilePlaces,
    #[serde(default)]
    ai: FileAi,
    #[serde(default)]
    rooms: FileRooms,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    data_dir: Option<PathBuf>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize, Default)]
struct FilePlaces {
    base_url: Option<String>,
    api_key: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileAi {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct FileRooms {
    #[serde(default = "default_presence_timeout")]
    presence_timeout_secs: u64,
    #[serde(default = "default_ttl_hours")]
    ttl_hours: u64,
}

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
}

fn default_presence_timeout() -> u64 {
    30
}

fn default_ttl_hours() -> u64 {
    24
}

pub const DEFAULT_PLACES_URL: &str = "https://maps.googleapis.com/maps/api";
pub const DEFAULT_AI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: None,
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

impl Default for FileRooms {
    fn default() -> Self {
        Self {
            presence_timeout_secs: default_presence_timeout(),
            ttl_hours: default_ttl_hours(),
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
            .or_else(|| std::env::var("TOSS_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/toss_server.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };

        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;

        // environment overrides
        if let Ok(p) = std::env::var("TOSS_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("TOSS_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
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

        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .ok()
            .or(file_cfg.server.data_dir)
            .unwrap_or_else(default_data_dir);

        let places = PlacesConfig {
            base_url: std::env::var("PLACES_BASE_URL")
                .ok()
                .or(file_cfg.places.base_url)
                .unwrap_or_else(|| DEFAULT_PLACES_URL.into()),
            api_key: std::env::var("PLACES_API_KEY")
                .ok()
                .or(file_cfg.places.api_key),
        };
        let ai = AiConfig {
            base_url: std::env::var("AI_BASE_URL")
                .ok()
                .or(file_cfg.ai.base_url)
                .unwrap_or_else(|| DEFAULT_AI_URL.into()),
            api_key: std::env::var("AI_API_KEY").ok().or(file_cfg.ai.api_key),
            model: file_cfg
                .ai
                .model
                .unwrap_or_else(|| DEFAULT_AI_MODEL.into()),
        };

        Ok(Self {
            bind,
            data_dir,
            logging_enabled: logging,
            places,
            ai,
            presence_timeout: Duration::from_secs(file_cfg.rooms.presence_timeout_secs),
            room_ttl: Duration::from_secs(file_cfg.rooms.ttl_hours * 3600),
        })
    }

    /// Configuration for tests and embedding: everything local, no upstream keys.
    pub fn for_data_dir(bind: String, data_dir: PathBuf) -> Self {
        Self {
            bind,
            data_dir,
            logging_enabled: false,
            places: PlacesConfig {
                base_url: DEFAULT_PLACES_URL.into(),
                api_key: None,
            },
            ai: AiConfig {
                base_url: DEFAULT_AI_URL.into(),
                api_key: None,
                model: DEFAULT_AI_MODEL.into(),
            },
            presence_timeout: Duration::from_secs(default_presence_timeout()),
            room_ttl: Duration::from_secs(default_ttl_hours() * 3600),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("rooms.db")
    }

    pub fn secret_path(&self) -> PathBuf {
        self.data_dir.join("secret.key")
    }
}

/// Determine the default data directory for the server.
pub fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".local/share/toss_server");
        p
    } else {
        PathBuf::from("./toss_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        for key in [
            "TOSS_PORT",
            "TOSS_LOGGING",
            "BIND",
            "PLACES_BASE_URL",
            "PLACES_API_KEY",
            "AI_BASE_URL",
            "AI_API_KEY",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(
            &path,
            "[server]\nport=5555\n[logging]\nenabled=false\n\
             [places]\napi_key=\"k\"\n[rooms]\npresence_timeout_secs=5\n",
        )
        .unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:5555");
        assert!(!cfg.logging_enabled);
        assert_eq!(cfg.places.api_key.as_deref(), Some("k"));
        assert_eq!(cfg.presence_timeout, Duration::from_secs(5));
        assert_eq!(cfg.room_ttl, Duration::from_secs(24 * 3600));
    }

    #[test]
    #[serial]
    fn invalid_port_fails() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "[server]\nport=80\n").unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        assert!(Config::load(&cli).is_err());
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "").unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8787");
        assert!(cfg.logging_enabled);
        assert_eq!(cfg.places.base_url, DEFAULT_PLACES_URL);
        assert!(cfg.ai.api_key.is_none());
        assert_eq!(cfg.ai.model, DEFAULT_AI_MODEL);
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "[server]\nport=4000\n[places]\nbase_url=\"http://file\"\n").unwrap();
        std::env::set_var("TOSS_PORT", "5000");
        std::env::set_var("PLACES_BASE_URL", "http://env");
        let cli = Cli {
            config: Some(path.clone()),
            ..Default::default()
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:5000");
        assert_eq!(cfg.places.base_url, "http://env");
        let cli = Cli {
            config: Some(path),
            port: Some(6000),
            ..Default::default()
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:6000");
        clear_env();
    }

    #[test]
    fn secrets_are_redacted() {
        let mut cfg = Config::for_data_dir("127.0.0.1:0".into(), PathBuf::from("/tmp"));
        cfg.ai.api_key = Some("sk-secret".into());
        let out = format!("{:?}", cfg);
        assert!(!out.contains("sk-secret"));
        assert!(out.contains("<redacted>"));
    }
}
