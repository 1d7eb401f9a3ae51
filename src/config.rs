//! Configuration module for the stubd server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the stub responder
#[derive(Parser, Debug)]
#[command(name = "stubd")]
#[command(author = "stubd authors")]
#[command(version = "0.1.0")]
#[command(about = "A configurable multi-protocol stub responder", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host address to bind all listeners to
    #[arg(long)]
    pub host: Option<String>,

    /// Plain HTTP listener port
    #[arg(long)]
    pub http_port: Option<u16>,

    /// TLS-terminated HTTP listener port
    #[arg(long)]
    pub https_port: Option<u16>,

    /// Management API listener port
    #[arg(long)]
    pub management_port: Option<u16>,

    /// Base directory of the response template hierarchy
    #[arg(short = 'r', long)]
    pub response_dir: Option<PathBuf>,

    /// Default response delay in milliseconds (0 = immediate)
    #[arg(short = 'd', long)]
    pub default_delay_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub responses: ResponsesSection,
    #[serde(default)]
    pub delay: DelaySection,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Host address shared by every listener
    #[serde(default = "default_host")]
    pub host: String,
    /// Binary ports speaking length-framed XML
    #[serde(default = "default_xml_ports")]
    pub xml_ports: Vec<u16>,
    /// Binary ports speaking length-framed &key=value
    #[serde(default = "default_key_value_ports")]
    pub key_value_ports: Vec<u16>,
    /// Plain HTTP port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// TLS-terminated HTTP port
    #[serde(default = "default_https_port")]
    pub https_port: u16,
    /// Management API port
    #[serde(default = "default_management_port")]
    pub management_port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            xml_ports: default_xml_ports(),
            key_value_ports: default_key_value_ports(),
            http_port: default_http_port(),
            https_port: default_https_port(),
            management_port: default_management_port(),
        }
    }
}

/// Response template hierarchy configuration
#[derive(Debug, Deserialize)]
pub struct ResponsesSection {
    /// Base directory containing the stage/protocol tree
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
}

impl Default for ResponsesSection {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
        }
    }
}

/// Default delay behavior, mutable at runtime through the management API
#[derive(Debug, Deserialize, Default)]
pub struct DelaySection {
    /// Delay applied to every reply unless overridden per port
    #[serde(default)]
    pub default_ms: u64,
}

/// TLS material for the HTTPS listener. When either path is missing
/// the HTTPS listener is not started.
#[derive(Debug, Deserialize, Default)]
pub struct TlsSection {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_xml_ports() -> Vec<u16> {
    vec![8001, 8002, 8003, 8004]
}

fn default_key_value_ports() -> Vec<u16> {
    vec![18000, 19000, 20000, 10120]
}

fn default_http_port() -> u16 {
    80
}

fn default_https_port() -> u16 {
    443
}

fn default_management_port() -> u16 {
    9999
}

fn default_base_path() -> PathBuf {
    PathBuf::from("responses")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub xml_ports: Vec<u16>,
    pub key_value_ports: Vec<u16>,
    pub http_port: u16,
    pub https_port: u16,
    pub management_port: u16,
    pub response_dir: PathBuf,
    pub default_delay_ms: u64,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();
        Self::resolve(cli)
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            xml_ports: toml_config.server.xml_ports,
            key_value_ports: toml_config.server.key_value_ports,
            http_port: cli.http_port.unwrap_or(toml_config.server.http_port),
            https_port: cli.https_port.unwrap_or(toml_config.server.https_port),
            management_port: cli
                .management_port
                .unwrap_or(toml_config.server.management_port),
            response_dir: cli.response_dir.unwrap_or(toml_config.responses.base_path),
            default_delay_ms: cli
                .default_delay_ms
                .unwrap_or(toml_config.delay.default_ms),
            tls_cert_path: toml_config.tls.cert_path,
            tls_key_path: toml_config.tls.key_path,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// True when both certificate and key paths are present.
    pub fn tls_configured(&self) -> bool {
        self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
