//! Configuration module for the action item echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

use crate::routers::{RouterKind, ServeOptions};

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "action-items")]
#[command(version)]
#[command(about = "Action item echo service on several HTTP routing layers", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host (IP address) the derived services bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port of the first routing layer; the others follow consecutively
    #[arg(short = 'p', long)]
    pub base_port: Option<u16>,

    /// Routing layers to run (comma-separated, default: all)
    #[arg(short = 'r', long, value_enum, value_delimiter = ',')]
    pub routers: Vec<RouterKind>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections per service
    #[arg(long)]
    pub max_connections: Option<u32>,

    /// Maximum request body size in bytes
    #[arg(long)]
    pub max_body_size: Option<usize>,

    /// Keep the other services running when one of them fails
    #[arg(long)]
    pub keep_going: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Explicit services; when present they replace the derived ones.
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Number of runtime worker threads
    pub workers: Option<usize>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Stop every service as soon as one fails
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            base_port: default_base_port(),
            workers: None,
            max_connections: default_max_connections(),
            max_body_size: default_max_body_size(),
            fail_fast: default_fail_fast(),
        }
    }
}

/// One `[[services]]` table
#[derive(Debug, Deserialize)]
pub struct ServiceEntry {
    pub router: RouterKind,
    /// Socket address, e.g. "127.0.0.1:9001"
    pub listen: String,
    pub greeting: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_base_port() -> u16 {
    8001
}

fn default_max_connections() -> u32 {
    10_000
}

fn default_max_body_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_fail_fast() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A single echo service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub router: RouterKind,
    pub listen: SocketAddr,
    pub greeting: String,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub services: Vec<ServiceConfig>,
    pub options: ServeOptions,
    pub workers: Option<usize>,
    pub fail_fast: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point to (if any).
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path).map_err(|source| {
                ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                }
            })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let server = toml_config.server;

        let services = if toml_config.services.is_empty() {
            let host = cli.host.unwrap_or(server.host);
            let base_port = cli.base_port.unwrap_or(server.base_port);
            derive_services(&host, base_port, &cli.routers)?
        } else {
            explicit_services(toml_config.services, &cli.routers)?
        };

        if services.is_empty() {
            return Err(ConfigError::NoServices);
        }
        check_unique(&services)?;

        let options = ServeOptions {
            max_connections: cli.max_connections.unwrap_or(server.max_connections),
            max_body_size: cli.max_body_size.unwrap_or(server.max_body_size),
        };
        if options.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1"));
        }

        let workers = cli.workers.or(server.workers);
        if workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1"));
        }

        Ok(Config {
            services,
            options,
            workers,
            fail_fast: server.fail_fast && !cli.keep_going,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// One service per selected router, on consecutive ports from `base_port`.
fn derive_services(
    host: &str,
    base_port: u16,
    routers: &[RouterKind],
) -> Result<Vec<ServiceConfig>, ConfigError> {
    let ip: IpAddr = host
        .parse()
        .map_err(|_| ConfigError::InvalidHost(host.to_string()))?;

    let selected = if routers.is_empty() {
        &RouterKind::ALL[..]
    } else {
        routers
    };

    let mut services = Vec::with_capacity(selected.len());
    for &router in selected {
        if services.iter().any(|s: &ServiceConfig| s.router == router) {
            continue;
        }
        // Port 0 stays ephemeral for every router.
        let port = if base_port == 0 {
            0
        } else {
            base_port
                .checked_add(router.port_offset())
                .ok_or(ConfigError::PortOverflow { router, base_port })?
        };
        services.push(ServiceConfig {
            router,
            listen: SocketAddr::new(ip, port),
            greeting: router.default_greeting(),
        });
    }
    Ok(services)
}

/// Services from `[[services]]`, narrowed to `routers` when given.
fn explicit_services(
    entries: Vec<ServiceEntry>,
    routers: &[RouterKind],
) -> Result<Vec<ServiceConfig>, ConfigError> {
    entries
        .into_iter()
        .filter(|entry| routers.is_empty() || routers.contains(&entry.router))
        .map(|entry| {
            let listen = entry
                .listen
                .parse()
                .map_err(|source| ConfigError::InvalidListen {
                    listen: entry.listen.clone(),
                    source,
                })?;
            Ok(ServiceConfig {
                router: entry.router,
                listen,
                greeting: entry
                    .greeting
                    .unwrap_or_else(|| entry.router.default_greeting()),
            })
        })
        .collect()
}

fn check_unique(services: &[ServiceConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for service in services {
        if service.listen.port() != 0 && !seen.insert(service.listen) {
            return Err(ConfigError::DuplicateListen(service.listen));
        }
    }
    Ok(())
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid host '{0}': expected an IP address")]
    InvalidHost(String),

    #[error("Invalid listen address '{listen}': {source}")]
    InvalidListen {
        listen: String,
        source: AddrParseError,
    },

    #[error("Port for {router} overflows base port {base_port}")]
    PortOverflow { router: RouterKind, base_port: u16 },

    #[error("Listen address {0} is used by more than one service")]
    DuplicateListen(SocketAddr),

    #[error("No services selected")]
    NoServices,

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("action-items").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.base_port, 8001);
        assert_eq!(config.server.max_connections, 10_000);
        assert_eq!(config.server.max_body_size, 1024 * 1024);
        assert!(config.server.fail_fast);
        assert!(config.services.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_default_services() {
        let config = Config::from_args(cli(&[])).unwrap();
        let listens: Vec<(RouterKind, String)> = config
            .services
            .iter()
            .map(|s| (s.router, s.listen.to_string()))
            .collect();
        assert_eq!(
            listens,
            vec![
                (RouterKind::Axum, "127.0.0.1:8001".to_string()),
                (RouterKind::Hyper, "127.0.0.1:8002".to_string()),
                (RouterKind::Native, "127.0.0.1:8003".to_string()),
            ]
        );
        assert_eq!(config.services[2].greeting, "Hello world from native!");
        assert!(config.fail_fast);
        assert_eq!(config.workers, None);
    }

    #[test]
    fn test_cli_selection() {
        let config = Config::from_args(cli(&[
            "--host",
            "0.0.0.0",
            "-p",
            "9000",
            "-r",
            "native,axum",
            "--keep-going",
            "--log-level",
            "debug",
        ]))
        .unwrap();

        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].router, RouterKind::Native);
        assert_eq!(config.services[0].listen.to_string(), "0.0.0.0:9002");
        assert_eq!(config.services[1].listen.to_string(), "0.0.0.0:9000");
        assert!(!config.fail_fast);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            base_port = 7000
            workers = 4
            max_connections = 128
            max_body_size = 4096
            fail_fast = false

            [[services]]
            router = "hyper"
            listen = "127.0.0.1:9101"
            greeting = "Hi from hyper"

            [[services]]
            router = "native"
            listen = "127.0.0.1:9102"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.base_port, 7000);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.max_connections, 128);
        assert_eq!(config.server.max_body_size, 4096);
        assert!(!config.server.fail_fast);
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].router, RouterKind::Hyper);
        assert_eq!(config.services[0].greeting.as_deref(), Some("Hi from hyper"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [server]
            max_connections = 128
            max_body_size = 4096
            workers = 2

            [[services]]
            router = "axum"
            listen = "127.0.0.1:9201"

            [[services]]
            router = "hyper"
            listen = "127.0.0.1:9202"
            greeting = "custom"

            [logging]
            level = "warn"
            "#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let config =
            Config::from_args(cli(&["-c", path, "--max-body-size", "10", "-r", "hyper"])).unwrap();
        assert_eq!(
            config.services,
            vec![ServiceConfig {
                router: RouterKind::Hyper,
                listen: "127.0.0.1:9202".parse().unwrap(),
                greeting: "custom".to_string(),
            }]
        );
        assert_eq!(config.options.max_connections, 128);
        assert_eq!(config.options.max_body_size, 10);
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_args(cli(&["-c", "/nonexistent/action-items.toml"])).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_invalid_configs() {
        let parse = |s: &str| -> TomlConfig { toml::from_str(s).unwrap() };

        let err = Config::merge(
            cli(&[]),
            parse("[[services]]\nrouter = \"axum\"\nlisten = \"nowhere\""),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen { .. }));

        let err = Config::merge(
            cli(&[]),
            parse(
                "[[services]]\nrouter = \"axum\"\nlisten = \"127.0.0.1:9000\"\n\
                 [[services]]\nrouter = \"hyper\"\nlisten = \"127.0.0.1:9000\"",
            ),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateListen(_)));

        let err = Config::merge(
            cli(&["-r", "native"]),
            parse("[[services]]\nrouter = \"axum\"\nlisten = \"127.0.0.1:9000\""),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoServices));

        let err = Config::from_args(cli(&["--host", "localhost"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHost(_)));

        let err = Config::from_args(cli(&["-p", "65535"])).unwrap_err();
        assert!(matches!(err, ConfigError::PortOverflow { .. }));

        let err = Config::from_args(cli(&["--max-connections", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let unknown_router = "[[services]]\nrouter = \"gin\"\nlisten = \"127.0.0.1:1\"";
        assert!(toml::from_str::<TomlConfig>(unknown_router).is_err());
    }

    #[test]
    fn test_ephemeral_ports_may_repeat() {
        let config = Config::from_args(cli(&["-p", "0"])).unwrap();
        assert!(config.services.iter().all(|s| s.listen.port() == 0));
        assert_eq!(config.services.len(), 3);
    }
}
