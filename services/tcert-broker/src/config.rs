//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The authority token is loaded from the TCA_TOKEN env var or token_file,
//! never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tcert_pool::PoolConfig;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    pub store: StoreConfig,
    pub authority: AuthorityConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Where unused and used tcerts are persisted
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// Certificate authority gateway settings
#[derive(Debug, Deserialize)]
pub struct AuthorityConfig {
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Path to a file containing the bearer token (alternative to TCA_TOKEN)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    256
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Token resolution order:
    /// 1. TCA_TOKEN env var
    /// 2. token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.authority.url.starts_with("http://")
            && !config.authority.url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "authority url must start with http:// or https://, got: {}",
                config.authority.url
            )));
        }

        if config.authority.timeout_secs == 0 {
            return Err(common::Error::Config(
                "authority timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        config
            .pool
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;

        if let Ok(token) = std::env::var("TCA_TOKEN") {
            config.authority.token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.authority.token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.authority.token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("tcert-broker.toml")
    }
}
