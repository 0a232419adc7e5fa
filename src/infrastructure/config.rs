//! Relay configuration, loaded once at start-up and injected

use crate::infrastructure::errors::ConfigError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_UPSTREAM: &str = "http://localhost:11434";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_CLIENT_BUILD_DIR: &str = "client/build";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL of the inference server, without trailing slash.
    pub upstream_base_url: String,
    pub port: u16,
    /// Built web client, served as static files.
    pub client_build_dir: PathBuf,
    /// Maximum silence between two upstream chunks. `None` waits forever.
    pub stream_idle_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            upstream_base_url: DEFAULT_UPSTREAM.to_owned(),
            port: DEFAULT_PORT,
            client_build_dir: PathBuf::from(DEFAULT_CLIENT_BUILD_DIR),
            stream_idle_timeout: None,
        }
    }
}

impl RelayConfig {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<RelayConfig, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<RelayConfig, ConfigError> {
        let defaults = RelayConfig::default();

        let upstream_base_url = lookup("OLLAMA_API")
            .map(|url| url.trim_end_matches('/').to_owned())
            .unwrap_or(defaults.upstream_base_url);

        let port = match lookup("PORT") {
            Some(value) => parse("PORT", value)?,
            None => defaults.port,
        };

        let client_build_dir = lookup("CLIENT_BUILD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.client_build_dir);

        let stream_idle_timeout = match lookup("STREAM_IDLE_TIMEOUT_SECS") {
            Some(value) => Some(Duration::from_secs(parse("STREAM_IDLE_TIMEOUT_SECS", value)?)),
            None => None,
        };

        Ok(RelayConfig {
            upstream_base_url,
            port,
            client_build_dir,
            stream_idle_timeout,
        })
    }

    pub fn with_upstream(upstream_base_url: impl Into<String>) -> RelayConfig {
        RelayConfig {
            upstream_base_url: upstream_base_url.into().trim_end_matches('/').to_owned(),
            ..RelayConfig::default()
        }
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value })
}
