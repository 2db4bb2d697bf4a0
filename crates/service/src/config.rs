//! Service configuration.
//!
//! Environment variables (all optional):
//! - `TOOLS_HOST` - bind address. Defaults to `0.0.0.0`.
//! - `TOOLS_PORT` - bind port. Defaults to `5000`.
//! - `PUBLIC_BASE_URL` - prefix for catalog paths and artifact URLs. Defaults to `http://localhost:5000`.
//! - `ARTIFACTS_DIR` - where generated files (the plot image) are written and served from. Defaults to `artifacts`.
//! - `EXTENSION_MODULE` - compiled route extension. Defaults to `extensions/target/wasm32-wasip1/release/routes.wasm`.
//! - `REGISTRATION_LOG` - append-only log of registry changes. Defaults to `registrations.log`.
//! - `WIKI_API_BASE` - summary lookup upstream. Defaults to `https://en.wikipedia.org/api/rest_v1`.
//! - `ARTICLES_PATH` - JSON documents for article search. Defaults to `articles.json`.
//! - `UPSTREAM_TIMEOUT_SECS` - timeout for upstream HTTP calls. Defaults to `10`.
//! - `EXTENSION_FUEL` - instructions one extension call may run before it is stopped.
//!   Defaults to `2000000000`.
//! - `DEBUG_MODE` - `true` blocks startup until a debugger attaches.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use toolsmith_core::extension_runner::DEFAULT_FUEL;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    Invalid(String, String),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub public_base_url: String,
    pub artifacts_dir: PathBuf,
    pub extension_module: PathBuf,
    pub registration_log: PathBuf,
    pub wiki_api_base: String,
    pub articles_path: PathBuf,
    pub upstream_timeout: Duration,
    pub extension_fuel: u64,
    pub debug_mode: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            public_base_url: "http://localhost:5000".to_string(),
            artifacts_dir: PathBuf::from("artifacts"),
            extension_module: PathBuf::from("extensions/target/wasm32-wasip1/release/routes.wasm"),
            registration_log: PathBuf::from("registrations.log"),
            wiki_api_base: "https://en.wikipedia.org/api/rest_v1".to_string(),
            articles_path: PathBuf::from("articles.json"),
            upstream_timeout: Duration::from_secs(10),
            extension_fuel: DEFAULT_FUEL,
            debug_mode: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup; unset variables keep their defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let upstream_secs = parse_or(&var, "UPSTREAM_TIMEOUT_SECS", defaults.upstream_timeout.as_secs())?;

        Ok(Self {
            host: var("TOOLS_HOST").unwrap_or(defaults.host),
            port: parse_or(&var, "TOOLS_PORT", defaults.port)?,
            public_base_url: var("PUBLIC_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
            artifacts_dir: var("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            extension_module: var("EXTENSION_MODULE")
                .map(PathBuf::from)
                .unwrap_or(defaults.extension_module),
            registration_log: var("REGISTRATION_LOG")
                .map(PathBuf::from)
                .unwrap_or(defaults.registration_log),
            wiki_api_base: var("WIKI_API_BASE")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.wiki_api_base),
            articles_path: var("ARTICLES_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.articles_path),
            upstream_timeout: Duration::from_secs(upstream_secs),
            extension_fuel: parse_or(&var, "EXTENSION_FUEL", defaults.extension_fuel)?,
            debug_mode: var("DEBUG_MODE")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name.to_string(), raw)),
        None => Ok(default),
    }
}
