//! Host settings, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Missing(String),

    #[error("{0} has an invalid value '{1}'")]
    Invalid(String, String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// Base URL of the tool registry service.
    pub tools_base_url: String,
    /// Root of the guest workspace holding the route sources.
    pub extensions_root: PathBuf,
    pub orchestrator_max_steps: usize,
    pub coder_max_steps: usize,
    pub http_timeout: Duration,
    pub http_retries: u32,
    /// How long the coder waits for the service to pick up a new build.
    pub reload_wait: Duration,
    pub orchestrator_model: Option<String>,
    pub coder_model: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tools_base_url: "http://localhost:5000".to_string(),
            extensions_root: PathBuf::from("extensions"),
            orchestrator_max_steps: 12,
            coder_max_steps: 30,
            http_timeout: Duration::from_secs(30),
            http_retries: 3,
            reload_wait: Duration::from_secs(60),
            orchestrator_model: None,
            coder_model: None,
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let tools_base_url = match var("TOOLS_BASE_URL") {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::Missing("TOOLS_BASE_URL".into()))
            }
            Some(url) => url.trim().trim_end_matches('/').to_string(),
            None => defaults.tools_base_url,
        };

        Ok(Self {
            tools_base_url,
            extensions_root: var("EXTENSIONS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.extensions_root),
            orchestrator_max_steps: parse_or(
                &var,
                "ORCHESTRATOR_MAX_STEPS",
                defaults.orchestrator_max_steps,
            )?,
            coder_max_steps: parse_or(&var, "CODER_MAX_STEPS", defaults.coder_max_steps)?,
            http_timeout: Duration::from_secs(parse_or(&var, "HTTP_TIMEOUT_SECS", 30)?),
            http_retries: parse_or(&var, "HTTP_RETRIES", defaults.http_retries)?,
            reload_wait: Duration::from_secs(parse_or(&var, "RELOAD_WAIT_SECS", 60)?),
            orchestrator_model: var("ORCHESTRATOR_MODEL").filter(|m| !m.trim().is_empty()),
            coder_model: var("CODER_MODEL").filter(|m| !m.trim().is_empty()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key.to_string(), raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(HostConfig::from_vars(vars(&[])).unwrap(), HostConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = HostConfig::from_vars(vars(&[
            ("TOOLS_BASE_URL", "http://tools:8080/"),
            ("CODER_MAX_STEPS", "5"),
            ("RELOAD_WAIT_SECS", "2"),
            ("CODER_MODEL", "gpt-4.1"),
        ]))
        .unwrap();
        assert_eq!(config.tools_base_url, "http://tools:8080");
        assert_eq!(config.coder_max_steps, 5);
        assert_eq!(config.reload_wait, Duration::from_secs(2));
        assert_eq!(config.coder_model.as_deref(), Some("gpt-4.1"));
        assert_eq!(config.orchestrator_model, None);
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            HostConfig::from_vars(vars(&[("HTTP_RETRIES", "many")])),
            Err(ConfigError::Invalid("HTTP_RETRIES".into(), "many".into()))
        );
        assert_eq!(
            HostConfig::from_vars(vars(&[("TOOLS_BASE_URL", " ")])),
            Err(ConfigError::Missing("TOOLS_BASE_URL".into()))
        );
    }
}
