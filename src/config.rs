use crate::chunks::ChunkBounds;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Which translation provider the process uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Returns text unchanged
    Dummy,
    /// JSON translation API at `TRANSLATION_API_URL`
    Http,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_url: Option<String>,
    pub content_file: PathBuf,

    // Provider
    pub provider: ProviderKind,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub max_texts: usize,
    pub max_request_bytes: usize,
    pub max_parallel: usize,
    /// Tries per provider request, including the first
    pub max_attempts: u32,

    // Lifecycle
    pub shutdown_grace_secs: u64,
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let provider = match std::env::var("TRANSLATION_PROVIDER")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "" | "dummy" => ProviderKind::Dummy,
            "http" => ProviderKind::Http,
            other => {
                warn!("Unknown TRANSLATION_PROVIDER '{}', using dummy", other);
                ProviderKind::Dummy
            }
        };

        let api_url = non_empty("TRANSLATION_API_URL");
        if provider == ProviderKind::Http {
            api_url
                .as_ref()
                .context("TRANSLATION_API_URL not set (required for the http provider)")?;
        }

        Ok(Self {
            // Storage
            database_url: non_empty("DATABASE_URL"),
            content_file: std::env::var("CONTENT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/content.json")),

            // Provider
            provider,
            api_url,
            api_key: non_empty("TRANSLATION_API_KEY"),
            max_texts: parse_or("TRANSLATION_MAX_TEXTS", 50),
            max_request_bytes: parse_or("TRANSLATION_MAX_REQUEST_BYTES", 128 * 1024),
            max_parallel: parse_or("TRANSLATION_MAX_PARALLEL", 4),
            max_attempts: parse_or("TRANSLATION_MAX_ATTEMPTS", 3),

            // Lifecycle
            shutdown_grace_secs: parse_or("SHUTDOWN_GRACE_SECS", 10),
        })
    }

    /// Request limits for the http provider
    pub fn chunk_bounds(&self) -> ChunkBounds {
        ChunkBounds::new(self.max_texts, self.max_request_bytes)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 10] = [
        "DATABASE_URL",
        "CONTENT_FILE",
        "TRANSLATION_PROVIDER",
        "TRANSLATION_API_URL",
        "TRANSLATION_API_KEY",
        "TRANSLATION_MAX_TEXTS",
        "TRANSLATION_MAX_REQUEST_BYTES",
        "TRANSLATION_MAX_PARALLEL",
        "TRANSLATION_MAX_ATTEMPTS",
        "SHUTDOWN_GRACE_SECS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::from_env().expect("Should load");

        assert_eq!(config.database_url, None);
        assert_eq!(config.content_file, PathBuf::from("data/content.json"));
        assert_eq!(config.provider, ProviderKind::Dummy);
        assert_eq!(config.chunk_bounds(), ChunkBounds::new(50, 131072));
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
    }

    #[test]
    #[serial]
    fn test_http_provider_requires_url() {
        clear_env();
        std::env::set_var("TRANSLATION_PROVIDER", "http");
        let result = Config::from_env();
        assert!(result.unwrap_err().to_string().contains("TRANSLATION_API_URL"));

        std::env::set_var("TRANSLATION_API_URL", "http://localhost:9000/translate");
        std::env::set_var("TRANSLATION_API_KEY", "secret");
        let config = Config::from_env().expect("Should load");
        assert_eq!(config.provider, ProviderKind::Http);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_unknown_provider_falls_back() {
        clear_env();
        std::env::set_var("TRANSLATION_PROVIDER", "carrier-pigeon");
        let config = Config::from_env().expect("Should load");
        assert_eq!(config.provider, ProviderKind::Dummy);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_numbers_use_defaults() {
        clear_env();
        std::env::set_var("TRANSLATION_MAX_TEXTS", "lots");
        std::env::set_var("TRANSLATION_MAX_PARALLEL", "8");
        std::env::set_var("TRANSLATION_MAX_ATTEMPTS", "5");
        std::env::set_var("SHUTDOWN_GRACE_SECS", "-1");
        let config = Config::from_env().expect("Should load");

        assert_eq!(config.max_texts, 50);
        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.shutdown_grace_secs, 10);
        clear_env();
    }
}
