use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_text_model: String,
    pub gemini_vision_model: String,
    pub gemini_search_model: String,
    pub gemini_request_timeout: Duration,
    pub media_download_timeout: Duration,
    pub telegram_max_length: usize,
}

fn env_string(lookup: &dyn Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u64(lookup: &dyn Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    match lookup(name) {
        Some(value) => match value.trim().parse::<u64>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid {} value '{}'; using default {}.", name, value, default);
                default
            }
        },
        None => default,
    }
}

fn env_usize(lookup: &dyn Fn(&str) -> Option<String>, name: &str, default: usize) -> usize {
    lookup(name)
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn required(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("{name} environment variable not set"))
}

fn normalize_base_url(value: String) -> String {
    value.trim_end_matches('/').to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// A missing `GEMINI_API_KEY` or `BOT_TOKEN` refuses startup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;

        let gemini_api_key = required(lookup, "GEMINI_API_KEY")?;
        let bot_token = required(lookup, "BOT_TOKEN")?;

        let timeout_seconds = env_u64(lookup, "GEMINI_REQUEST_TIMEOUT_SECONDS", 90).max(1);
        let download_seconds = env_u64(lookup, "MEDIA_DOWNLOAD_TIMEOUT_SECONDS", 30).max(1);

        Ok(Config {
            bot_token,
            log_level: env_string(lookup, "LOG_LEVEL", "info").to_lowercase(),
            log_dir: PathBuf::from(env_string(lookup, "LOG_DIR", "logs")),
            gemini_api_key,
            gemini_base_url: normalize_base_url(env_string(
                lookup,
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            )),
            gemini_text_model: env_string(lookup, "GEMINI_TEXT_MODEL", "gemini-2.5-pro"),
            gemini_vision_model: env_string(lookup, "GEMINI_VISION_MODEL", "gemini-2.5-flash"),
            gemini_search_model: env_string(lookup, "GEMINI_SEARCH_MODEL", "gemini-2.5-flash"),
            gemini_request_timeout: Duration::from_secs(timeout_seconds),
            media_download_timeout: Duration::from_secs(download_seconds),
            telegram_max_length: env_usize(lookup, "TELEGRAM_MAX_LENGTH", 4000).max(500),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name: &str| values.get(name).cloned()
    }

    #[test]
    fn refuses_to_start_without_api_key() {
        let err = Config::from_lookup(lookup_from(&[("BOT_TOKEN", "123:abc")])).unwrap_err();
        assert_eq!(err.to_string(), "GEMINI_API_KEY environment variable not set");
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let result = Config::from_lookup(lookup_from(&[
            ("BOT_TOKEN", "123:abc"),
            ("GEMINI_API_KEY", "   "),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn applies_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("BOT_TOKEN", "123:abc"),
            ("GEMINI_API_KEY", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.gemini_text_model, "gemini-2.5-pro");
        assert_eq!(config.gemini_vision_model, "gemini-2.5-flash");
        assert_eq!(config.gemini_search_model, "gemini-2.5-flash");
        assert_eq!(config.gemini_request_timeout, Duration::from_secs(90));
        assert_eq!(config.telegram_max_length, 4000);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn overrides_and_trims_base_url() {
        let config = Config::from_lookup(lookup_from(&[
            ("BOT_TOKEN", "123:abc"),
            ("GEMINI_API_KEY", "secret"),
            ("GEMINI_BASE_URL", "http://localhost:8080/v1beta/"),
            ("GEMINI_REQUEST_TIMEOUT_SECONDS", "not-a-number"),
            ("LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();

        assert_eq!(config.gemini_base_url, "http://localhost:8080/v1beta");
        assert_eq!(config.gemini_request_timeout, Duration::from_secs(90));
        assert_eq!(config.log_level, "debug");
    }
}
