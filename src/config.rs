use serde::Deserialize;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Largest soil report accepted by the document insight endpoint (5 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub google_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub model_dir: String,
    pub use_gemini: bool,
    pub llm_timeout_secs: u64,
    pub llm_max_attempts: u32,
    pub llm_retry_delay_ms: u64,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let use_gemini = parse_bool("USE_GEMINI", true)?;

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            google_api_key: match std::env::var("GOOGLE_API_KEY") {
                Ok(key) if !key.trim().is_empty() => key,
                Ok(_) if use_gemini => anyhow::bail!("GOOGLE_API_KEY cannot be empty"),
                Err(_) if use_gemini => anyhow::bail!(
                    "GOOGLE_API_KEY environment variable required (or set USE_GEMINI=false)"
                ),
                _ => String::new(),
            },
            gemini_base_url: validate_base_url(
                std::env::var("GEMINI_BASE_URL")
                    .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            )?,
            gemini_model: std::env::var("GEMINI_MODEL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            model_dir: std::env::var("MODEL_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "model".to_string()),
            use_gemini,
            llm_timeout_secs: parse_number("LLM_TIMEOUT_SECS", 60)?,
            llm_max_attempts: parse_number("LLM_MAX_ATTEMPTS", 3)?,
            llm_retry_delay_ms: parse_number("LLM_RETRY_DELAY_MS", 1500)?,
            max_upload_bytes: parse_number("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        };

        if config.llm_max_attempts == 0 {
            anyhow::bail!("LLM_MAX_ATTEMPTS must be at least 1");
        }
        if config.llm_timeout_secs == 0 {
            anyhow::bail!("LLM_TIMEOUT_SECS must be at least 1");
        }

        // Never log the API key itself
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Gemini Base URL: {}", config.gemini_base_url);
        tracing::debug!("Gemini model: {}", config.gemini_model);
        tracing::debug!("Model directory: {}", config.model_dir);
        if !config.use_gemini {
            tracing::warn!("USE_GEMINI=false: inference calls return canned offline data");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Retry policy shared by every call to the inference service.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm_max_attempts,
            base_delay: Duration::from_millis(self.llm_retry_delay_ms),
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

impl Default for Config {
    /// Offline defaults, used by tests and local tooling.
    fn default() -> Self {
        Self {
            port: 8000,
            google_api_key: String::new(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            gemini_model: "gemini-2.5-flash".to_string(),
            model_dir: "model".to_string(),
            use_gemini: false,
            llm_timeout_secs: 60,
            llm_max_attempts: 3,
            llm_retry_delay_ms: 1500,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

fn validate_base_url(raw: String) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/').to_string();
    if trimmed.is_empty() {
        anyhow::bail!("GEMINI_BASE_URL cannot be empty");
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        anyhow::bail!("GEMINI_BASE_URL must start with http:// or https://");
    }
    url::Url::parse(&trimmed)
        .map_err(|e| anyhow::anyhow!("GEMINI_BASE_URL is not a valid URL: {}", e))?;
    Ok(trimmed)
}

fn parse_bool(name: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("{} must be true or false, got '{}'", name, other),
        },
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) if raw.trim().is_empty() => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative number, got '{}'", name, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_trimmed() {
        let url = validate_base_url("https://example.com/".to_string()).unwrap();
        assert_eq!(url, "https://example.com");
    }

    #[test]
    fn test_base_url_requires_scheme() {
        assert!(validate_base_url("example.com".to_string()).is_err());
        assert!(validate_base_url("   ".to_string()).is_err());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = Config {
            llm_max_attempts: 5,
            llm_retry_delay_ms: 250,
            ..Config::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }
}
