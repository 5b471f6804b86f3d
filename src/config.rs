//! Application settings loaded from environment variables.
//!
//! The configuration loader itself is an external collaborator (out of scope
//! per the purpose statement), but the core still needs a typed settings
//! value to construct its adapters at startup. Field names mirror the
//! upper-snake env vars 1:1, same as the Python original's `Settings`.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_url: String,
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub jina_api_key: String,

    pub backend_port: u16,
    pub backend_host: String,
    pub log_level: String,

    pub qdrant_url: String,
    pub qdrant_collection: String,

    pub postgres_url: String,

    pub redis_url: String,
    pub redis_ttl_seconds: u64,

    pub max_file_size_bytes: u64,
    pub max_archive_size_bytes: u64,

    pub embedding_batch_size: usize,
    pub chunk_min_tokens: usize,
    pub chunk_max_tokens: usize,
    pub default_top_k_results: usize,
    pub max_top_k_results: usize,

    pub retry_initial_interval_seconds: u64,
    pub retry_max_interval_seconds: u64,
    pub retry_max_elapsed_time_seconds: u64,

    pub rate_limit_per_hour: u32,
    pub rate_limit_concurrent_queries: usize,

    pub storage_path: String,

    pub enable_secret_detection: bool,
    pub session_timeout_seconds: u64,
    pub session_retention_days: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("environment variable {0} must be set (found placeholder value)")]
    Placeholder(&'static str),
    #[error("environment variable {0} is not a valid {1}: {2}")]
    Invalid(&'static str, &'static str, String),
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    let v = env::var(key).map_err(|_| ConfigError::Missing(key))?;
    if v.is_empty() || v.starts_with("your_") {
        return Err(ConfigError::Placeholder(key));
    }
    Ok(v)
}

fn optional(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_parsed<T: std::str::FromStr>(
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v.parse().map_err(|_| {
            ConfigError::Invalid(key, std::any::type_name::<T>(), v)
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let redis_host = optional("REDIS_HOST", "redis");
        let redis_port: u16 = optional_parsed("REDIS_PORT", 6379)?;
        let redis_db: u32 = optional_parsed("REDIS_DB", 0)?;
        let redis_password = env::var("REDIS_PASSWORD").ok();
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| match &redis_password {
            Some(pw) => format!("redis://:{pw}@{redis_host}:{redis_port}/{redis_db}"),
            None => format!("redis://{redis_host}:{redis_port}/{redis_db}"),
        });

        let postgres_host = optional("POSTGRES_HOST", "postgres");
        let postgres_port: u16 = optional_parsed("POSTGRES_PORT", 5432)?;
        let postgres_user = optional("POSTGRES_USER", "postgres");
        let postgres_password = optional("POSTGRES_PASSWORD", "postgres");
        let app_db_name = optional("APP_DB_NAME", "coderag");
        let postgres_url = env::var("POSTGRES_URL").unwrap_or_else(|_| {
            format!(
                "postgres://{postgres_user}:{postgres_password}@{postgres_host}:{postgres_port}/{app_db_name}"
            )
        });

        let qdrant_host = optional("QDRANT_HOST", "qdrant");
        let qdrant_port: u16 = optional_parsed("QDRANT_PORT", 6334)?;
        let qdrant_url = env::var("QDRANT_URL")
            .unwrap_or_else(|_| format!("http://{qdrant_host}:{qdrant_port}"));

        Ok(Config {
            anthropic_api_url: optional("ANTHROPIC_API_URL", "https://api.anthropic.com"),
            anthropic_api_key: required("ANTHROPIC_API_KEY")?,
            anthropic_model: optional("ANTHROPIC_MODEL", "claude-3-5-sonnet-20241022"),
            jina_api_key: required("JINA_API_KEY")?,

            backend_port: optional_parsed("BACKEND_PORT", 8000)?,
            backend_host: optional("BACKEND_HOST", "0.0.0.0"),
            log_level: optional("LOG_LEVEL", "info"),

            qdrant_url,
            qdrant_collection: optional("QDRANT_COLLECTION", "code_chunks"),

            postgres_url,

            redis_url,
            redis_ttl_seconds: optional_parsed("REDIS_TTL_SECONDS", 604_800)?,

            max_file_size_bytes: optional_parsed("MAX_FILE_SIZE_BYTES", 1_048_576)?,
            max_archive_size_bytes: optional_parsed("MAX_ARCHIVE_SIZE_BYTES", 104_857_600)?,

            embedding_batch_size: optional_parsed("EMBEDDING_BATCH_SIZE", 100)?,
            chunk_min_tokens: optional_parsed("CHUNK_MIN_TOKENS", 50)?,
            chunk_max_tokens: optional_parsed("CHUNK_MAX_TOKENS", 1024)?,
            default_top_k_results: optional_parsed("DEFAULT_TOP_K_RESULTS", 5)?,
            max_top_k_results: optional_parsed("MAX_TOP_K_RESULTS", 20)?,

            retry_initial_interval_seconds: optional_parsed("RETRY_INITIAL_INTERVAL_SECONDS", 2)?,
            retry_max_interval_seconds: optional_parsed("RETRY_MAX_INTERVAL_SECONDS", 60)?,
            retry_max_elapsed_time_seconds: optional_parsed(
                "RETRY_MAX_ELAPSED_TIME_SECONDS",
                1800,
            )?,

            rate_limit_per_hour: optional_parsed("RATE_LIMIT_PER_HOUR", 100)?,
            rate_limit_concurrent_queries: optional_parsed(
                "RATE_LIMIT_CONCURRENT_QUERIES",
                10,
            )?,

            storage_path: optional("STORAGE_PATH", "storage/codebases"),

            enable_secret_detection: optional_parsed("ENABLE_SECRET_DETECTION", true)?,
            session_timeout_seconds: optional_parsed("SESSION_TIMEOUT_SECONDS", 3600)?,
            session_retention_days: optional_parsed("SESSION_RETENTION_DAYS", 7)?,
        })
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_days * 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_placeholder_api_key() {
        let err = required("NONEXISTENT_VAR_FOR_TEST_XYZ");
        assert!(matches!(err, Err(ConfigError::Missing(_))));
    }
}
