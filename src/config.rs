use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn default_max_file_size() -> usize {
    // 10 MB in bytes
    10 * 1024 * 1024
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub max_file_size: usize,
    /// LLM planning is disabled when unset.
    pub openai_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub unhandled_log_path: PathBuf,
    pub session_capacity: u64,
    pub session_ttl: Duration,
    pub warning_dedup_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            max_file_size: default_max_file_size(),
            openai_key: None,
            llm_base_url: None,
            llm_model: "gpt-4o-mini".to_string(),
            llm_timeout: Duration::from_secs(30),
            unhandled_log_path: PathBuf::from("logs/excel_unhandled_requests.jsonl"),
            session_capacity: 64,
            session_ttl: Duration::from_secs(3600),
            warning_dedup_capacity: 256,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file first
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Only an unparseable bind
    /// address is fatal; other malformed values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let addr = match text("SHEET_QUERY_ADDR") {
            Some(raw) => raw.parse().with_context(|| format!("Invalid SHEET_QUERY_ADDR: {}", raw))?,
            None => defaults.addr,
        };

        Ok(Self {
            addr,
            max_file_size: parsed(text("MAX_FILE_SIZE"), "MAX_FILE_SIZE", defaults.max_file_size),
            openai_key: text("OPENAI_API_KEY"),
            llm_base_url: text("LLM_BASE_URL"),
            llm_model: text("LLM_MODEL").unwrap_or(defaults.llm_model),
            llm_timeout: Duration::from_secs(parsed(text("LLM_TIMEOUT_SECS"), "LLM_TIMEOUT_SECS", 30)),
            unhandled_log_path: text("UNHANDLED_LOG_PATH").map(PathBuf::from).unwrap_or(defaults.unhandled_log_path),
            session_capacity: parsed(text("SESSION_CAPACITY"), "SESSION_CAPACITY", defaults.session_capacity),
            session_ttl: Duration::from_secs(parsed(text("SESSION_TTL_SECS"), "SESSION_TTL_SECS", 3600)),
            warning_dedup_capacity: parsed(
                text("WARNING_DEDUP_CAPACITY"),
                "WARNING_DEDUP_CAPACITY",
                defaults.warning_dedup_capacity,
            ),
        })
    }
}

fn parsed<T: FromStr + std::fmt::Display>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring malformed {}={:?}, using {}", key, raw, default);
            default
        }),
    }
}
