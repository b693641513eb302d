// src/config.rs
//! Runtime configuration, read once at startup from the environment.

use anyhow::{bail, Context, Result};

/// All tunables in one place. Numeric knobs have the documented defaults;
/// the required keys make startup fail fast instead of limping along.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the LLM endpoint. Required.
    pub llm_api_key: String,
    /// Base URL of the LLM generate endpoint. Required.
    pub llm_endpoint: String,

    /// Bearer token for the chat-platform send endpoint.
    pub chat_send_token: String,
    /// Chat-platform send endpoint URL.
    pub chat_send_endpoint: String,

    /// Outbound channel for high-conviction signals. Required.
    pub primary_channel_id: String,
    /// Optional mid-tier outbound channel.
    pub secondary_channel_id: Option<String>,
    /// Optional operator channel for command replies.
    pub admin_channel_id: Option<String>,

    /// Human labels of our own outbound channels; inbound items whose title
    /// matches one are the mirror's output looping back, and are dropped.
    pub outbound_channel_labels: Vec<String>,

    pub base_heartbeat_ms: u64,
    pub max_heartbeat_ms: u64,
    pub min_heartbeat_ms: u64,

    pub analysis_reuse_window_ms: i64,
    pub signal_dedup_window_ms: i64,
    pub batch_max: usize,
    pub max_retries: u32,

    pub relevance_primary_threshold: i64,
    pub relevance_secondary_threshold: i64,

    /// SQLite database path.
    pub db_path: String,
    /// HTTP bind address, e.g. "0.0.0.0:8787".
    pub bind_addr: String,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_req(key: &str) -> Result<String> {
    env_opt(key).with_context(|| format!("missing required env var {key}"))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Read configuration from the environment. Missing required keys are a
    /// fatal startup error (the binary exits with code 1).
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            llm_api_key: env_req("LLM_API_KEY")?,
            llm_endpoint: env_req("LLM_ENDPOINT")?,
            chat_send_token: env_req("CHAT_SEND_TOKEN")?,
            chat_send_endpoint: env_req("CHAT_SEND_ENDPOINT")?,
            primary_channel_id: env_req("PRIMARY_CHANNEL_ID")?,
            secondary_channel_id: env_opt("SECONDARY_CHANNEL_ID"),
            admin_channel_id: env_opt("ADMIN_CHANNEL_ID"),
            outbound_channel_labels: env_opt("OUTBOUND_CHANNEL_LABELS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            base_heartbeat_ms: env_u64("BASE_HEARTBEAT_MS", 300_000),
            max_heartbeat_ms: env_u64("MAX_HEARTBEAT_MS", 3_600_000),
            min_heartbeat_ms: env_u64("MIN_HEARTBEAT_MS", 5_000),
            analysis_reuse_window_ms: env_i64("ANALYSIS_REUSE_WINDOW_MS", 86_400_000),
            signal_dedup_window_ms: env_i64("SIGNAL_DEDUP_WINDOW_MS", 21_600_000),
            batch_max: env_u64("BATCH_MAX", 20) as usize,
            max_retries: env_u64("MAX_RETRIES", 5) as u32,
            relevance_primary_threshold: env_i64("RELEVANCE_PRIMARY_THRESHOLD", 80),
            relevance_secondary_threshold: env_i64("RELEVANCE_SECONDARY_THRESHOLD", 60),
            db_path: env_opt("DB_PATH").unwrap_or_else(|| "data/refinery.db".to_string()),
            bind_addr: env_opt("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8787".to_string()),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.min_heartbeat_ms == 0 || self.base_heartbeat_ms < self.min_heartbeat_ms {
            bail!("heartbeat bounds invalid: base must be >= min and min > 0");
        }
        if self.max_heartbeat_ms < self.base_heartbeat_ms {
            bail!("heartbeat bounds invalid: max must be >= base");
        }
        if self.batch_max == 0 {
            bail!("BATCH_MAX must be at least 1");
        }
        Ok(())
    }

    /// A fully-populated config for tests: local paths, mock-friendly values.
    pub fn for_tests(db_path: &str) -> Self {
        Self {
            llm_api_key: "test-key".into(),
            llm_endpoint: "http://127.0.0.1:0/generate".into(),
            chat_send_token: "test-token".into(),
            chat_send_endpoint: "http://127.0.0.1:0/send".into(),
            primary_channel_id: "primary".into(),
            secondary_channel_id: Some("secondary".into()),
            admin_channel_id: Some("admin".into()),
            outbound_channel_labels: vec!["Refinery Signals".into()],
            base_heartbeat_ms: 300_000,
            max_heartbeat_ms: 3_600_000,
            min_heartbeat_ms: 5_000,
            analysis_reuse_window_ms: 86_400_000,
            signal_dedup_window_ms: 21_600_000,
            batch_max: 20,
            max_retries: 5,
            relevance_primary_threshold: 80,
            relevance_secondary_threshold: 60,
            db_path: db_path.to_string(),
            bind_addr: "127.0.0.1:0".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_documented_knobs() {
        let cfg = Config::for_tests(":memory:");
        assert_eq!(cfg.base_heartbeat_ms, 300_000);
        assert_eq!(cfg.max_heartbeat_ms, 3_600_000);
        assert_eq!(cfg.min_heartbeat_ms, 5_000);
        assert_eq!(cfg.analysis_reuse_window_ms, 86_400_000);
        assert_eq!(cfg.batch_max, 20);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.relevance_primary_threshold, 80);
        assert_eq!(cfg.relevance_secondary_threshold, 60);
    }

    #[test]
    fn validate_rejects_inverted_heartbeat_bounds() {
        let mut cfg = Config::for_tests(":memory:");
        cfg.max_heartbeat_ms = 1_000;
        assert!(cfg.validate().is_err());
    }
}
