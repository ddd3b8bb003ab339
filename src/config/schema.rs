use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub referral: ReferralConfig,
}

impl Config {
    /// Load from a TOML file, or fall back to defaults when the file is
    /// absent. `TOURBOT_OPENAI_API_KEY` always wins over the file value.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", p.display()))?
            }
            _ => Self::default(),
        };

        if let Ok(key) = std::env::var("TOURBOT_OPENAI_API_KEY") {
            let key = key.trim();
            if !key.is_empty() {
                config.llm.api_key = Some(key.to_owned());
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.limits.auth_daily_quota > 0,
            "limits.auth_daily_quota must be positive"
        );
        anyhow::ensure!(
            self.limits.anon_daily_quota > 0,
            "limits.anon_daily_quota must be positive"
        );
        anyhow::ensure!(
            self.limits.unknown_streak_limit > 0,
            "limits.unknown_streak_limit must be positive"
        );
        anyhow::ensure!(
            self.referral.code_length >= 6,
            "referral.code_length must be at least 6"
        );
        Ok(())
    }
}

// ── Gateway ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Gateway port (default: 8080)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Salt mixed into the anonymous-client identity hash.
    #[serde(default = "default_identity_salt")]
    pub identity_salt: String,
    /// Size (in chars) of each SSE `delta` chunk.
    #[serde(default = "default_stream_chunk_chars")]
    pub stream_chunk_chars: usize,
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_identity_salt() -> String {
    "tourbot-identity".into()
}

fn default_stream_chunk_chars() -> usize {
    48
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            identity_salt: default_identity_salt(),
            stream_chunk_chars: default_stream_chunk_chars(),
        }
    }
}

// ── LLM provider ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key. When absent the engine never attempts the LLM path.
    pub api_key: Option<String>,
    /// OpenAI-compatible chat-completions base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Request timeout. On expiry the rule-based path takes over.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    700
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ── Usage governor limits ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Messages per rolling 24h window for authenticated clients.
    #[serde(default = "default_auth_daily_quota")]
    pub auth_daily_quota: u64,
    /// Messages per rolling 24h window for anonymous clients.
    #[serde(default = "default_anon_daily_quota")]
    pub anon_daily_quota: u64,
    #[serde(default = "default_quota_window_secs")]
    pub quota_window_secs: u64,
    /// Consecutive unknown-intent replies before the block flag is set.
    #[serde(default = "default_unknown_streak_limit")]
    pub unknown_streak_limit: u64,
    #[serde(default = "default_unknown_window_secs")]
    pub unknown_window_secs: u64,
    /// Block duration once the breaker trips.
    #[serde(default = "default_block_secs")]
    pub block_secs: u64,
}

fn default_auth_daily_quota() -> u64 {
    60
}

fn default_anon_daily_quota() -> u64 {
    8
}

fn default_quota_window_secs() -> u64 {
    24 * 60 * 60
}

fn default_unknown_streak_limit() -> u64 {
    3
}

fn default_unknown_window_secs() -> u64 {
    6 * 60 * 60
}

fn default_block_secs() -> u64 {
    2 * 60 * 60
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            auth_daily_quota: default_auth_daily_quota(),
            anon_daily_quota: default_anon_daily_quota(),
            quota_window_secs: default_quota_window_secs(),
            unknown_streak_limit: default_unknown_streak_limit(),
            unknown_window_secs: default_unknown_window_secs(),
            block_secs: default_block_secs(),
        }
    }
}

// ── Database ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL. Defaults to an on-disk SQLite file.
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "sqlite://tourbot.db?mode=rwc".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

// ── Referral codes ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralConfig {
    #[serde(default = "default_code_length")]
    pub code_length: usize,
    /// Default referral lifetime when the caller does not set `expires_at`.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
}

fn default_code_length() -> usize {
    10
}

fn default_ttl_days() -> i64 {
    30
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            code_length: default_code_length(),
            ttl_days: default_ttl_days(),
        }
    }
}
