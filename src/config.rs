use serde::Deserialize;
use std::time::Duration;

use crate::services::queue::RunStrategy;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_SORA_API_BASE: &str = "https://sora.chatgpt.com/backend";
const DEFAULT_LABS_API_BASE: &str = "https://aisandbox-pa.googleapis.com/v1";
const DEFAULT_LABS_PROJECT_ID: &str = "6544d32f-ac52-499d-8ec2-0eb0e1588330";

/// Credentials forwarded to the vendor APIs. The sentinel token is only ever
/// attached to generation submissions, never to status polls.
#[derive(Debug, Clone, Default)]
pub struct AuthTokens {
    pub auth_token: String,
    pub sentinel_token: String,
    pub google_token: String,
}

/// Optional per-request token overrides sent by the panel's settings form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenOverrides {
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub sentinel_token: Option<String>,
    #[serde(default)]
    pub google_token: Option<String>,
}

/// Polling cadence and budget for one pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub sora_api_base: String,
    pub labs_api_base: String,
    pub labs_project_id: String,
    pub labs_api_key: String,
    pub tokens: AuthTokens,
    pub image_poll: PollPolicy,
    pub video_poll: PollPolicy,
    pub strategy: RunStrategy,
    pub fanout_width: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL not set"))?;

        let fanout_width = env_parse("FLOWDECK_FANOUT_WIDTH", 4usize).max(1);
        let strategy = match env_or("FLOWDECK_STRATEGY", "sequential").as_str() {
            "fanout" => RunStrategy::FanOut {
                width: fanout_width,
            },
            _ => RunStrategy::Sequential,
        };

        Ok(Self {
            bind_addr: env_or("FLOWDECK_BIND", DEFAULT_BIND),
            database_url,
            sora_api_base: env_or("SORA_API_BASE", DEFAULT_SORA_API_BASE),
            labs_api_base: env_or("LABS_API_BASE", DEFAULT_LABS_API_BASE),
            labs_project_id: env_or("LABS_PROJECT_ID", DEFAULT_LABS_PROJECT_ID),
            labs_api_key: std::env::var("LABS_API_KEY").unwrap_or_default(),
            tokens: AuthTokens {
                auth_token: std::env::var("SORA_AUTH_TOKEN").unwrap_or_default(),
                sentinel_token: std::env::var("SORA_SENTINEL_TOKEN").unwrap_or_default(),
                google_token: std::env::var("LABS_AUTH_TOKEN").unwrap_or_default(),
            },
            image_poll: PollPolicy {
                interval: Duration::from_millis(env_parse("FLOWDECK_POLL_INTERVAL_MS", 8000u64)),
                max_attempts: env_parse("FLOWDECK_MAX_POLL_ATTEMPTS", 100u32),
            },
            video_poll: PollPolicy {
                interval: Duration::from_millis(env_parse(
                    "FLOWDECK_VIDEO_POLL_INTERVAL_MS",
                    5000u64,
                )),
                max_attempts: env_parse("FLOWDECK_VIDEO_MAX_POLL_ATTEMPTS", 60u32),
            },
            strategy,
            fanout_width,
        })
    }

    /// Effective credentials for one request: config defaults with any
    /// per-request overrides applied on top.
    pub fn tokens_with(&self, overrides: Option<TokenOverrides>) -> AuthTokens {
        let overrides = overrides.unwrap_or_default();
        AuthTokens {
            auth_token: overrides
                .auth_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.tokens.auth_token.clone()),
            sentinel_token: overrides
                .sentinel_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.tokens.sentinel_token.clone()),
            google_token: overrides
                .google_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.tokens.google_token.clone()),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
