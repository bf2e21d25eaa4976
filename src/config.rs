use std::env;
use std::fmt;

use anyhow::{anyhow, Result};

/// Completion endpoint used when `RELAY_UPSTREAM_URL` is unset.
pub const DEFAULT_UPSTREAM_URL: &str = "https://fast.typegpt.net/v1/chat/completions";
/// Model requested by the simple chat routes when `RELAY_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "NiansuhAI/DeepSeek-R1";

/// Everything needed to reach the upstream completion service.
#[derive(Clone)]
pub struct UpstreamConfig {
    pub url: String,
    /// Bearer credential. `None` keeps the server up but every chat route
    /// answers with a configuration error before any network call.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    /// `None` omits `max_tokens` from the payload.
    pub max_tokens: Option<u32>,
    pub timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_owned(),
            api_key: None,
            model: DEFAULT_MODEL.to_owned(),
            temperature: 0.7,
            max_tokens: Some(2000),
            timeout_ms: 30_000,
        }
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_secs: u64,
    /// Key clients on the first `X-Forwarded-For` hop instead of the peer address.
    pub trust_forwarded: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            window_secs: 60,
            trust_forwarded: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub upstream: UpstreamConfig,
    pub rate_limit: RateLimitConfig,
    /// Strip leftover tags and collapse whitespace in upstream replies.
    pub strip_tags: bool,
    pub max_request_bytes: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            rate_limit: RateLimitConfig::default(),
            strip_tags: true,
            max_request_bytes: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = UpstreamConfig::default();

        let api_key = parse_string("RELAY_API_KEY").or_else(|| parse_string("TYPEGPT_API_KEY"));
        let url = parse_string("RELAY_UPSTREAM_URL").unwrap_or(defaults.url);
        let model = parse_string("RELAY_MODEL").unwrap_or(defaults.model);
        let temperature = parse_optional_f32("RELAY_TEMPERATURE")?.unwrap_or(defaults.temperature);
        let max_tokens = match parse_optional_u64("RELAY_MAX_TOKENS")? {
            Some(0) => None,
            Some(n) => Some(
                u32::try_from(n).map_err(|_| anyhow!("RELAY_MAX_TOKENS is out of range"))?,
            ),
            None => defaults.max_tokens,
        };
        let timeout_ms = parse_optional_u64("RELAY_UPSTREAM_TIMEOUT_MS")?
            .filter(|ms| *ms > 0)
            .unwrap_or(defaults.timeout_ms);

        let limit = match parse_optional_u64("RELAY_RATE_LIMIT")? {
            Some(0) => return Err(anyhow!("RELAY_RATE_LIMIT must be at least 1")),
            Some(n) => {
                u32::try_from(n).map_err(|_| anyhow!("RELAY_RATE_LIMIT is out of range"))?
            }
            None => RateLimitConfig::default().limit,
        };
        let window_secs = parse_optional_u64("RELAY_RATE_WINDOW_SECS")?
            .filter(|s| *s > 0)
            .unwrap_or(RateLimitConfig::default().window_secs);
        let trust_forwarded = parse_bool_env("RELAY_TRUST_FORWARDED")?.unwrap_or(false);

        let strip_tags = parse_bool_env("RELAY_STRIP_TAGS")?.unwrap_or(true);
        let max_request_bytes = parse_optional_u64("RELAY_MAX_REQUEST_BYTES")?.map(|v| v as usize);

        Ok(Self {
            upstream: UpstreamConfig {
                url,
                api_key,
                model,
                temperature,
                max_tokens,
                timeout_ms,
            },
            rate_limit: RateLimitConfig {
                limit,
                window_secs,
                trust_forwarded,
            },
            strip_tags,
            max_request_bytes,
        })
    }
}

fn parse_string(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_optional_f32(var: &str) -> Result<Option<f32>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a non-negative number", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
