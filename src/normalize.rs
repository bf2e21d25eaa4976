//! Turns an upstream completion into the public response envelope.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::upstream::UpstreamResponse;

/// Every normalized reply starts with this.
pub const PERSONA_PREFIX: &str = "This is AF-EVIL-AI speaking:";
pub const PERSONA_NAME: &str = "AF-EVIL-AI";
pub const COPYRIGHT: &str = "© t.me/AF_Team_Owner";

static THINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>\n?").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NormalizedResponse {
    pub name: String,
    pub response: String,
    pub copyright: String,
}

/// Reply post-processing. `strip_tags` is a per-deployment switch; reasoning
/// spans are always removed.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    pub strip_tags: bool,
}

impl Normalizer {
    pub fn new(strip_tags: bool) -> Self {
        Self { strip_tags }
    }

    pub fn normalize(&self, upstream: &UpstreamResponse) -> NormalizedResponse {
        self.normalize_content(upstream.first_content().unwrap_or(""))
    }

    pub fn normalize_content(&self, content: &str) -> NormalizedResponse {
        let cleaned = self.clean(content);
        NormalizedResponse {
            name: PERSONA_NAME.to_string(),
            response: with_persona_prefix(&cleaned),
            copyright: COPYRIGHT.to_string(),
        }
    }

    /// Remove reasoning markup and, when enabled, leftover tags and runs of
    /// whitespace. The result is trimmed.
    pub fn clean(&self, content: &str) -> String {
        let without_think = THINK_RE.replace_all(content, "");
        if self.strip_tags {
            let without_tags = TAG_RE.replace_all(&without_think, "");
            WS_RE.replace_all(&without_tags, " ").trim().to_string()
        } else {
            without_think.trim().to_string()
        }
    }
}

fn with_persona_prefix(cleaned: &str) -> String {
    if cleaned.starts_with(PERSONA_PREFIX) {
        cleaned.to_string()
    } else if cleaned.is_empty() {
        PERSONA_PREFIX.to_string()
    } else {
        format!("{} {}", PERSONA_PREFIX, cleaned)
    }
}
