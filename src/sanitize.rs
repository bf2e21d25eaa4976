//! Input scrubbing applied to user text before it is embedded in a prompt.
//!
//! This is not an HTML sanitizer. It drops angle brackets and the
//! `javascript:` / `data:` scheme prefixes (ASCII case-insensitive) so that
//! text echoed back by the model cannot smuggle markup into an HTML page.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use once_cell::sync::Lazy;

static UNSAFE_SCHEMES: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::LeftmostFirst)
        .build(["javascript:", "data:"])
        .expect("static scheme patterns are valid")
});

/// Remove `<`, `>`, `javascript:` and `data:` from `input` and trim it.
///
/// Brackets go first, so `java<script:` collapses into `javascript:` and is
/// then removed as a scheme. Removal repeats until the text is stable:
/// `datdata:a:` would otherwise reassemble into `data:`.
pub fn sanitize(input: &str) -> String {
    let mut text: String = input.chars().filter(|c| *c != '<' && *c != '>').collect();
    while UNSAFE_SCHEMES.is_match(&text) {
        text = UNSAFE_SCHEMES.replace_all(&text, &["", ""]);
    }
    text.trim().to_string()
}
