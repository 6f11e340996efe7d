//! Secret masking for output excerpts that end up in artifacts.

use std::sync::LazyLock;

use regex::{Regex, RegexSet};

/// Replacement for a line that mentions a secret.
pub const REDACTED_LINE: &str = "[REDACTED - contains sensitive pattern]";

const SECRET_PATTERNS: &[&str] = &[
    r"(?i)api[_-]?key",
    r"(?i)secret[_-]?key?",
    r"(?i)private[_-]?key",
    r"(?i)password",
    r"(?i)\bmnemonic\b",
    r"(?i)seed[_-]?phrase?",
    r"(?i)auth[_-]?token",
    r"(?i)access[_-]?token",
    r"(?i)refresh[_-]?token",
    r"(?i)bearer\s+[a-z0-9._-]+",
    r"(?i)[?&](?:api[_-]?key|token|secret|password)=[^&\s]+",
    r"(?i)#(?:access[_-]?token|id[_-]?token)=[^&\s]+",
    r"(?i)[a-z]+://[^:/\s]+:[^@\s]+@",
];

static SECRET_SET: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(SECRET_PATTERNS).unwrap_or_else(|_| RegexSet::empty()));

static HIGH_ENTROPY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/=_-]{32,}").ok());

static TOKEN_CONTEXT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)[=:]\s*[A-Za-z0-9+/=_-]{32,}|authorization|eyJ[A-Za-z0-9_-]+").ok());

/// Mask one line.
///
/// Lines naming a secret are replaced whole. Long token-like runs are
/// replaced in place when they look assigned, sent as a header, or are JWTs.
#[must_use]
pub fn redact_line(line: &str) -> String {
    if SECRET_SET.is_match(line) {
        return REDACTED_LINE.to_owned();
    }
    if let (Some(entropy), Some(context)) = (HIGH_ENTROPY.as_ref(), TOKEN_CONTEXT.as_ref()) {
        if entropy.is_match(line) && context.is_match(line) {
            return entropy.replace_all(line, "[REDACTED]").into_owned();
        }
    }
    line.to_owned()
}

/// Mask every line of a multi-line excerpt.
#[must_use]
pub fn redact_text(text: &str) -> String {
    text.lines().map(redact_line).collect::<Vec<_>>().join("\n")
}
