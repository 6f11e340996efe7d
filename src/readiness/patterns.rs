//! Log scraping for serving URLs and well-known failure lines.
//!
//! Patterns are tried in a fixed priority order and the first pattern that
//! matches a line wins, so a line carrying both a `Local:` URL and some other
//! loopback URL always yields the `Local:` one.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use tracing::warn;

/// URL patterns in priority order. Capture group 1 is the URL.
const URL_PATTERNS: &[&str] = &[
    r"(?i)\bLocal:\s*(https?://\S+)",
    r"(?i)\bready on\s+(https?://\S+)",
    r"(?i)\blistening on:?\s+(https?://\S+)",
    r"(?i)\bstarted (?:server )?(?:at|on)\s+(https?://\S+)",
    r"(?i)\bserver running at\s+(https?://\S+)",
    r"(?i)(https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):\d+\S*)",
];

static URL_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(URL_PATTERNS));

static EXP_URL: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(&[r"(exp://\S+)"]));

static ANY_HTTP_URL: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(&[r"(https?://\S+)"]));

static PORT_NUMBER: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"(?:port\s+|:)(\d{2,5})\b"]));

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(err) => {
                warn!(pattern = %p, %err, "invalid scrape pattern, skipping");
                None
            }
        })
        .collect()
}

fn first_capture(regexes: &[Regex], line: &str) -> Option<String> {
    regexes
        .iter()
        .find_map(|re| re.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Remove ANSI escape sequences from a line.
///
/// CSI runs from `ESC [` to a final byte. OSC runs from `ESC ]` to `BEL` or
/// `ESC \` and carries terminal hyperlinks and titles. Any other escape drops
/// the single character after `ESC`.
#[must_use]
pub fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\u{1b}' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('[') => {
                // Parameters and intermediates run until a final byte in '@'..='~'.
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                while let Some(c) = chars.next() {
                    if c == '\u{7}' {
                        break;
                    }
                    if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    out
}

fn trim_url(url: &str) -> &str {
    url.trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ')' | '\'' | '"' | ']'))
}

/// Rewrite wildcard bind addresses to `localhost`.
///
/// Anything that does not parse as a URL is returned unchanged.
#[must_use]
pub fn normalize_host(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_owned();
    };
    if !matches!(parsed.host_str(), Some("0.0.0.0" | "[::]"))
        || parsed.set_host(Some("localhost")).is_err()
    {
        return url.to_owned();
    }
    let mut out = String::from(parsed);
    // The parser adds a root path; keep the announced form.
    let had_path = url
        .split_once("://")
        .is_some_and(|(_, rest)| rest.contains('/'));
    if !had_path && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Serving URL announced on `line`, normalized. ANSI codes must already be stripped.
#[must_use]
pub fn discover_url(line: &str) -> Option<String> {
    let raw = first_capture(&URL_REGEXES, line)?;
    // `[::]` ends with a bracket the trimmer would otherwise eat.
    let trimmed = if raw.contains("[::") {
        raw.trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ')' | '\'' | '"'))
    } else {
        trim_url(&raw)
    };
    Some(normalize_host(trimmed))
}

/// Port of a URL, defaulting by scheme.
#[must_use]
pub fn url_port(url: &str) -> Option<u16> {
    Url::parse(url).ok()?.port_or_known_default()
}

/// Whether `line` reports a failed bind because the address is taken.
#[must_use]
pub fn mentions_port_conflict(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("eaddrinuse")
        || lower.contains("address already in use")
        || lower.contains("port already in use")
}

/// Best-effort port number mentioned on a conflict line.
#[must_use]
pub fn conflict_port(line: &str) -> Option<u16> {
    first_capture(&PORT_NUMBER, line).and_then(|p| p.parse().ok())
}

/// Secondary URLs printed by mobile dev servers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuxiliaryUrls {
    /// `exp://` URL for devices on the local network.
    pub lan: Option<String>,
    /// Devtools URL.
    pub devtools: Option<String>,
    /// Whether the line announced that the Metro bundler is waiting.
    pub metro_waiting: bool,
}

/// Auxiliary URLs and markers found on `line`.
#[must_use]
pub fn scrape_auxiliary(line: &str) -> AuxiliaryUrls {
    let devtools = if line.to_ascii_lowercase().contains("devtools") {
        first_capture(&ANY_HTTP_URL, line).map(|u| normalize_host(trim_url(&u)))
    } else {
        None
    };
    AuxiliaryUrls {
        lan: first_capture(&EXP_URL, line).map(|u| trim_url(&u).to_owned()),
        devtools,
        metro_waiting: line.contains("Metro waiting on"),
    }
}
