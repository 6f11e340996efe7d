//! Opening the verified URL in a local browser.

use std::process::{Command, Stdio};

use reqwest::Url;
use tracing::{debug, info};

use crate::{AppError, Result};

/// Variables whose presence marks a CI or otherwise headless host.
pub const HEADLESS_ENV_VARS: &[&str] = &[
    "CI",
    "HEADLESS",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "JENKINS_URL",
    "BUILDKITE",
];

/// Headless check against an arbitrary variable lookup.
///
/// `JENKINS_URL` counts when merely set; the others must read `true` or `1`.
#[must_use]
pub fn is_headless_with(lookup: impl Fn(&str) -> Option<String>) -> bool {
    HEADLESS_ENV_VARS.iter().any(|key| match lookup(key) {
        Some(_) if *key == "JENKINS_URL" => true,
        Some(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        None => false,
    })
}

/// Whether this process runs on a headless host.
#[must_use]
pub fn is_headless() -> bool {
    is_headless_with(|key| std::env::var(key).ok())
}

/// Accept only plain `http(s)` loopback URLs without credentials.
///
/// # Errors
///
/// Returns `AppError::Validation` describing the rejected part.
pub fn validate_browser_url(url: &str) -> Result<()> {
    let parsed =
        Url::parse(url).map_err(|err| AppError::Validation(format!("invalid url {url}: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!("refusing non-http url: {url}")));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(AppError::Validation(
            "refusing url with embedded credentials".into(),
        ));
    }
    match parsed.host_str() {
        Some("localhost" | "127.0.0.1") => Ok(()),
        host => Err(AppError::Validation(format!(
            "refusing to open non-local host `{}`",
            host.unwrap_or_default()
        ))),
    }
}

/// Open `url` in the desktop browser, unless the host is headless.
///
/// Returns `true` if a browser launcher was started.
///
/// # Errors
///
/// Returns `AppError::Validation` for a non-local URL, or `AppError::Spawn`
/// if the platform launcher cannot be started.
pub fn open_browser(url: &str) -> Result<bool> {
    validate_browser_url(url)?;
    if is_headless() {
        info!(url, "headless host; not opening a browser");
        return Ok(false);
    }

    let mut cmd = if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(url);
        cmd
    } else if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/c", "start", "\"\"", url]);
        cmd
    } else {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(url);
        cmd
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to launch browser: {err}")))?;
    debug!(url, "browser launcher started");
    Ok(true)
}
