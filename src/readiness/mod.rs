//! Readiness detection: decide when a supervised dev server serves traffic.
//!
//! Three signals are combined while the child is observed:
//!
//! 1. **Log scraping**: every output line is matched against
//!    [`patterns::discover_url`]; the first URL found becomes the probe target.
//! 2. **HTTP probing**: every poll interval (and immediately on discovery)
//!    the target, or the caller's hint URL, is fetched; `200 OK` is success.
//! 3. **Port scan**: if the deadline passes without any discovered URL, the
//!    hint port and a short list of common dev ports are checked by binding.
//!
//! Process death is observed concurrently and ends the wait at once.

pub mod patterns;
pub mod probe;

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::process::{OutputBuffer, ProcessObserver, StreamKind};
use crate::{AppError, Result};

use self::probe::HttpProbe;

/// Tuning for one readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessOptions {
    /// URL probed until a better one is scraped from the logs.
    pub hint_url: Option<String>,
    /// Overall deadline.
    pub timeout: Duration,
    /// Interval between probes.
    pub poll_interval: Duration,
    /// Timeout of one probe.
    pub probe_timeout: Duration,
    /// Fallback scan list.
    pub scan_ports: Vec<u16>,
    /// Trailing output kept on failure, in lines.
    pub trailing_lines: usize,
    /// Trailing output kept on failure, in bytes.
    pub trailing_bytes: usize,
}

impl ReadinessOptions {
    /// Options derived from configuration, with an explicit deadline.
    #[must_use]
    pub fn from_config(
        config: &crate::GlobalConfig,
        hint_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            hint_url,
            timeout,
            poll_interval: config.readiness.poll_interval(),
            probe_timeout: config.readiness.probe_timeout(),
            scan_ports: config.readiness.scan_ports.clone(),
            trailing_lines: config.artifacts.trailing_lines,
            trailing_bytes: config.artifacts.trailing_bytes,
        }
    }
}

/// How the serving address was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// URL announced in the child's output, confirmed by a probe.
    Log,
    /// Caller-supplied hint URL confirmed by a probe.
    Hint,
    /// Occupied port found by the fallback scan.
    PortScan,
}

/// Why a readiness wait failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessFailure {
    /// The child exited first.
    PrematureExit {
        /// Exit code, `None` if killed by a signal.
        code: Option<i32>,
    },
    /// The child exited after reporting its address was taken.
    PortConflict {
        /// Port named in the output, if any.
        port: Option<u16>,
    },
    /// The deadline passed with the child still alive.
    Timeout,
    /// The wait was cancelled.
    Interrupted,
}

impl ReadinessFailure {
    /// Human-readable description.
    #[must_use]
    pub fn describe(self, timeout: Duration) -> String {
        match self {
            Self::PrematureExit { code: Some(code) } => {
                format!("dev server exited with code {code} before becoming ready")
            }
            Self::PrematureExit { code: None } => {
                "dev server was terminated by a signal before becoming ready".into()
            }
            Self::PortConflict { port: Some(port) } => {
                format!("port {port} is already in use by another process")
            }
            Self::PortConflict { port: None } => {
                "dev server could not bind its port: address already in use".into()
            }
            Self::Timeout => format!(
                "dev server did not become ready within {}s",
                timeout.as_secs_f64()
            ),
            Self::Interrupted => "readiness wait interrupted".into(),
        }
    }
}

/// Outcome of [`ReadinessDetector::wait_for_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessResult {
    /// Whether the server was observed serving.
    pub success: bool,
    /// HTTP probes issued.
    pub attempts: u32,
    /// Wall time spent waiting.
    pub elapsed: Duration,
    /// Serving URL on success.
    pub url: Option<String>,
    /// Serving port on success.
    pub port: Option<u16>,
    /// How success was established.
    pub discovery: Option<Discovery>,
    /// Failure kind.
    pub failure: Option<ReadinessFailure>,
    /// Failure description.
    pub error: Option<String>,
    /// Tail of the child's output; filled on failure.
    pub trailing_output: String,
}

impl ReadinessResult {
    /// Failure as an application error; `None` on success.
    #[must_use]
    pub fn to_error(&self) -> Option<AppError> {
        let message = self.error.clone().unwrap_or_default();
        self.failure.map(|failure| match failure {
            ReadinessFailure::PrematureExit { .. } => AppError::PrematureExit(message),
            ReadinessFailure::PortConflict { .. } => AppError::PortConflict(message),
            ReadinessFailure::Timeout => AppError::Timeout(message),
            ReadinessFailure::Interrupted => AppError::Interrupted(message),
        })
    }
}

/// Incremental scan state over an [`OutputBuffer`].
#[derive(Debug, Default)]
struct LineScraper {
    next: usize,
    url: Option<String>,
    conflict: Option<Option<u16>>,
}

impl LineScraper {
    /// Consume new lines; `true` if a URL was discovered by this call.
    fn scan(&mut self, output: &OutputBuffer) -> bool {
        let lines = output.lines_from(self.next);
        self.next += lines.len();
        let mut discovered = false;
        for line in lines {
            if !matches!(line.stream, StreamKind::Stdout | StreamKind::Stderr) {
                continue;
            }
            let clean = patterns::strip_ansi(&line.text);
            if self.conflict.is_none() && patterns::mentions_port_conflict(&clean) {
                self.conflict = Some(patterns::conflict_port(&clean));
            }
            if self.url.is_none() {
                if let Some(url) = patterns::discover_url(&clean) {
                    debug!(%url, "serving url announced in output");
                    self.url = Some(url);
                    discovered = true;
                }
            }
        }
        discovered
    }
}

/// Combines log scraping, HTTP probing and port scanning.
#[derive(Debug, Clone)]
pub struct ReadinessDetector {
    options: ReadinessOptions,
    probe: HttpProbe,
}

impl ReadinessDetector {
    /// Build a detector.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Http` if the probe client cannot be built.
    pub fn new(options: ReadinessOptions) -> Result<Self> {
        let probe = HttpProbe::new(options.probe_timeout)?;
        Ok(Self { options, probe })
    }

    /// Options in effect.
    #[must_use]
    pub fn options(&self) -> &ReadinessOptions {
        &self.options
    }

    /// Wait until the observed child serves traffic, dies, the deadline
    /// passes, or `cancel` fires. Never mutates the child.
    pub async fn wait_for_ready(
        &self,
        observer: &ProcessObserver,
        cancel: &CancellationToken,
    ) -> ReadinessResult {
        let span = info_span!("wait_for_ready", log = %observer.log_path().display());
        self.wait_inner(observer, cancel).instrument(span).await
    }

    async fn wait_inner(
        &self,
        observer: &ProcessObserver,
        cancel: &CancellationToken,
    ) -> ReadinessResult {
        let started = Instant::now();
        let deadline = started + self.options.timeout;
        let poll = self.options.poll_interval;

        let mut lines_rx = observer.output().subscribe();
        let mut exit_rx = observer.subscribe_exit();
        let mut lines_open = true;
        let mut exit_open = true;
        let mut ticker = tokio::time::interval_at(started + poll, poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut scraper = LineScraper::default();
        let mut attempts = 0u32;
        let mut probe_now = scraper.scan(observer.output());

        loop {
            if observer.has_exited() {
                scraper.scan(observer.output());
                return self.died(observer, &scraper, attempts, started);
            }
            if cancel.is_cancelled() {
                return self.failed(observer, ReadinessFailure::Interrupted, attempts, started);
            }

            if probe_now {
                probe_now = false;
                let target = scraper
                    .url
                    .as_ref()
                    .map(|url| (url.clone(), Discovery::Log))
                    .or_else(|| {
                        self.options
                            .hint_url
                            .as_ref()
                            .map(|url| (url.clone(), Discovery::Hint))
                    });
                if let Some((url, discovery)) = target {
                    attempts += 1;
                    let serving = tokio::select! {
                        serving = self.probe.is_serving(&url) => serving,
                        () = cancel.cancelled() => false,
                        () = tokio::time::sleep_until(deadline) => false,
                    };
                    // A dead child cannot be the one answering.
                    if serving && !observer.has_exited() {
                        let port = patterns::url_port(&url);
                        return Self::succeeded(url, port, discovery, attempts, started);
                    }
                }
                continue;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                changed = exit_rx.changed(), if exit_open => {
                    exit_open = changed.is_ok();
                }
                changed = lines_rx.changed(), if lines_open => {
                    lines_open = changed.is_ok();
                    probe_now = scraper.scan(observer.output());
                }
                _ = ticker.tick() => probe_now = true,
                () = tokio::time::sleep_until(deadline) => break,
            }
        }

        scraper.scan(observer.output());
        if observer.has_exited() {
            return self.died(observer, &scraper, attempts, started);
        }

        if scraper.url.is_none() {
            let hint_port = self
                .options
                .hint_url
                .as_deref()
                .and_then(patterns::url_port);
            let order = probe::scan_order(hint_port, &self.options.scan_ports);
            if let Some(port) = probe::find_listening_port(&order) {
                info!(port, "no url announced; inferring server from occupied port");
                return Self::succeeded(
                    format!("http://localhost:{port}"),
                    Some(port),
                    Discovery::PortScan,
                    attempts,
                    started,
                );
            }
        }

        warn!(attempts, "readiness deadline passed");
        self.failed(observer, ReadinessFailure::Timeout, attempts, started)
    }

    fn died(
        &self,
        observer: &ProcessObserver,
        scraper: &LineScraper,
        attempts: u32,
        started: Instant,
    ) -> ReadinessResult {
        let failure = match scraper.conflict {
            Some(port) => ReadinessFailure::PortConflict { port },
            None => ReadinessFailure::PrematureExit {
                code: observer.exit_code(),
            },
        };
        self.failed(observer, failure, attempts, started)
    }

    fn succeeded(
        url: String,
        port: Option<u16>,
        discovery: Discovery,
        attempts: u32,
        started: Instant,
    ) -> ReadinessResult {
        let elapsed = started.elapsed();
        info!(
            %url,
            attempts,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            ?discovery,
            "dev server ready"
        );
        ReadinessResult {
            success: true,
            attempts,
            elapsed,
            url: Some(url),
            port,
            discovery: Some(discovery),
            failure: None,
            error: None,
            trailing_output: String::new(),
        }
    }

    fn failed(
        &self,
        observer: &ProcessObserver,
        failure: ReadinessFailure,
        attempts: u32,
        started: Instant,
    ) -> ReadinessResult {
        let error = failure.describe(self.options.timeout);
        warn!(%error, attempts, "dev server not ready");
        ReadinessResult {
            success: false,
            attempts,
            elapsed: started.elapsed(),
            url: None,
            port: None,
            discovery: None,
            failure: Some(failure),
            error: Some(error),
            trailing_output: observer
                .output()
                .trailing(self.options.trailing_lines, self.options.trailing_bytes),
        }
    }
}
