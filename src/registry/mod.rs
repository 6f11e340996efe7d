//! Session registry: at most one live preview session per instance.
//!
//! Every transition runs under one async mutex, so a start always finishes
//! stopping the previous session before its own child is spawned. Readers
//! go through a separately locked pointer and never wait on a transition. A monitor
//! task per session follows readiness, auxiliary URLs and exit, persisting
//! each change to `sessions.json`.

pub mod planner;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{GlobalConfig, RegistryConfig};
use crate::manifest::{Manifest, ProjectType, MANIFEST_FILE};
use crate::models::session::{Session, SessionMode, SessionStatus};
use crate::process::{LaunchSpec, ProcessHandle, ProcessObserver, ProcessSupervisor, StreamKind};
use crate::readiness::{patterns, ReadinessDetector, ReadinessFailure, ReadinessOptions};
use crate::{AppError, Result};

use self::planner::{LaunchPlanner, ManifestLaunchPlanner};
use self::store::SessionStore;

type SharedSession = Arc<Mutex<Session>>;

fn snapshot(session: &SharedSession) -> Session {
    session.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

struct ActiveSession {
    session: SharedSession,
    handle: Option<Arc<ProcessHandle>>,
    monitor: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

/// Owns the current preview session and its child process.
pub struct SessionRegistry {
    config: Arc<GlobalConfig>,
    supervisor: ProcessSupervisor,
    planner: Arc<dyn LaunchPlanner>,
    store: SessionStore,
    current: tokio::sync::Mutex<Option<ActiveSession>>,
    visible: Mutex<Option<SharedSession>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("store", &self.store)
            .field("planner", &self.planner)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Registry with the platform supervisor and manifest-based planning.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if stale state cannot be reset.
    pub fn new(config: Arc<GlobalConfig>) -> Result<Self> {
        Self::with_parts(
            config,
            ProcessSupervisor::default(),
            Arc::new(ManifestLaunchPlanner),
        )
    }

    /// Registry with explicit collaborators.
    ///
    /// Any session persisted by a previous process is discarded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if stale state cannot be reset.
    pub fn with_parts(
        config: Arc<GlobalConfig>,
        supervisor: ProcessSupervisor,
        planner: Arc<dyn LaunchPlanner>,
    ) -> Result<Self> {
        let store = SessionStore::new(config.sessions_file());
        store.discard_stale()?;
        Ok(Self {
            config,
            supervisor,
            planner,
            store,
            current: tokio::sync::Mutex::new(None),
            visible: Mutex::new(None),
        })
    }

    /// Persisted state file.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Stop any current session, validate `directory`, and launch a new one.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` / `AppError::Detection` for an unusable target.
    /// - `AppError::Spawn` if the child cannot start; the session is then
    ///   recorded in `error` status.
    pub async fn start_session(&self, directory: &Path, mode: SessionMode) -> Result<Session> {
        let mut current = self.current.lock().await;
        self.stop_locked(&mut current).await;

        let (directory, manifest) = validate_target(directory, &self.config.registry)?;
        let plan = self.planner.plan(&directory, &manifest, mode)?;
        let detector = ReadinessDetector::new(ReadinessOptions::from_config(
            &self.config,
            plan.hint_url.clone(),
            self.config.readiness.timeout(),
        ))?;

        let mut session = Session::new(directory.clone(), mode);
        let log_path = self
            .config
            .session_log_dir()
            .join(format!("{}.log", session.id));
        session.log_file_path = Some(log_path.clone());

        let spec = LaunchSpec {
            command: plan.command,
            cwd: directory,
            env: plan.env,
            log_path,
        };
        let handle = match self.supervisor.start(spec) {
            Ok(handle) => Arc::new(handle),
            Err(err) => {
                session.error = Some(err.to_string());
                session.transition(SessionStatus::Error)?;
                self.persist(&session);
                let shared: SharedSession = Arc::new(Mutex::new(session));
                self.publish(Some(Arc::clone(&shared)));
                *current = Some(ActiveSession {
                    session: shared,
                    handle: None,
                    monitor: None,
                    cancel: CancellationToken::new(),
                });
                return Err(err);
            }
        };
        session.pid = Some(handle.pid());
        self.persist(&session);
        info!(session_id = %session.id, pid = handle.pid(), ?mode, "session started");

        let shared: SharedSession = Arc::new(Mutex::new(session.clone()));
        let cancel = CancellationToken::new();
        let monitor = SessionMonitor {
            session: Arc::clone(&shared),
            handle: Arc::clone(&handle),
            supervisor: self.supervisor.clone(),
            store: self.store.clone(),
            detector,
            grace: self.config.shutdown.grace_period(),
        };
        let span = info_span!("session_monitor", session_id = %session.id);
        let task = tokio::spawn(monitor.run(cancel.clone()).instrument(span));

        self.publish(Some(Arc::clone(&shared)));
        *current = Some(ActiveSession {
            session: shared,
            handle: Some(handle),
            monitor: Some(task),
            cancel,
        });
        Ok(session)
    }

    /// Stop the current session, if any, and clear the pointer.
    ///
    /// Returns the session as it was finally recorded.
    pub async fn stop_current_session(&self) -> Option<Session> {
        let mut current = self.current.lock().await;
        self.stop_locked(&mut current).await
    }

    /// Snapshot of the current session.
    ///
    /// Answers immediately, even while a start or stop is in progress; a
    /// session being stopped stays visible until its process is gone.
    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        let visible = self
            .visible
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        visible.as_ref().map(snapshot)
    }

    /// The current session if its id is `id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` otherwise.
    pub fn session(&self, id: &str) -> Result<Session> {
        self.current_session()
            .filter(|session| session.id == id)
            .ok_or_else(|| AppError::NotFound(format!("session {id}")))
    }

    async fn stop_locked(&self, current: &mut Option<ActiveSession>) -> Option<Session> {
        let active = current.take()?;
        active.cancel.cancel();
        if let Some(monitor) = active.monitor {
            let _ = monitor.await;
        }
        if let Some(handle) = &active.handle {
            let outcome = self
                .supervisor
                .stop(handle, self.config.shutdown.grace_period())
                .await;
            info!(pid = handle.pid(), ?outcome, "session process stopped");
        }

        let session = {
            let mut session = active
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if session.is_active() {
                let _ = session.transition(SessionStatus::Stopped);
            }
            session.clone()
        };
        self.publish(None);
        if let Err(err) = self.store.save(None) {
            warn!(%err, "failed to persist cleared session state");
        }
        info!(session_id = %session.id, status = ?session.status, "session stopped");
        Some(session)
    }

    fn publish(&self, session: Option<SharedSession>) {
        *self.visible.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn persist(&self, session: &Session) {
        if let Err(err) = self.store.save(Some(session)) {
            warn!(session_id = %session.id, %err, "failed to persist session state");
        }
    }
}

/// Check that `directory` is a previewable project.
///
/// # Errors
///
/// Returns `AppError::Validation` naming the first unmet precondition.
pub fn validate_target(directory: &Path, settings: &RegistryConfig) -> Result<(PathBuf, Manifest)> {
    if !directory.is_dir() {
        return Err(AppError::Validation(format!(
            "target directory does not exist: {}",
            directory.display()
        )));
    }
    let directory = directory.canonicalize().map_err(|err| {
        AppError::Validation(format!("cannot resolve {}: {err}", directory.display()))
    })?;
    let manifest = Manifest::read(&directory).ok_or_else(|| {
        AppError::Validation(format!(
            "no valid {MANIFEST_FILE} in {}",
            directory.display()
        ))
    })?;
    let project_type = ProjectType::from_dependencies(&manifest.all_dependencies());
    if !settings
        .previewable_frameworks
        .iter()
        .any(|label| label == project_type.label())
    {
        return Err(AppError::Validation(format!(
            "{MANIFEST_FILE} declares no previewable framework (detected `{}`; accepted: {})",
            project_type.label(),
            settings.previewable_frameworks.join(", ")
        )));
    }
    Ok((directory, manifest))
}

/// Background follower of one session.
struct SessionMonitor {
    session: SharedSession,
    handle: Arc<ProcessHandle>,
    supervisor: ProcessSupervisor,
    store: SessionStore,
    detector: ReadinessDetector,
    grace: Duration,
}

impl SessionMonitor {
    async fn run(self, cancel: CancellationToken) {
        let observer = self.handle.observer().clone();
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = async {
                tokio::join!(
                    self.follow_lifecycle(&observer, &cancel),
                    self.follow_auxiliary_urls(&observer),
                );
            } => {}
        }
    }

    fn update(&self, apply: impl FnOnce(&mut Session)) {
        let session = {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            apply(&mut session);
            session.clone()
        };
        if let Err(err) = self.store.save(Some(&session)) {
            warn!(%err, "failed to persist session state");
        }
    }

    async fn follow_lifecycle(&self, observer: &ProcessObserver, cancel: &CancellationToken) {
        let result = self.detector.wait_for_ready(observer, cancel).await;
        if result.success {
            self.update(|session| {
                session.urls.primary.clone_from(&result.url);
                if session.can_transition_to(SessionStatus::Running) {
                    let _ = session.transition(SessionStatus::Running);
                }
            });
        } else {
            let message = result.error.clone().unwrap_or_default();
            self.update(|session| {
                session.error = Some(message);
                if session.is_active() {
                    let _ = session.transition(SessionStatus::Error);
                }
            });
            if result.failure == Some(ReadinessFailure::Timeout) {
                let outcome = self.supervisor.stop(&self.handle, self.grace).await;
                info!(?outcome, "stopped session that never became ready");
            }
        }

        let mut exit_rx = observer.subscribe_exit();
        while !observer.has_exited() {
            if exit_rx.changed().await.is_err() {
                return;
            }
        }
        let code = observer.exit_code();
        self.update(|session| {
            if !session.is_active() {
                return;
            }
            if code == Some(0) {
                let _ = session.transition(SessionStatus::Completed);
            } else {
                session.error = Some(match code {
                    Some(code) => format!("dev server exited with code {code}"),
                    None => "dev server was terminated by a signal".into(),
                });
                let _ = session.transition(SessionStatus::Error);
            }
        });
        info!(?code, "session process exited");
    }

    async fn follow_auxiliary_urls(&self, observer: &ProcessObserver) {
        let mut lines_rx = observer.output().subscribe();
        let mut next = 0;
        loop {
            let lines = observer.output().lines_from(next);
            next += lines.len();
            for line in lines {
                if !matches!(line.stream, StreamKind::Stdout | StreamKind::Stderr) {
                    continue;
                }
                let hit = patterns::scrape_auxiliary(&patterns::strip_ansi(&line.text));
                if hit.lan.is_none() && hit.devtools.is_none() && !hit.metro_waiting {
                    continue;
                }
                self.update(|session| {
                    if let Some(lan) = hit.lan {
                        session.urls.lan.get_or_insert(lan);
                    }
                    if let Some(devtools) = hit.devtools {
                        session.urls.devtools.get_or_insert(devtools);
                    }
                    if hit.metro_waiting && session.can_transition_to(SessionStatus::Running) {
                        let _ = session.transition(SessionStatus::Running);
                    }
                });
            }
            if observer.has_exited() && next >= observer.output().len() {
                return;
            }
            tokio::select! {
                changed = lines_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                () = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }
    }
}
