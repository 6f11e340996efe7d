#![forbid(unsafe_code)]

//! `preview-supervisor`: dev server preview supervision.
//!
//! `verify` runs a one-shot verification and writes `RUN_CERTIFICATE.json`
//! or `RUN_FAILURE.json`; `serve` runs the local session control API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use preview_supervisor::api::{self, AppState};
use preview_supervisor::config::GlobalConfig;
use preview_supervisor::registry::SessionRegistry;
use preview_supervisor::verify::{Verdict, Verifier, VerifyRequest};
use preview_supervisor::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "preview-supervisor", about = "Dev server preview supervisor", version, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify that a project's dev server starts and serves traffic.
    Verify {
        /// Project directory.
        target: PathBuf,
        /// Port to run the dev server on.
        #[arg(long)]
        port: Option<u16>,
        /// Readiness timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Skip dependency installation.
        #[arg(long)]
        skip_install: bool,
        /// Skip the build script.
        #[arg(long)]
        skip_build: bool,
        /// Open the URL in a browser after a pass.
        #[arg(long)]
        open_browser: bool,
        /// Install command overriding the package manager default.
        #[arg(long = "install")]
        install_command: Option<String>,
        /// Dev server command overriding the manifest script.
        #[arg(long = "dev")]
        dev_command: Option<String>,
        /// Directory receiving the verdict documents.
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,
    },
    /// Run the session control HTTP API.
    Serve {
        /// Port overriding `http_port`.
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let code = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(args: Cli) -> Result<i32> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    match args.command {
        Command::Verify {
            target,
            port,
            timeout,
            skip_install,
            skip_build,
            open_browser,
            install_command,
            dev_command,
            artifacts_dir,
        } => {
            let request = VerifyRequest {
                target_dir: target,
                port,
                timeout: timeout.map(Duration::from_secs),
                skip_install,
                skip_build,
                open_browser,
                install_command,
                dev_command,
                artifacts_dir,
            };
            Ok(verify(Arc::new(config), &request).await)
        }
        Command::Serve { port } => {
            if let Some(port) = port {
                config.http_port = port;
            }
            config.validate()?;
            serve(Arc::new(config)).await?;
            Ok(0)
        }
    }
}

async fn verify(config: Arc<GlobalConfig>, request: &VerifyRequest) -> i32 {
    let hard_exit = config.shutdown.hard_exit();
    let ct = CancellationToken::new();
    let verifier = Verifier::new(config);
    let run = verifier.run(request, &ct);
    tokio::pin!(run);

    let verdict = tokio::select! {
        verdict = &mut run => verdict,
        () = shutdown_signal() => {
            warn!("interrupt received; stopping verification");
            ct.cancel();
            if let Ok(verdict) = tokio::time::timeout(hard_exit, run).await {
                verdict
            } else {
                error!("shutdown exceeded hard bound; exiting");
                std::process::exit(1);
            }
        }
    };

    match &verdict {
        Verdict::Pass { certificate, path } => {
            println!("PASS {} ({} probe(s))", certificate.url, certificate.attempts);
            println!("certificate: {}", path.display());
        }
        Verdict::Fail { report, path } => {
            println!("FAIL [{}] {}", report.error_kind, report.error);
            if let Some(hint) = &report.remediation {
                println!("hint: {hint}");
            }
            if let Some(path) = path {
                println!("report: {}", path.display());
            }
        }
    }
    verdict.exit_code()
}

async fn serve(config: Arc<GlobalConfig>) -> Result<()> {
    let registry = Arc::new(SessionRegistry::new(Arc::clone(&config))?);
    let hard_exit = config.shutdown.hard_exit();
    let state = AppState {
        config,
        registry: Arc::clone(&registry),
    };

    let ct = CancellationToken::new();
    let api_ct = ct.clone();
    let mut api_handle = tokio::spawn(api::serve(state, api_ct));

    // ── Wait for shutdown signal ────────────────────────
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        joined = &mut api_handle => {
            return match joined {
                Ok(result) => result,
                Err(err) => Err(AppError::Config(format!("HTTP task failed: {err}"))),
            };
        }
    }
    ct.cancel();

    // ── Bounded two-phase shutdown ──────────────────────
    let drained = tokio::time::timeout(hard_exit, async {
        if let Some(session) = registry.stop_current_session().await {
            info!(session_id = %session.id, "stopped current session");
        }
        let _ = api_handle.await;
    })
    .await;
    if drained.is_err() {
        warn!("shutdown exceeded hard bound; exiting");
    }
    info!("preview-supervisor shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
