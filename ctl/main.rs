#![forbid(unsafe_code)]

//! `preview-ctl`: local CLI companion for `preview-supervisor serve`.
//!
//! Sends JSON requests to the session control API and prints the reply.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(
    name = "preview-ctl",
    about = "Local CLI for the preview-supervisor session API",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the running `preview-supervisor serve`.
    #[arg(long, default_value = "http://127.0.0.1:3456")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the service is up.
    Health,

    /// Show the current session.
    Status,

    /// Start a preview session, replacing any current one.
    Start {
        /// Project directory.
        dir: PathBuf,
        /// Launch mode: `dev` or `dev-client`.
        #[arg(long, default_value = "dev")]
        mode: String,
    },

    /// Stop the current session.
    Stop,
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(send_command(&args)) {
        Ok((true, body)) => {
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }
        Ok((false, body)) => {
            let err_msg = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            eprintln!("Error: {err_msg}");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Failed to reach server: {err}");
            eprintln!("Is preview-supervisor serving on {}?", args.url);
            std::process::exit(1);
        }
    }
}

/// Issue the request for `args.command`; returns `(success, body)`.
async fn send_command(
    args: &Cli,
) -> std::result::Result<(bool, Value), Box<dyn std::error::Error>> {
    let base = args.url.trim_end_matches('/');
    let client = reqwest::Client::builder().no_proxy().build()?;

    let request = match &args.command {
        Command::Health => client.get(format!("{base}/health")),
        Command::Status => client.get(format!("{base}/sessions")),
        Command::Start { dir, mode } => {
            let dir = dir.canonicalize().unwrap_or_else(|_| dir.clone());
            client
                .post(format!("{base}/sessions/start"))
                .json(&serde_json::json!({ "targetDirectory": dir, "mode": mode }))
        }
        Command::Stop => client.post(format!("{base}/sessions/stop")),
    };

    let response = request.send().await?;
    let success = response.status().is_success();
    let body: Value = response.json().await?;
    Ok((success, body))
}
