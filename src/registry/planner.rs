//! Launch planning: which command previews a validated project.

use std::path::Path;

use crate::command::CommandLine;
use crate::manifest::{self, Manifest, ProjectType};
use crate::models::session::SessionMode;
use crate::{AppError, Result};

/// Command and environment chosen for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Dev server command.
    pub command: CommandLine,
    /// Extra environment for the child.
    pub env: Vec<(String, String)>,
    /// URL to probe until the output announces one.
    pub hint_url: Option<String>,
}

/// Maps a validated project and launch mode to a command.
pub trait LaunchPlanner: Send + Sync + std::fmt::Debug {
    /// Plan the launch of `directory`, whose manifest is `manifest`.
    ///
    /// # Errors
    ///
    /// Returns a client error if the mode does not fit the project.
    fn plan(&self, directory: &Path, manifest: &Manifest, mode: SessionMode) -> Result<LaunchPlan>;
}

/// Plans from the manifest: its dev script, or `expo start --dev-client`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestLaunchPlanner;

impl LaunchPlanner for ManifestLaunchPlanner {
    fn plan(&self, directory: &Path, manifest: &Manifest, mode: SessionMode) -> Result<LaunchPlan> {
        // Keeps CRA and friends from opening a browser on the service host.
        let env = vec![("BROWSER".to_owned(), "none".to_owned())];
        match mode {
            SessionMode::DevClient => {
                if !manifest.all_dependencies().contains("expo") {
                    return Err(AppError::Validation(
                        "dev-client mode requires an expo project".into(),
                    ));
                }
                Ok(LaunchPlan {
                    command: CommandLine::new("npx", &["expo", "start", "--dev-client"]),
                    env,
                    hint_url: Some(format!(
                        "http://localhost:{}",
                        ProjectType::Expo.default_port()
                    )),
                })
            }
            SessionMode::Dev => {
                let detection = manifest::detect(directory)?;
                Ok(LaunchPlan {
                    command: detection.run_command,
                    env,
                    hint_url: Some(format!("http://localhost:{}", detection.default_port)),
                })
            }
        }
    }
}
