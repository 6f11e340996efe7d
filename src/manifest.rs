//! Manifest detection: package manager, run script, project type, port.
//!
//! Detection is a pure read of `package.json` and the lock files next to
//! it. A manifest that fails to parse is treated exactly like a missing one.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::CommandLine;
use crate::{AppError, Result};

/// File name of the project manifest.
pub const MANIFEST_FILE: &str = "package.json";

/// Script names considered runnable, in priority order.
pub const RUN_SCRIPTS: &[&str] = &["dev", "start", "serve", "develop", "watch"];

/// Port assumed when the project type carries no better hint.
pub const FALLBACK_PORT: u16 = 3000;

/// Package manager variant inferred from lock files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// `bun.lockb`.
    Bun,
    /// `pnpm-lock.yaml`.
    Pnpm,
    /// `yarn.lock`.
    Yarn,
    /// `package-lock.json`, or no lock file at all.
    Npm,
}

const LOCKFILES: &[(&str, PackageManager)] = &[
    ("bun.lockb", PackageManager::Bun),
    ("pnpm-lock.yaml", PackageManager::Pnpm),
    ("yarn.lock", PackageManager::Yarn),
    ("package-lock.json", PackageManager::Npm),
];

impl PackageManager {
    /// Executable name.
    #[must_use]
    pub fn program(self) -> &'static str {
        match self {
            Self::Bun => "bun",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
            Self::Npm => "npm",
        }
    }

    /// Command that runs a manifest script. Yarn takes the script directly.
    #[must_use]
    pub fn run_script(self, script: &str) -> CommandLine {
        match self {
            Self::Yarn => CommandLine::new("yarn", &[script]),
            other => CommandLine::new(other.program(), &["run", script]),
        }
    }

    /// Command that installs dependencies.
    #[must_use]
    pub fn install(self) -> CommandLine {
        CommandLine::new(self.program(), &["install"])
    }
}

/// Framework family inferred from declared dependencies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    /// Expo / React Native.
    Expo,
    /// Next.js.
    Nextjs,
    /// Vite.
    Vite,
    /// Remix.
    Remix,
    /// Nuxt.
    Nuxt,
    /// Astro.
    Astro,
    /// Svelte or `SvelteKit`.
    Svelte,
    /// Create React App.
    Cra,
    /// Vue without Nuxt.
    Vue,
    /// Express, Fastify or Koa backend.
    NodeServer,
    /// React without a recognized bundler.
    React,
    /// Nothing recognized.
    Node,
}

/// Dependency markers checked in order; first hit decides the type.
const PROJECT_MARKERS: &[(&[&str], ProjectType)] = &[
    (&["expo"], ProjectType::Expo),
    (&["next"], ProjectType::Nextjs),
    (&["vite"], ProjectType::Vite),
    (&["@remix-run/react"], ProjectType::Remix),
    (&["nuxt"], ProjectType::Nuxt),
    (&["astro"], ProjectType::Astro),
    (&["svelte", "@sveltejs/kit"], ProjectType::Svelte),
    (&["react-scripts"], ProjectType::Cra),
    (&["vue"], ProjectType::Vue),
    (&["express", "fastify", "koa"], ProjectType::NodeServer),
    (&["react"], ProjectType::React),
];

impl ProjectType {
    /// Stable label used in config files and artifacts.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Expo => "expo",
            Self::Nextjs => "nextjs",
            Self::Vite => "vite",
            Self::Remix => "remix",
            Self::Nuxt => "nuxt",
            Self::Astro => "astro",
            Self::Svelte => "svelte",
            Self::Cra => "cra",
            Self::Vue => "vue",
            Self::NodeServer => "node-server",
            Self::React => "react",
            Self::Node => "node",
        }
    }

    /// Inverse of [`ProjectType::label`].
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        PROJECT_MARKERS
            .iter()
            .map(|(_, kind)| *kind)
            .chain(std::iter::once(Self::Node))
            .find(|kind| kind.label() == label)
    }

    /// Port the framework listens on when left to its defaults.
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Expo => 8081,
            Self::Vite | Self::Svelte | Self::Vue => 5173,
            Self::Astro => 4321,
            Self::Nextjs
            | Self::Cra
            | Self::Remix
            | Self::Nuxt
            | Self::NodeServer
            | Self::React
            | Self::Node => FALLBACK_PORT,
        }
    }

    /// Classify a dependency set.
    #[must_use]
    pub fn from_dependencies(deps: &BTreeSet<String>) -> Self {
        PROJECT_MARKERS
            .iter()
            .find(|(names, _)| names.iter().any(|name| deps.contains(*name)))
            .map_or(Self::Node, |(_, kind)| *kind)
    }
}

/// The subset of `package.json` this crate reads.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Declared scripts.
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    /// Runtime dependencies.
    #[serde(default)]
    pub dependencies: BTreeMap<String, serde_json::Value>,
    /// Development dependencies.
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, serde_json::Value>,
}

impl Manifest {
    /// Read `package.json` from `dir`. Missing or malformed yields `None`.
    #[must_use]
    pub fn read(dir: &Path) -> Option<Self> {
        let path = dir.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(manifest) => Some(manifest),
            Err(err) => {
                debug!(path = %path.display(), %err, "ignoring malformed manifest");
                None
            }
        }
    }

    /// Union of runtime and development dependency names.
    #[must_use]
    pub fn all_dependencies(&self) -> BTreeSet<String> {
        self.dependencies
            .keys()
            .chain(self.dev_dependencies.keys())
            .cloned()
            .collect()
    }

    /// First declared script from [`RUN_SCRIPTS`].
    #[must_use]
    pub fn run_script(&self) -> Option<&'static str> {
        RUN_SCRIPTS
            .iter()
            .copied()
            .find(|name| self.scripts.contains_key(*name))
    }
}

/// Everything needed to launch a project's dev server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Absolute or caller-relative path of `package.json`.
    pub manifest_path: PathBuf,
    /// Lock file that decided the package manager, if any.
    pub lockfile: Option<PathBuf>,
    /// Package manager variant.
    pub package_manager: PackageManager,
    /// Chosen script name.
    pub run_script: String,
    /// Command that runs the chosen script.
    pub run_command: CommandLine,
    /// Framework family.
    pub project_type: ProjectType,
    /// Framework default port.
    pub default_port: u16,
    /// All declared scripts.
    pub scripts: BTreeMap<String, String>,
    /// All declared dependency names.
    pub dependencies: BTreeSet<String>,
}

impl Detection {
    /// Dependency install command for the detected manager.
    #[must_use]
    pub fn install_command(&self) -> CommandLine {
        self.package_manager.install()
    }

    /// Command for the `build` script, if the manifest declares one.
    #[must_use]
    pub fn build_command(&self) -> Option<CommandLine> {
        self.scripts
            .contains_key("build")
            .then(|| self.package_manager.run_script("build"))
    }

    /// Whether `name` is declared in either dependency table.
    #[must_use]
    pub fn has_dependency(&self, name: &str) -> bool {
        self.dependencies.contains(name)
    }
}

/// Package manager from lock files; `None` when there is no manifest.
#[must_use]
pub fn detect_package_manager(dir: &Path) -> Option<(PackageManager, Option<PathBuf>)> {
    if !dir.join(MANIFEST_FILE).is_file() {
        return None;
    }
    let found = LOCKFILES
        .iter()
        .map(|(name, pm)| (dir.join(name), *pm))
        .find(|(path, _)| path.is_file());
    Some(match found {
        Some((path, pm)) => (pm, Some(path)),
        None => (PackageManager::Npm, None),
    })
}

/// Detect how to run the dev server in `dir`.
///
/// # Errors
///
/// Returns `AppError::Detection` if there is no valid manifest or it
/// declares none of the [`RUN_SCRIPTS`].
pub fn detect(dir: &Path) -> Result<Detection> {
    let manifest = Manifest::read(dir).ok_or_else(|| {
        AppError::Detection(format!(
            "no valid {MANIFEST_FILE} in {}",
            dir.display()
        ))
    })?;
    let (package_manager, lockfile) = detect_package_manager(dir).unwrap_or((PackageManager::Npm, None));

    let run_script = manifest.run_script().ok_or_else(|| {
        AppError::Detection(format!(
            "{MANIFEST_FILE} declares none of the scripts: {}",
            RUN_SCRIPTS.join(", ")
        ))
    })?;

    let dependencies = manifest.all_dependencies();
    let project_type = ProjectType::from_dependencies(&dependencies);

    debug!(
        dir = %dir.display(),
        package_manager = package_manager.program(),
        script = run_script,
        project_type = project_type.label(),
        "manifest detected"
    );

    Ok(Detection {
        manifest_path: dir.join(MANIFEST_FILE),
        lockfile,
        package_manager,
        run_script: run_script.to_owned(),
        run_command: package_manager.run_script(run_script),
        project_type,
        default_port: project_type.default_port(),
        scripts: manifest.scripts,
        dependencies,
    })
}
