//! Unit tests for manifest detection.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use preview_supervisor::command::CommandLine;
use preview_supervisor::manifest::{
    detect, detect_package_manager, Manifest, PackageManager, ProjectType,
};
use preview_supervisor::AppError;

fn write_manifest(dir: &Path, body: &str) {
    fs::write(dir.join("package.json"), body).expect("write manifest");
}

fn deps(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| (*n).to_owned()).collect()
}

#[test]
fn missing_manifest_is_detection_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = detect(dir.path());
    assert!(matches!(result, Err(AppError::Detection(_))));
    assert!(detect_package_manager(dir.path()).is_none());
}

#[test]
fn malformed_manifest_behaves_like_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), "{ not json");
    assert!(Manifest::read(dir.path()).is_none());
    assert!(matches!(detect(dir.path()), Err(AppError::Detection(_))));
}

#[test]
fn manifest_without_run_script_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), r#"{"scripts": {"test": "jest"}}"#);
    let err = detect(dir.path()).expect_err("no runnable script");
    assert!(err.to_string().contains("dev, start"));
}

#[test]
fn lockfile_precedence_picks_bun_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), r#"{"scripts": {"dev": "vite"}}"#);
    fs::write(dir.path().join("yarn.lock"), "").expect("yarn.lock");
    fs::write(dir.path().join("bun.lockb"), "").expect("bun.lockb");
    let (pm, lock) = detect_package_manager(dir.path()).expect("manifest present");
    assert_eq!(pm, PackageManager::Bun);
    assert_eq!(lock.as_deref(), Some(dir.path().join("bun.lockb").as_path()));
}

#[test]
fn no_lockfile_defaults_to_npm() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), r#"{"scripts": {"start": "node server.js"}}"#);
    let detection = detect(dir.path()).expect("detect");
    assert_eq!(detection.package_manager, PackageManager::Npm);
    assert!(detection.lockfile.is_none());
    assert_eq!(detection.run_script, "start");
    assert_eq!(detection.run_command, CommandLine::new("npm", &["run", "start"]));
}

#[test]
fn dev_script_wins_over_start() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(
        dir.path(),
        r#"{"scripts": {"start": "vite preview", "dev": "vite"}, "devDependencies": {"vite": "^5"}}"#,
    );
    fs::write(dir.path().join("pnpm-lock.yaml"), "").expect("lock");
    let detection = detect(dir.path()).expect("detect");
    assert_eq!(detection.run_script, "dev");
    assert_eq!(detection.run_command, CommandLine::new("pnpm", &["run", "dev"]));
    assert_eq!(detection.project_type, ProjectType::Vite);
    assert_eq!(detection.default_port, 5173);
    assert!(detection.has_dependency("vite"));
}

#[test]
fn yarn_runs_scripts_directly() {
    assert_eq!(
        PackageManager::Yarn.run_script("dev"),
        CommandLine::new("yarn", &["dev"])
    );
    assert_eq!(
        PackageManager::Yarn.install(),
        CommandLine::new("yarn", &["install"])
    );
}

#[test]
fn build_command_only_when_declared() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), r#"{"scripts": {"dev": "next dev", "build": "next build"}}"#);
    let detection = detect(dir.path()).expect("detect");
    assert_eq!(
        detection.build_command(),
        Some(CommandLine::new("npm", &["run", "build"]))
    );

    write_manifest(dir.path(), r#"{"scripts": {"dev": "next dev"}}"#);
    let detection = detect(dir.path()).expect("detect");
    assert!(detection.build_command().is_none());
}

#[test]
fn project_type_markers_are_ordered() {
    assert_eq!(ProjectType::from_dependencies(&deps(&["expo", "react"])), ProjectType::Expo);
    assert_eq!(ProjectType::from_dependencies(&deps(&["next", "react"])), ProjectType::Nextjs);
    assert_eq!(ProjectType::from_dependencies(&deps(&["vue", "vite"])), ProjectType::Vite);
    assert_eq!(ProjectType::from_dependencies(&deps(&["@sveltejs/kit"])), ProjectType::Svelte);
    assert_eq!(ProjectType::from_dependencies(&deps(&["express"])), ProjectType::NodeServer);
    assert_eq!(ProjectType::from_dependencies(&deps(&["react"])), ProjectType::React);
    assert_eq!(ProjectType::from_dependencies(&deps(&["lodash"])), ProjectType::Node);
}

#[test]
fn default_ports_follow_framework() {
    assert_eq!(ProjectType::Expo.default_port(), 8081);
    assert_eq!(ProjectType::Astro.default_port(), 4321);
    assert_eq!(ProjectType::Vite.default_port(), 5173);
    assert_eq!(ProjectType::Nextjs.default_port(), 3000);
}

#[test]
fn labels_round_trip() {
    for label in ["expo", "nextjs", "vite", "node-server", "node"] {
        let kind = ProjectType::from_label(label).expect("known label");
        assert_eq!(kind.label(), label);
    }
    assert!(ProjectType::from_label("angular").is_none());
}
