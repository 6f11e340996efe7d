//! Unit tests for the persisted session state file.

use std::path::PathBuf;

use preview_supervisor::models::session::{Session, SessionMode};
use preview_supervisor::registry::store::SessionStore;

#[test]
fn missing_file_loads_as_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SessionStore::new(dir.path().join("sessions.json"));
    assert!(store.load().is_none());
}

#[test]
fn save_then_load_keeps_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SessionStore::new(dir.path().join("nested/sessions.json"));
    let session = Session::new(PathBuf::from("/srv/app"), SessionMode::Dev);
    store.save(Some(&session)).expect("save");

    let state = store.load().expect("state");
    assert_eq!(state.current_session, Some(session));

    let raw = std::fs::read_to_string(store.path()).expect("read");
    assert!(raw.contains("\"currentSession\""));
    assert!(raw.contains("\"lastUpdated\""));
}

#[test]
fn discard_stale_reports_and_clears() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SessionStore::new(dir.path().join("sessions.json"));
    let session = Session::new(PathBuf::from("/srv/app"), SessionMode::Dev);
    store.save(Some(&session)).expect("save");

    let stale = store.discard_stale().expect("discard");
    assert_eq!(stale.map(|s| s.id), Some(session.id));
    let state = store.load().expect("rewritten");
    assert!(state.current_session.is_none());
}

#[test]
fn unreadable_file_is_ignored_and_rewritten() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sessions.json");
    std::fs::write(&path, "garbage").expect("write");
    let store = SessionStore::new(path);
    assert!(store.load().is_none());
    assert!(store.discard_stale().expect("discard").is_none());
    assert!(store.load().is_some());
}
