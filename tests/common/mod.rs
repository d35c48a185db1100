#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).unwrap()
}

/// Create a project directory with the named fixtures copied into
/// `contracts/`. The caller must hold onto `TempDir` to keep it alive.
pub fn setup_project(fixtures: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let contracts = dir.path().join("contracts");
    std::fs::create_dir_all(&contracts).unwrap();
    for name in fixtures {
        std::fs::copy(fixture_path(name), contracts.join(name)).unwrap();
    }
    dir
}

/// Write `events` as an event log (one JSON record per line, trailing blank
/// line) into `path`.
pub fn write_event_log(path: &Path, events: &[solcov::protocol::CoverageEvent]) {
    let mut log = String::new();
    for event in events {
        log.push_str(&serde_json::to_string(&event.to_raw()).unwrap());
        log.push('\n');
    }
    log.push('\n');
    std::fs::write(path, log).unwrap();
}
