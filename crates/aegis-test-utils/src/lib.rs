// aegis-test-utils: Shared fixtures for the log pipeline test suites.
//
// Provides an append/rotate temp logfile and canned Squad log lines so
// unit and integration tests do not each hand-assemble the wire format.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub mod lines;

/// A temp log file a test can append to and rotate, as a game server would.
pub struct TempLog {
    _dir: TempDir,
    path: PathBuf,
}

impl Default for TempLog {
    fn default() -> Self {
        TempLog::new()
    }
}

impl TempLog {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("SquadGame.log");
        std::fs::write(&path, b"").expect("create log file");
        TempLog { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line (newline added) and flush to disk.
    pub fn append_line(&self, line: &str) {
        self.append_raw(format!("{line}\n").as_bytes());
    }

    /// Append raw bytes, exactly as given.
    pub fn append_raw(&self, bytes: &[u8]) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .expect("open log file");
        file.write_all(bytes).expect("append");
        file.sync_all().expect("sync");
    }

    /// Replace the file content wholesale, as log rotation does.
    pub fn rotate_with(&self, content: &str) {
        std::fs::write(&self.path, content).expect("rotate");
    }

    pub fn size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }
}
