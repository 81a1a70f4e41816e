//! Live log tails.
//!
//! A [`LogSource`] opens a logical tail over one transport and feeds
//! complete lines into the dispatcher queue until shutdown.  Lines are
//! emitted without trailing newlines, CRLF normalised to LF, in source
//! order; the residue after the last newline is carried until the next
//! read completes it.
//!
//! Offset rules shared by every variant: start at 0 when configured to
//! read from the start, else at the current size; advance by the bytes
//! actually consumed; reset to 0 when the observed size shrinks below the
//! offset (rotation); deliver nothing while the size is unchanged.

use crate::status::StatusCell;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub mod ftp;
pub mod local;
pub mod sftp;

pub use ftp::{FtpConfig, FtpSource};
pub use local::LocalSource;
pub use sftp::{HostKeyPolicy, SftpConfig, SftpSource};

/// Connect timeout for the remote variants.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport selection for one server's tail.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    Local {
        path: PathBuf,
        read_from_start: bool,
    },
    Sftp(SftpConfig),
    Ftp(FtpConfig),
}

impl SourceConfig {
    /// Instantiate the matching source.
    pub fn build(&self) -> Box<dyn LogSource> {
        match self {
            SourceConfig::Local {
                path,
                read_from_start,
            } => Box::new(LocalSource::new(path.clone(), *read_from_start)),
            SourceConfig::Sftp(cfg) => Box::new(SftpSource::new(cfg.clone())),
            SourceConfig::Ftp(cfg) => Box::new(FtpSource::new(cfg.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(String),
    /// Fatal for the source; the watcher is not restarted.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("transport: {0}")]
    Transport(String),
    /// Rotation left residue that could not be re-read.
    #[error("integrity: {0}")]
    Integrity(String),
}

// ---------------------------------------------------------------------------
// LogSource contract
// ---------------------------------------------------------------------------

/// One live tail.  `run` owns the transport and returns only on shutdown
/// (Ok) or a fatal error.  Transient transport failures are handled
/// internally with reconnects.
#[async_trait]
pub trait LogSource: Send {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<String>,
        shutdown: watch::Receiver<bool>,
        status: StatusCell,
    ) -> Result<(), SourceError>;
}

// ---------------------------------------------------------------------------
// Line assembly
// ---------------------------------------------------------------------------

/// Turns raw byte chunks into complete lines.
///
/// Bytes after the last newline of a chunk are held until a later chunk
/// completes the line, so a partial read never yields a torn line.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        LineAssembler::default()
    }

    /// Feed one chunk; return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.partial.drain(..=last_newline).collect();
        let mut pieces: Vec<&[u8]> = complete.split(|&b| b == b'\n').collect();
        // split() yields an empty trailing piece after the final newline.
        pieces.pop();
        pieces
            .into_iter()
            .map(|raw| {
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                String::from_utf8_lossy(raw).into_owned()
            })
            .collect()
    }

    /// Discard any held residue (the file was replaced).
    pub fn reset(&mut self) {
        self.partial.clear();
    }
}

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_CEILING: Duration = Duration::from_secs(60);

/// Exponential reconnect backoff: 1 s doubling to a 60 s ceiling, reset
/// after a successful fetch.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            current: BACKOFF_INITIAL,
        }
    }
}

impl Backoff {
    pub fn new() -> Self {
        Backoff::default()
    }

    /// The delay to sleep now; doubles the next one.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(BACKOFF_CEILING);
        delay
    }

    pub fn reset(&mut self) {
        self.current = BACKOFF_INITIAL;
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Deterministic per-source temp buffer path for remote fetches.
///
/// The name is a hash of `(host, port, path)` so a restarted source reuses
/// (and truncates) the same file instead of littering the temp dir.
pub(crate) fn temp_buffer_path(host: &str, port: u16, path: &str) -> PathBuf {
    let digest = Sha256::digest(format!("{host}:{port}:{path}").as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        let _ = write!(hex, "{byte:02x}");
    }
    std::env::temp_dir().join(format!("squad-aegis-tail-{hex}.tmp"))
}

/// Why line delivery stopped.
pub(crate) enum DeliveryHalt {
    Shutdown,
    /// The dispatcher hung up.
    Closed,
}

/// Push lines into the dispatcher queue, respecting backpressure but
/// abandoning the wait on shutdown.  A closed shutdown channel counts as
/// shutdown.
pub(crate) async fn deliver_lines(
    tx: &mpsc::Sender<String>,
    shutdown: &mut watch::Receiver<bool>,
    lines: Vec<String>,
) -> Result<(), DeliveryHalt> {
    for line in lines {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Err(DeliveryHalt::Shutdown);
                }
                if tx.send(line).await.is_err() {
                    return Err(DeliveryHalt::Closed);
                }
            }
            permit = tx.reserve() => match permit {
                Ok(permit) => permit.send(line),
                Err(_) => return Err(DeliveryHalt::Closed),
            }
        }
    }
    Ok(())
}

/// Sleep for `duration` unless shutdown fires first.  Returns false on
/// shutdown (including a closed shutdown channel).
pub(crate) async fn idle(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        biased;
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
        () = tokio::time::sleep(duration) => true,
    }
}

pub(crate) fn shutting_down(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_normalises_crlf_and_holds_partials() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"alpha\r\nbeta\npartial");
        assert_eq!(lines, vec!["alpha".to_owned(), "beta".to_owned()]);
        let lines = assembler.push(b" tail\n");
        assert_eq!(lines, vec!["partial tail".to_owned()]);
    }

    #[test]
    fn assembler_suppresses_final_empty_line() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"only\n");
        assert_eq!(lines, vec!["only".to_owned()]);
        assert!(assembler.push(b"").is_empty());
    }

    #[test]
    fn assembler_keeps_interior_empty_lines() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"a\n\nb\n");
        assert_eq!(lines, vec!["a".to_owned(), String::new(), "b".to_owned()]);
    }

    #[test]
    fn assembler_reset_drops_residue() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"torn").is_empty());
        assembler.reset();
        assert_eq!(assembler.push(b"fresh\n"), vec!["fresh".to_owned()]);
    }

    #[test]
    fn backoff_doubles_to_ceiling_and_resets() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next(), Duration::from_secs(1));
        assert_eq!(backoff.next(), Duration::from_secs(2));
        assert_eq!(backoff.next(), Duration::from_secs(4));
        for _ in 0..10 {
            backoff.next();
        }
        assert_eq!(backoff.next(), Duration::from_secs(60));
        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_secs(1));
    }

    #[test]
    fn temp_buffer_path_is_deterministic_and_distinct() {
        let a = temp_buffer_path("game.example.com", 22, "/logs/SquadGame.log");
        let b = temp_buffer_path("game.example.com", 22, "/logs/SquadGame.log");
        let c = temp_buffer_path("game.example.com", 21, "/logs/SquadGame.log");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
