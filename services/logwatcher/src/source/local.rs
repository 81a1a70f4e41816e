//! Local file tail.
//!
//! Poll-based: each tick stats the file, reads any bytes past the current
//! offset, and emits the lines they complete.  Rotation (the file shrank)
//! reopens from offset 0.  The file handle is reopened per read so a
//! replaced file is always picked up.

use super::{
    DeliveryHalt, LineAssembler, LogSource, SourceError, deliver_lines, idle, shutting_down,
};
use crate::status::{StatusCell, WatcherStatus};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 64 * 1024;

/// Tail of a log file on the local filesystem.
#[derive(Debug)]
pub struct LocalSource {
    path: PathBuf,
    read_from_start: bool,
}

impl LocalSource {
    pub fn new(path: impl Into<PathBuf>, read_from_start: bool) -> Self {
        LocalSource {
            path: path.into(),
            read_from_start,
        }
    }

    /// Read `[offset, size)` and return the bytes actually copied.
    async fn read_range(&self, offset: u64, size: u64) -> Result<Vec<u8>, SourceError> {
        let mut file = File::open(&self.path)
            .await
            .map_err(|e| SourceError::Transport(format!("open {}: {e}", self.path.display())))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| SourceError::Transport(format!("seek: {e}")))?;
        let mut remaining = (size - offset) as usize;
        let mut out = Vec::with_capacity(remaining.min(READ_CHUNK));
        let mut buf = vec![0u8; READ_CHUNK];
        while remaining > 0 {
            let want = remaining.min(READ_CHUNK);
            let n = file
                .read(&mut buf[..want])
                .await
                .map_err(|e| SourceError::Transport(format!("read: {e}")))?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
            remaining -= n;
        }
        Ok(out)
    }
}

#[async_trait]
impl LogSource for LocalSource {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<String>,
        mut shutdown: watch::Receiver<bool>,
        status: StatusCell,
    ) -> Result<(), SourceError> {
        let mut offset: Option<u64> = if self.read_from_start { Some(0) } else { None };
        let mut assembler = LineAssembler::new();
        info!(path = %self.path.display(), "tailing local log");

        loop {
            if shutting_down(&shutdown) {
                break;
            }
            match tokio::fs::metadata(&self.path).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    status.set(WatcherStatus::Degraded);
                    status.record_error(format!("log file missing: {}", self.path.display()));
                    debug!(path = %self.path.display(), "log file not found, waiting");
                }
                Err(e) => {
                    status.set(WatcherStatus::Degraded);
                    status.record_error(format!("stat failed: {e}"));
                    warn!(error = %e, "stat failed");
                }
                Ok(meta) => {
                    let size = meta.len();
                    let mut current = *offset.get_or_insert(size);
                    if size < current {
                        info!(size, offset = current, "log rotated, reading from start");
                        current = 0;
                        assembler.reset();
                    }
                    if size > current {
                        match self.read_range(current, size).await {
                            Ok(bytes) => {
                                offset = Some(current + bytes.len() as u64);
                                status.set(WatcherStatus::Running);
                                let lines = assembler.push(&bytes);
                                match deliver_lines(&tx, &mut shutdown, lines).await {
                                    Ok(()) => {}
                                    Err(DeliveryHalt::Shutdown) => break,
                                    Err(DeliveryHalt::Closed) => return Ok(()),
                                }
                            }
                            Err(e) => {
                                status.set(WatcherStatus::Degraded);
                                status.record_error(e.to_string());
                                warn!(error = %e, "read failed");
                                offset = Some(current);
                            }
                        }
                    } else {
                        offset = Some(current);
                        status.set(WatcherStatus::Running);
                    }
                }
            }
            if !idle(&mut shutdown, POLL_INTERVAL).await {
                break;
            }
        }
        Ok(())
    }
}
