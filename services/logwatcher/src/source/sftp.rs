//! SFTP polling tail.
//!
//! Each poll stats the remote file and range-reads `[offset, size)` through
//! a deterministic temp buffer.  Any read failure closes the SSH session
//! and reconnects with exponential backoff (1 s doubling to 60 s, reset
//! after a successful fetch).  A rejected password is fatal.
//!
//! # Host keys
//! The default policy accepts any host key, mirroring the deployments this
//! was written for (game hosts rotate machines freely).  A pinning policy
//! is available for installations that can manage fingerprints.

use super::{
    Backoff, CONNECT_TIMEOUT, DeliveryHalt, LineAssembler, LogSource, SourceError, deliver_lines,
    idle, shutting_down, temp_buffer_path,
};
use crate::status::{StatusCell, WatcherStatus};
use async_trait::async_trait;
use russh::client;
use russh::keys::HashAlg;
use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{info, warn};

const FETCH_CHUNK: usize = 32 * 1024;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// How to treat the server's host key.
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    /// Accept whatever the server presents.
    AcceptAny,
    /// Require the SHA-256 fingerprint (as printed by `ssh-keygen -lf`).
    Fingerprint(String),
}

#[derive(Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub path: String,
    pub poll_interval: Duration,
    pub read_from_start: bool,
    pub host_key: HostKeyPolicy,
}

// Credentials stay out of logs; Debug prints the endpoint only.
impl fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SSH plumbing
// ---------------------------------------------------------------------------

struct ClientHandler {
    policy: HostKeyPolicy,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::Fingerprint(expected) => {
                let actual = server_public_key.fingerprint(HashAlg::Sha256).to_string();
                Ok(&actual == expected)
            }
        }
    }
}

struct SftpLink {
    handle: client::Handle<ClientHandler>,
    sftp: russh_sftp::client::SftpSession,
}

impl SftpLink {
    async fn close(self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "closing", "")
            .await;
    }
}

fn transport(e: impl fmt::Display) -> SourceError {
    SourceError::Transport(e.to_string())
}

fn map_sftp(e: russh_sftp::client::error::Error) -> SourceError {
    let text = e.to_string();
    if text.to_lowercase().contains("no such file") {
        SourceError::NotFound(text)
    } else {
        SourceError::Transport(text)
    }
}

async fn connect(cfg: &SftpConfig) -> Result<SftpLink, SourceError> {
    let config = Arc::new(client::Config::default());
    let handler = ClientHandler {
        policy: cfg.host_key.clone(),
    };
    let mut handle = timeout(
        CONNECT_TIMEOUT,
        client::connect(config, (cfg.host.as_str(), cfg.port), handler),
    )
    .await
    .map_err(|_| SourceError::Transport("connect timed out".to_owned()))?
    .map_err(transport)?;

    let auth = timeout(
        CONNECT_TIMEOUT,
        handle.authenticate_password(cfg.username.clone(), cfg.password.clone()),
    )
    .await
    .map_err(|_| SourceError::Transport("auth timed out".to_owned()))?
    .map_err(transport)?;
    if !auth.success() {
        return Err(SourceError::AuthFailed(format!(
            "password rejected for {}@{}",
            cfg.username, cfg.host
        )));
    }

    let channel = handle.channel_open_session().await.map_err(transport)?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(transport)?;
    let sftp = russh_sftp::client::SftpSession::new(channel.into_stream())
        .await
        .map_err(map_sftp)?;
    Ok(SftpLink { handle, sftp })
}

// ---------------------------------------------------------------------------
// SftpSource
// ---------------------------------------------------------------------------

/// Tail of a log file reachable over SFTP.
#[derive(Debug)]
pub struct SftpSource {
    cfg: SftpConfig,
}

impl SftpSource {
    pub fn new(cfg: SftpConfig) -> Self {
        SftpSource { cfg }
    }

    /// One poll: stat, handle rotation, range-read through the temp buffer.
    /// Returns the completed lines (possibly none).
    async fn poll_once(
        link: &SftpLink,
        cfg: &SftpConfig,
        offset: &mut Option<u64>,
        assembler: &mut LineAssembler,
        temp: &Path,
    ) -> Result<Vec<String>, SourceError> {
        let attrs = link.sftp.metadata(cfg.path.clone()).await.map_err(map_sftp)?;
        let size = attrs.size.unwrap_or(0);
        let mut current = *offset.get_or_insert(size);
        if size < current {
            info!(size, offset = current, "remote log rotated, reading from start");
            current = 0;
            assembler.reset();
        }
        if size == current {
            *offset = Some(current);
            return Ok(Vec::new());
        }

        let mut remote = link.sftp.open(cfg.path.clone()).await.map_err(map_sftp)?;
        remote
            .seek(SeekFrom::Start(current))
            .await
            .map_err(transport)?;
        let mut temp_file = tokio::fs::File::create(temp).await.map_err(transport)?;
        let mut remaining = (size - current) as usize;
        let mut buf = vec![0u8; FETCH_CHUNK];
        let mut copied = 0u64;
        while remaining > 0 {
            let want = remaining.min(FETCH_CHUNK);
            let n = remote.read(&mut buf[..want]).await.map_err(transport)?;
            if n == 0 {
                break;
            }
            temp_file.write_all(&buf[..n]).await.map_err(transport)?;
            copied += n as u64;
            remaining -= n;
        }
        temp_file.flush().await.map_err(transport)?;
        drop(temp_file);

        *offset = Some(current + copied);
        let bytes = tokio::fs::read(temp).await.map_err(transport)?;
        Ok(assembler.push(&bytes))
    }
}

#[async_trait]
impl LogSource for SftpSource {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<String>,
        mut shutdown: watch::Receiver<bool>,
        status: StatusCell,
    ) -> Result<(), SourceError> {
        let cfg = self.cfg;
        let temp = temp_buffer_path(&cfg.host, cfg.port, &cfg.path);
        let mut backoff = Backoff::new();
        let mut assembler = LineAssembler::new();
        let mut offset: Option<u64> = if cfg.read_from_start { Some(0) } else { None };
        let mut link: Option<SftpLink> = None;
        info!(host = %cfg.host, port = cfg.port, path = %cfg.path, "tailing sftp log");

        let result = loop {
            if shutting_down(&shutdown) {
                break Ok(());
            }
            if link.is_none() {
                match connect(&cfg).await {
                    Ok(l) => {
                        info!(host = %cfg.host, "sftp session established");
                        link = Some(l);
                    }
                    Err(e @ SourceError::AuthFailed(_)) => {
                        status.set(WatcherStatus::AuthFailed);
                        status.record_error(e.to_string());
                        break Err(e);
                    }
                    Err(e) => {
                        status.set(WatcherStatus::Degraded);
                        status.record_error(e.to_string());
                        warn!(error = %e, "sftp connect failed");
                        if !idle(&mut shutdown, backoff.next()).await {
                            break Ok(());
                        }
                        continue;
                    }
                }
            }
            let Some(active) = link.as_ref() else {
                continue;
            };
            match Self::poll_once(active, &cfg, &mut offset, &mut assembler, &temp).await {
                Ok(lines) => {
                    backoff.reset();
                    status.set(WatcherStatus::Running);
                    match deliver_lines(&tx, &mut shutdown, lines).await {
                        Ok(()) => {}
                        Err(DeliveryHalt::Shutdown | DeliveryHalt::Closed) => break Ok(()),
                    }
                }
                Err(e) => {
                    status.set(WatcherStatus::Degraded);
                    status.record_error(e.to_string());
                    warn!(error = %e, "sftp poll failed, reconnecting");
                    if let Some(l) = link.take() {
                        l.close().await;
                    }
                    if !idle(&mut shutdown, backoff.next()).await {
                        break Ok(());
                    }
                    continue;
                }
            }
            if !idle(&mut shutdown, cfg.poll_interval).await {
                break Ok(());
            }
        };

        if let Some(l) = link.take() {
            l.close().await;
        }
        let _ = tokio::fs::remove_file(&temp).await;
        result
    }
}
