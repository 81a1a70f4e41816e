//! FTP polling tail.
//!
//! Same polling skeleton as the SFTP variant: stat with `SIZE`, resume the
//! read with `REST <offset>` + `RETR`, stream the window through the temp
//! buffer, emit completed lines.  The protocol needs are small enough
//! (USER/PASS/TYPE I/PASV/SIZE/REST/RETR) that the client speaks them
//! directly over a control connection.
//!
//! Failure policy differs from SFTP: a fixed retry count with a fixed
//! short delay, except that an error whose text points at the transport
//! (reset, broken pipe, closed) drops the connection and reconnects
//! immediately.

use super::{
    CONNECT_TIMEOUT, DeliveryHalt, LineAssembler, LogSource, SourceError, deliver_lines, idle,
    shutting_down, temp_buffer_path,
};
use crate::status::{StatusCell, WatcherStatus};
use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

const RETRY_LIMIT: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const FETCH_CHUNK: usize = 32 * 1024;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub path: String,
    pub poll_interval: Duration,
    pub read_from_start: bool,
}

// Credentials stay out of logs; Debug prints the endpoint only.
impl fmt::Debug for FtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Control-channel client
// ---------------------------------------------------------------------------

struct Reply {
    code: u16,
    text: String,
}

fn transport(e: impl fmt::Display) -> SourceError {
    SourceError::Transport(e.to_string())
}

struct FtpClient {
    control: BufStream<TcpStream>,
}

impl FtpClient {
    async fn connect(host: &str, port: u16) -> Result<Self, SourceError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| SourceError::Transport("connect timed out".to_owned()))?
            .map_err(transport)?;
        let mut client = FtpClient {
            control: BufStream::new(stream),
        };
        let greeting = client.read_reply().await?;
        if greeting.code != 220 {
            return Err(SourceError::Transport(format!(
                "unexpected greeting: {} {}",
                greeting.code, greeting.text
            )));
        }
        Ok(client)
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<(), SourceError> {
        let reply = self.command(&format!("USER {username}")).await?;
        match reply.code {
            230 => {}
            331 => {
                let reply = self.command(&format!("PASS {password}")).await?;
                if reply.code != 230 {
                    return Err(SourceError::AuthFailed(format!(
                        "login rejected for {username}: {}",
                        reply.code
                    )));
                }
            }
            530 => {
                return Err(SourceError::AuthFailed(format!(
                    "login rejected for {username}"
                )));
            }
            code => {
                return Err(SourceError::Transport(format!(
                    "unexpected USER reply: {code}"
                )));
            }
        }
        let reply = self.command("TYPE I").await?;
        if reply.code != 200 {
            return Err(SourceError::Transport(format!(
                "TYPE I rejected: {}",
                reply.code
            )));
        }
        Ok(())
    }

    async fn size(&mut self, path: &str) -> Result<u64, SourceError> {
        let reply = self.command(&format!("SIZE {path}")).await?;
        match reply.code {
            213 => reply
                .text
                .trim()
                .parse()
                .map_err(|_| SourceError::Transport(format!("bad SIZE reply: {}", reply.text))),
            550 => Err(SourceError::NotFound(format!("{path}: {}", reply.text))),
            code => Err(SourceError::Transport(format!(
                "unexpected SIZE reply: {code}"
            ))),
        }
    }

    /// `REST offset` + `RETR path`, streaming the data connection into
    /// `temp`.  Returns the number of bytes copied.
    async fn retr_from(&mut self, path: &str, offset: u64, temp: &Path) -> Result<u64, SourceError> {
        let data_addr = self.pasv().await?;
        let data = timeout(CONNECT_TIMEOUT, TcpStream::connect(data_addr))
            .await
            .map_err(|_| SourceError::Transport("data connect timed out".to_owned()))?
            .map_err(transport)?;

        if offset > 0 {
            let reply = self.command(&format!("REST {offset}")).await?;
            if reply.code != 350 {
                return Err(SourceError::Transport(format!(
                    "REST rejected: {}",
                    reply.code
                )));
            }
        }
        let reply = self.command(&format!("RETR {path}")).await?;
        match reply.code {
            125 | 150 => {}
            550 => return Err(SourceError::NotFound(format!("{path}: {}", reply.text))),
            code => {
                return Err(SourceError::Transport(format!(
                    "RETR rejected: {code}"
                )));
            }
        }

        let mut data = data;
        let mut temp_file = tokio::fs::File::create(temp).await.map_err(transport)?;
        let mut buf = vec![0u8; FETCH_CHUNK];
        let mut copied = 0u64;
        loop {
            let n = data.read(&mut buf).await.map_err(transport)?;
            if n == 0 {
                break;
            }
            temp_file.write_all(&buf[..n]).await.map_err(transport)?;
            copied += n as u64;
        }
        temp_file.flush().await.map_err(transport)?;
        drop(data);

        let done = self.read_reply().await?;
        if done.code != 226 {
            debug!(code = done.code, "transfer completion reply");
        }
        Ok(copied)
    }

    async fn pasv(&mut self) -> Result<SocketAddr, SourceError> {
        let reply = self.command("PASV").await?;
        if reply.code != 227 {
            return Err(SourceError::Transport(format!(
                "PASV rejected: {}",
                reply.code
            )));
        }
        parse_pasv(&reply.text)
            .ok_or_else(|| SourceError::Transport(format!("bad PASV reply: {}", reply.text)))
    }

    async fn quit(mut self) {
        let _ = self.control.write_all(b"QUIT\r\n").await;
        let _ = self.control.flush().await;
    }

    async fn command(&mut self, cmd: &str) -> Result<Reply, SourceError> {
        self.control
            .write_all(format!("{cmd}\r\n").as_bytes())
            .await
            .map_err(transport)?;
        self.control.flush().await.map_err(transport)?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply, SourceError> {
        let first = self.read_control_line().await?;
        if first.len() < 4 {
            return Err(SourceError::Transport(format!("short reply: {first:?}")));
        }
        let code: u16 = first[..3]
            .parse()
            .map_err(|_| SourceError::Transport(format!("bad reply code: {first:?}")))?;
        let mut text = first[4..].to_owned();
        if first.as_bytes()[3] == b'-' {
            // Multiline reply: read until the "NNN " terminator line.
            let terminator = format!("{code} ");
            loop {
                let line = self.read_control_line().await?;
                let done = line.starts_with(&terminator);
                text.push('\n');
                text.push_str(line.trim_start_matches(&terminator));
                if done {
                    break;
                }
            }
        }
        Ok(Reply { code, text })
    }

    async fn read_control_line(&mut self) -> Result<String, SourceError> {
        let mut line = String::new();
        let n = self
            .control
            .read_line(&mut line)
            .await
            .map_err(transport)?;
        if n == 0 {
            return Err(SourceError::Transport("control connection closed".to_owned()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }
}

/// Extract the data endpoint from a 227 reply such as
/// `Entering Passive Mode (192,168,1,10,19,136).`
fn parse_pasv(text: &str) -> Option<SocketAddr> {
    let numbers: Vec<u16> = text
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if numbers.len() < 6 {
        return None;
    }
    let six = &numbers[numbers.len() - 6..];
    if six[..4].iter().any(|&n| n > 255) || six[4] > 255 || six[5] > 255 {
        return None;
    }
    let ip = Ipv4Addr::new(six[0] as u8, six[1] as u8, six[2] as u8, six[3] as u8);
    let port = six[4] * 256 + six[5];
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Does the error text point at a broken transport (reconnect immediately)?
fn is_transport_text(error: &SourceError) -> bool {
    let text = error.to_string().to_lowercase();
    ["connection", "broken pipe", "reset", "timed out", "closed"]
        .iter()
        .any(|needle| text.contains(needle))
}

// ---------------------------------------------------------------------------
// FtpSource
// ---------------------------------------------------------------------------

/// Tail of a log file reachable over FTP.
#[derive(Debug)]
pub struct FtpSource {
    cfg: FtpConfig,
}

impl FtpSource {
    pub fn new(cfg: FtpConfig) -> Self {
        FtpSource { cfg }
    }

    async fn poll_once(
        client: &mut FtpClient,
        cfg: &FtpConfig,
        offset: &mut Option<u64>,
        assembler: &mut LineAssembler,
        temp: &Path,
    ) -> Result<Vec<String>, SourceError> {
        let size = client.size(&cfg.path).await?;
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
        let copied = client.retr_from(&cfg.path, current, temp).await?;
        *offset = Some(current + copied);
        let bytes = tokio::fs::read(temp).await.map_err(transport)?;
        Ok(assembler.push(&bytes))
    }
}

#[async_trait]
impl LogSource for FtpSource {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<String>,
        mut shutdown: watch::Receiver<bool>,
        status: StatusCell,
    ) -> Result<(), SourceError> {
        let cfg = self.cfg;
        let temp = temp_buffer_path(&cfg.host, cfg.port, &cfg.path);
        let mut assembler = LineAssembler::new();
        let mut offset: Option<u64> = if cfg.read_from_start { Some(0) } else { None };
        let mut client: Option<FtpClient> = None;
        let mut retries = 0u32;
        info!(host = %cfg.host, port = cfg.port, path = %cfg.path, "tailing ftp log");

        let result = loop {
            if shutting_down(&shutdown) {
                break Ok(());
            }
            if client.is_none() {
                let attempt = async {
                    let mut c = FtpClient::connect(&cfg.host, cfg.port).await?;
                    c.login(&cfg.username, &cfg.password).await?;
                    Ok::<FtpClient, SourceError>(c)
                };
                match attempt.await {
                    Ok(c) => {
                        info!(host = %cfg.host, "ftp session established");
                        client = Some(c);
                        retries = 0;
                    }
                    Err(e @ SourceError::AuthFailed(_)) => {
                        status.set(WatcherStatus::AuthFailed);
                        status.record_error(e.to_string());
                        break Err(e);
                    }
                    Err(e) => {
                        status.set(WatcherStatus::Degraded);
                        status.record_error(e.to_string());
                        warn!(error = %e, "ftp connect failed");
                        if !idle(&mut shutdown, RETRY_DELAY).await {
                            break Ok(());
                        }
                        continue;
                    }
                }
            }
            let Some(active) = client.as_mut() else {
                continue;
            };
            match Self::poll_once(active, &cfg, &mut offset, &mut assembler, &temp).await {
                Ok(lines) => {
                    retries = 0;
                    status.set(WatcherStatus::Running);
                    match deliver_lines(&tx, &mut shutdown, lines).await {
                        Ok(()) => {}
                        Err(DeliveryHalt::Shutdown | DeliveryHalt::Closed) => break Ok(()),
                    }
                }
                Err(e) => {
                    status.set(WatcherStatus::Degraded);
                    status.record_error(e.to_string());
                    warn!(error = %e, "ftp poll failed");
                    if is_transport_text(&e) {
                        client = None;
                        continue;
                    }
                    retries += 1;
                    if retries >= RETRY_LIMIT {
                        client = None;
                        retries = 0;
                    }
                    if !idle(&mut shutdown, RETRY_DELAY).await {
                        break Ok(());
                    }
                    continue;
                }
            }
            if !idle(&mut shutdown, cfg.poll_interval).await {
                break Ok(());
            }
        };

        if let Some(c) = client.take() {
            c.quit().await;
        }
        let _ = tokio::fs::remove_file(&temp).await;
        result
    }
}
