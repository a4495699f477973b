//! Byte-stream transports with an expect primitive.
//!
//! [`SshTransport`] runs the system ssh client on a pseudo-terminal so that
//! password prompts and interactive shells behave as they do for an
//! operator. A blocking reader thread forwards output chunks over a
//! channel; waits are bounded by `tokio::time::timeout_at`.

use crate::error::{OltError, OltResult};
use crate::expect::{describe, ExpectBuffer, Match, Pattern};
use async_trait::async_trait;
use nix::pty::openpty;
use std::io::{self, Read};
use std::os::unix::process::CommandExt as _;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Path to the ssh client.
pub const SSH_CMD: &str = "/usr/bin/ssh";

/// Unknown host keys are confirmed interactively by the login handshake.
const HOST_KEY_OPTION: &str = "StrictHostKeyChecking=ask";

const READ_CHUNK: usize = 4096;
const CHANNEL_DEPTH: usize = 64;
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// A bidirectional line-oriented stream to a device.
#[async_trait]
pub trait Transport: Send {
    /// Writes `line` followed by a newline.
    async fn send_line(&mut self, line: &str) -> OltResult<()>;

    /// Waits until one of `patterns` matches the accumulated output.
    async fn expect(&mut self, patterns: &[Pattern], timeout: Duration) -> OltResult<Match>;

    /// Tears the stream down. Safe to call more than once.
    async fn close(&mut self);

    /// Returns false once the stream has been closed or hit end of file.
    fn is_open(&self) -> bool;
}

/// An ssh client process attached to a pseudo-terminal.
pub struct SshTransport {
    label: String,
    child: Option<Child>,
    writer: Option<tokio::fs::File>,
    output: mpsc::Receiver<String>,
    buffer: ExpectBuffer,
    eof: bool,
}

impl SshTransport {
    /// Starts `ssh -p port user@host` on a fresh pseudo-terminal.
    pub fn spawn(host: &str, port: u16, user: &str) -> OltResult<Self> {
        let target = format!("{}@{}", user, host);
        let command_line = format!("{} -p {} -o {} {}", SSH_CMD, port, HOST_KEY_OPTION, target);
        let spawn_err = |source: io::Error| OltError::Spawn {
            command: command_line.clone(),
            source,
        };

        let pty = openpty(None, None).map_err(|e| spawn_err(io::Error::from(e)))?;
        let stdin = pty.slave.try_clone().map_err(spawn_err)?;
        let stdout = pty.slave.try_clone().map_err(spawn_err)?;

        let mut command = Command::new(SSH_CMD);
        command
            .arg("-p")
            .arg(port.to_string())
            .arg("-o")
            .arg(HOST_KEY_OPTION)
            .arg(&target)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(pty.slave))
            .kill_on_drop(true);

        // The child needs its own session with the pty as controlling
        // terminal, otherwise ssh reads the password from /dev/tty of the
        // parent.
        unsafe {
            command.as_std_mut().pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(spawn_err)?;
        // Drop the parent's copies of the slave side so the reader sees EOF
        // when the child exits.
        drop(command);

        let master = std::fs::File::from(pty.master);
        let reader = master.try_clone().map_err(spawn_err)?;
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        tokio::task::spawn_blocking(move || pump(reader, tx));

        debug!(command = %command_line, "Spawned ssh client");

        Ok(Self {
            label: target,
            child: Some(child),
            writer: Some(tokio::fs::File::from_std(master)),
            output: rx,
            buffer: ExpectBuffer::new(),
            eof: false,
        })
    }
}

/// Forwards pty output until the child goes away or the receiver is dropped.
fn pump(mut reader: std::fs::File, tx: mpsc::Sender<String>) {
    let mut buf = [0u8; READ_CHUNK];
    let mut pending = Vec::new();
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let chunk = decode_chunk(&mut pending, &buf[..n]);
                if !chunk.is_empty() && tx.blocking_send(chunk).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // EIO once the slave side is closed
            Err(_) => break,
        }
    }
    if !pending.is_empty() {
        let _ = tx.blocking_send(String::from_utf8_lossy(&pending).into_owned());
    }
}

/// Appends `bytes` to `pending` and decodes as much as possible. A
/// multibyte character cut off at the end of a read stays in `pending`
/// until the next read completes it; invalid bytes become U+FFFD.
fn decode_chunk(pending: &mut Vec<u8>, bytes: &[u8]) -> String {
    pending.extend_from_slice(bytes);
    let mut text = String::new();
    let mut rest: &[u8] = &pending[..];
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                rest = &[];
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }
    let consumed = pending.len() - rest.len();
    pending.drain(..consumed);
    text
}

#[async_trait]
impl Transport for SshTransport {
    async fn send_line(&mut self, line: &str) -> OltResult<()> {
        let writer = self.writer.as_mut().ok_or_else(|| OltError::EndOfStream {
            waiting_for: "writable session".to_string(),
        })?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn expect(&mut self, patterns: &[Pattern], timeout: Duration) -> OltResult<Match> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(m) = self.buffer.try_match(patterns) {
                trace!(target_label = %self.label, pattern = m.index, "Pattern matched");
                return Ok(m);
            }
            if self.eof {
                return Err(OltError::EndOfStream {
                    waiting_for: describe(patterns),
                });
            }
            match tokio::time::timeout_at(deadline, self.output.recv()).await {
                Ok(Some(chunk)) => self.buffer.push(&chunk),
                Ok(None) => self.eof = true,
                Err(_) => return Err(OltError::timeout(describe(patterns), timeout)),
            }
        }
    }

    async fn close(&mut self) {
        self.writer = None;
        self.output.close();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!(target_label = %self.label, error = %e, "ssh client already gone");
            }
            if tokio::time::timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
                warn!(target_label = %self.label, "ssh client did not exit in time");
            }
        }
        self.eof = true;
    }

    fn is_open(&self) -> bool {
        self.child.is_some() && !self.eof
    }
}
