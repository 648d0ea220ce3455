//! Client for sending commands to the fifoexec server.
//!
//! A send is fire-and-forget: success means the Message was written to the
//! channel, not that any command ran.

use crate::protocol::{DEFAULT_FIFO_PATH, DELIMITER, EncodeError, encode};
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl, open};
use nix::sys::stat::Mode;
use std::os::fd::{AsFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Connection attempts while no reader is attached.
const CONNECT_ATTEMPTS: u32 = 50;

/// Pause between connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid message: {0}")]
    Encode(#[source] EncodeError),

    #[error("no channel at {path} (has the server been started?)")]
    NoChannel { path: PathBuf },

    #[error("server not running: nothing is reading {path}")]
    ServerNotRunning { path: PathBuf },

    #[error("failed to connect to server: {0}")]
    Connect(#[source] nix::Error),

    #[error("failed to send message: {0}")]
    Send(#[source] nix::Error),

    #[error("message truncated: sent {written} of {len} bytes")]
    ShortWrite { written: usize, len: usize },
}

/// Client for the fifoexec server.
#[derive(Debug, Clone)]
pub struct Client {
    fifo_path: PathBuf,
}

impl Client {
    /// Create a client that writes to the given channel.
    #[must_use]
    pub const fn new(fifo_path: PathBuf) -> Self {
        Self { fifo_path }
    }

    /// Create a client for the well-known channel.
    #[must_use]
    pub fn with_default_path() -> Self {
        Self::new(PathBuf::from(DEFAULT_FIFO_PATH))
    }

    /// Get the channel path.
    #[must_use]
    pub fn fifo_path(&self) -> &Path {
        &self.fifo_path
    }

    /// Send `commands` as a single Message.
    pub fn send<S: AsRef<str>>(&self, commands: &[S]) -> Result<(), ClientError> {
        let message = encode(commands).map_err(ClientError::Encode)?;
        for command in commands {
            if command.as_ref().contains(DELIMITER) {
                warn!(command = command.as_ref(), "command contains '{DELIMITER}' and will be split");
            }
        }

        let fd = self.connect()?;
        let written = loop {
            match nix::unistd::write(fd.as_fd(), message.as_bytes()) {
                Ok(n) => break n,
                Err(Errno::EINTR) => {}
                Err(e) => return Err(ClientError::Send(e)),
            }
        };

        if written != message.len() {
            return Err(ClientError::ShortWrite {
                written,
                len: message.len(),
            });
        }
        debug!(bytes = written, "Message sent");
        Ok(())
    }

    /// Whether a server currently holds the read end.
    ///
    /// Connecting counts as a writer session, so the server sees an empty
    /// session and reconnects.
    #[must_use]
    pub fn is_server_attached(&self) -> bool {
        self.try_open().is_ok()
    }

    /// Open the write end, waiting for a reader if the server is between
    /// writers.
    pub fn connect(&self) -> Result<OwnedFd, ClientError> {
        for i in 0..CONNECT_ATTEMPTS {
            match self.try_open() {
                Ok(fd) => {
                    if i > 0 {
                        info!("Connected to server after {} attempts", i + 1);
                    }
                    set_blocking(&fd).map_err(ClientError::Connect)?;
                    return Ok(fd);
                }
                Err(Errno::ENOENT) => {
                    return Err(ClientError::NoChannel {
                        path: self.fifo_path.clone(),
                    });
                }
                Err(Errno::ENXIO) => {
                    if i % 10 == 9 {
                        debug!("Still waiting for server (attempt {})", i + 1);
                    }
                    std::thread::sleep(CONNECT_RETRY_DELAY);
                }
                Err(Errno::EINTR) => {}
                Err(e) => return Err(ClientError::Connect(e)),
            }
        }

        Err(ClientError::ServerNotRunning {
            path: self.fifo_path.clone(),
        })
    }

    /// Non-blocking open: fails with `ENXIO` instead of waiting when no
    /// reader is attached.
    fn try_open(&self) -> nix::Result<OwnedFd> {
        open(
            self.fifo_path.as_path(),
            OFlag::O_WRONLY | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
    }
}

fn set_blocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_retain(flags);
    flags.remove(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_channel() {
        let client = Client::new(PathBuf::from("/tmp/fifoexec-client-missing.fifo"));
        let err = client.send(&["pwd"]).unwrap_err();
        assert!(matches!(err, ClientError::NoChannel { .. }));
    }

    #[test]
    fn test_send_rejects_empty() {
        let client = Client::with_default_path();
        let commands: [&str; 0] = [];
        let err = client.send(&commands).unwrap_err();
        assert!(matches!(err, ClientError::Encode(EncodeError::Empty)));
    }

    #[test]
    fn test_no_reader_is_not_attached() {
        let path = PathBuf::from(format!("/tmp/fifoexec-client-{}.fifo", std::process::id()));
        std::fs::remove_file(&path).ok();
        nix::unistd::mkfifo(path.as_path(), Mode::from_bits_truncate(0o600)).unwrap();

        let client = Client::new(path.clone());
        assert!(!client.is_server_attached());

        std::fs::remove_file(&path).ok();
    }
}
