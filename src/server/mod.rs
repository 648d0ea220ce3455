//! The fifoexec server.
//!
//! Reads Messages from the channel, runs every command in a Message as its
//! own child process, waits for all of them and appends one log line per
//! command. One Message is handled at a time.
//!
//! A hung child blocks the whole server: there is no per-command timeout.

mod batch;
mod channel;
mod log;

pub use batch::{Collector, Launched, collect, dispatch};
pub use channel::{Channel, ChannelError, FIFO_MODE, Reader, Received};
pub use log::{AppendLog, LogEntry, LogError};

use crate::protocol::{self, MAX_MESSAGE};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to set up channel: {0}")]
    Setup(#[source] ChannelError),

    #[error("channel failed: {0}")]
    Channel(#[source] ChannelError),
}

/// Where the server loop is.
#[derive(Debug)]
enum State {
    /// Blocked opening the read end until a writer connects.
    AwaitingWriter,
    /// Draining the current writer.
    Reading(Reader),
    /// Running the Message held in the first `n` bytes of the buffer.
    Processing(Reader, usize),
    /// The writer closed its end; the read end is dropped and reopened.
    Reconnecting(Reader),
}

/// The fifoexec server.
#[derive(Debug)]
pub struct Server {
    fifo_path: PathBuf,
    log: AppendLog,
}

impl Server {
    /// Create a server reading `fifo_path` and logging to `log_path`.
    #[must_use]
    pub const fn new(fifo_path: PathBuf, log_path: PathBuf) -> Self {
        Self {
            fifo_path,
            log: AppendLog::new(log_path),
        }
    }

    /// Run until the channel fails.
    ///
    /// On a fatal error the read end is closed and the FIFO is removed before
    /// the error is returned. A missing log directory is not fatal; each
    /// append then reports its own failure.
    pub fn run(&self) -> Result<(), ServerError> {
        if let Some(parent) = self.log.path().parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!(path = %parent.display(), error = %e, "Failed to create log directory");
        }

        let channel = Channel::create(self.fifo_path.clone()).map_err(ServerError::Setup)?;
        info!("Waiting for commands on {:?}", channel.path());

        let mut buf = [0u8; MAX_MESSAGE];
        let mut state = State::AwaitingWriter;

        let err = loop {
            state = match state {
                State::AwaitingWriter => match channel.open_reader() {
                    Ok(reader) => {
                        debug!("Writer connected");
                        State::Reading(reader)
                    }
                    Err(e) => break e,
                },
                State::Reading(reader) => match reader.read(&mut buf) {
                    Ok(Received::Bytes(n)) => State::Processing(reader, n),
                    Ok(Received::Eof) => State::Reconnecting(reader),
                    Err(e) => break e,
                },
                State::Processing(reader, n) => {
                    self.process(&buf[..n]);
                    State::Reading(reader)
                }
                State::Reconnecting(reader) => {
                    debug!("Writer disconnected, reopening channel");
                    drop(reader);
                    State::AwaitingWriter
                }
            };
        };

        error!("Channel error: {}", err);
        channel.remove();
        info!("Server shut down");
        Err(ServerError::Channel(err))
    }

    /// Handle one Message: launch all, reap in order, log each.
    fn process(&self, bytes: &[u8]) {
        let message = protocol::decode(bytes);
        info!(message = %message.trim_end(), "Received message");

        let launched = dispatch(&message);
        let count = launched.len();
        info!(%count, "Executing command(s)");

        for entry in collect(launched) {
            info!("{entry}");
            if let Err(e) = self.log.append(&entry) {
                error!(error = %e, "Failed to record result");
            }
        }

        if count > 0 {
            info!(%count, "All command(s) finished");
        }
    }
}
