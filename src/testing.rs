//! Test harness for end-to-end server scenarios.
//!
//! Runs a [`Server`] on a private FIFO and log inside the test process:
//!
//! ```ignore
//! let harness = TestHarness::new()?;
//! harness.send(&["echo hi", "false"])?;
//!
//! let lines = harness.wait_for_entries(2, Duration::from_secs(5))?;
//! assert_eq!(lines[1], "false; exit status: 1");
//! ```
//!
//! Unless [`TestHarness::wait_for_exit`] collects it, the server thread
//! stays blocked on the removed FIFO after the harness is dropped and goes
//! away with the test process.

use crate::{Client, ClientError, Server, ServerError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// How often log and FIFO state are polled.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Errors from the test framework.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("timeout waiting for {expected} log entries (found {found})")]
    Timeout { expected: usize, found: usize },

    #[error("server did not create its fifo in time")]
    ServerStart,

    #[error("server is still running")]
    StillRunning,

    #[error("server thread panicked")]
    ServerPanicked,

    #[error("send failed: {0}")]
    Send(#[source] ClientError),

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

/// Server on a private FIFO/log pair, plus a client for it.
#[derive(Debug)]
pub struct TestHarness {
    dir: PathBuf,
    fifo_path: PathBuf,
    log_path: PathBuf,
    client: Client,
    server_handle: Option<JoinHandle<Result<(), ServerError>>>,
}

impl TestHarness {
    /// Start a server under a fresh directory and wait for its FIFO.
    pub fn new() -> Result<Self, TestError> {
        Self::with_log_path(|dir| dir.join("logs").join("server.log"))
    }

    /// Like [`TestHarness::new`], but the log path is chosen by `log_path`,
    /// which receives the fresh directory and may prepare it.
    pub fn with_log_path(log_path: impl FnOnce(&Path) -> PathBuf) -> Result<Self, TestError> {
        let dir = Self::unique_dir();
        std::fs::create_dir_all(&dir).map_err(TestError::Io)?;

        let fifo_path = dir.join("exec.fifo");
        let log_path = log_path(&dir);

        let server = Server::new(fifo_path.clone(), log_path.clone());
        let server_handle = std::thread::spawn(move || server.run());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !fifo_path.exists() {
            if Instant::now() > deadline {
                return Err(TestError::ServerStart);
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        Ok(Self {
            client: Client::new(fifo_path.clone()),
            dir,
            fifo_path,
            log_path,
            server_handle: Some(server_handle),
        })
    }

    fn unique_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/fifoexec-test-{pid}-{id}"))
    }

    /// Private directory holding the FIFO and the log.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn fifo_path(&self) -> &Path {
        &self.fifo_path
    }

    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Send commands through the regular client.
    pub fn send(&self, commands: &[&str]) -> Result<(), TestError> {
        self.client.send(commands).map_err(TestError::Send)
    }

    /// Write raw bytes as one writer session, bypassing message encoding.
    pub fn send_raw(&self, bytes: &[u8]) -> Result<(), TestError> {
        let mut fifo = std::fs::OpenOptions::new()
            .write(true)
            .open(&self.fifo_path)
            .map_err(TestError::Io)?;
        fifo.write_all(bytes).map_err(TestError::Io)
    }

    /// Current log lines, without trailing newlines.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log_path)
            .map(|contents| contents.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Poll the log until it holds at least `expected` lines.
    pub fn wait_for_entries(
        &self,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<String>, TestError> {
        let deadline = Instant::now() + timeout;
        loop {
            let entries = self.entries();
            if entries.len() >= expected {
                return Ok(entries);
            }
            if Instant::now() > deadline {
                return Err(TestError::Timeout {
                    expected,
                    found: entries.len(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Wait for the server loop to end and return what `run` returned.
    pub fn wait_for_exit(
        &mut self,
        timeout: Duration,
    ) -> Result<Result<(), ServerError>, TestError> {
        let deadline = Instant::now() + timeout;
        while self
            .server_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            if Instant::now() > deadline {
                return Err(TestError::StillRunning);
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let handle = self.server_handle.take().ok_or(TestError::StillRunning)?;
        handle.join().map_err(|_| TestError::ServerPanicked)
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        // Best effort cleanup
        std::fs::remove_dir_all(&self.dir).ok();
    }
}
