//! fifoexec — command execution over a named pipe
//!
//! A client packs one or more command lines into a single `;`-delimited
//! message and writes it to a FIFO. The server runs each command as its own
//! child process, waits for all of them and appends the outcomes to a log.

// Error documentation is deferred - the errors are self-explanatory from types
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod client;
pub mod process;
pub mod protocol;
pub mod server;
pub mod testing;

pub use cli::{Cli, Command};
pub use client::{Client, ClientError};
pub use process::{Child, LaunchError, Outcome, WaitError, launch};
pub use protocol::{ArgVector, EncodeError, encode, frame};
pub use server::{AppendLog, LogEntry, Server, ServerError};
pub use testing::{TestError, TestHarness};
