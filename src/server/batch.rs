//! Dispatch and reaping for one Message.
//!
//! All commands of a Message are launched before any is waited on, so they
//! run concurrently. Reaping then happens in submission order.

use super::log::LogEntry;
use crate::process::{self, Child};
use crate::protocol::{ArgVector, MAX_COMMANDS, frame};
use tracing::{debug, error, warn};

/// A child paired with the command that started it.
#[derive(Debug)]
pub struct Launched {
    pub command: String,
    pub child: Child,
}

/// Launch every command in `message`, in order.
///
/// Invalid commands are skipped silently. Fork failures are reported and
/// the command is left out. At most [`MAX_COMMANDS`] children are started.
pub fn dispatch(message: &str) -> Vec<Launched> {
    let mut launched = Vec::new();
    let mut frames = frame(message);

    while let Some(command) = frames.next() {
        if launched.len() == MAX_COMMANDS {
            let skipped = 1 + frames.by_ref().count();
            warn!(%skipped, max = MAX_COMMANDS, "too many commands in message, dropping the rest");
            break;
        }

        let Some(argv) = ArgVector::parse(command) else {
            continue;
        };
        if argv.dropped() > 0 {
            warn!(%command, dropped = argv.dropped(), "too many arguments, truncating");
        }

        match process::spawn(&argv) {
            Ok(child) => {
                debug!(pid = %child.pid(), %command, "launched");
                launched.push(Launched {
                    command: command.to_owned(),
                    child,
                });
            }
            Err(e) if e.is_invalid() => {
                debug!(%command, error = %e, "skipping invalid command");
            }
            Err(e) => {
                error!(%command, error = %e, "failed to launch command");
            }
        }
    }

    launched
}

/// Reap `launched` in submission order.
///
/// The returned iterator blocks on each child as it is advanced, so an entry
/// can be persisted before the next child is waited on.
#[must_use]
pub fn collect(launched: Vec<Launched>) -> Collector {
    Collector {
        pending: launched.into_iter(),
    }
}

/// Iterator of log entries, one per successfully reaped child.
#[derive(Debug)]
pub struct Collector {
    pending: std::vec::IntoIter<Launched>,
}

impl Iterator for Collector {
    type Item = LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Launched { command, child } = self.pending.next()?;
            match child.wait() {
                Ok(outcome) => return Some(LogEntry { command, outcome }),
                Err(e) => error!(%command, error = %e, "failed to reap command"),
            }
        }
    }
}
