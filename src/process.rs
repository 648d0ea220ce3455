//! Child process launching and reaping.
//!
//! Commands are started with fork + execvp so that the parent never blocks
//! and a missing program is only visible through the child's exit status.
//!
//! # Safety
//!
//! This module uses unsafe code for fork, the pre-exec signal reset and
//! `_exit`. The child runs only async-signal-safe calls between fork and
//! exec; everything it needs is allocated before the fork.

#![allow(unsafe_code)]

use crate::protocol::{ArgVector, EXEC_FAILED_STATUS};
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::fd::AsFd;
use thiserror::Error;

/// Errors that can occur when launching a command.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("command is empty")]
    Invalid,

    #[error("invalid command string: {0}")]
    InvalidCommand(#[source] std::ffi::NulError),

    #[error("failed to fork: {0}")]
    Fork(#[source] nix::Error),
}

impl LaunchError {
    /// Whether the command was rejected before any process was created.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid | Self::InvalidCommand(_))
    }
}

/// Error waiting for a child.
#[derive(Debug, Error)]
#[error("failed to wait for pid {pid}: {source}")]
pub struct WaitError {
    pub pid: Pid,
    #[source]
    pub source: nix::Error,
}

/// How a child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Normal termination with an exit status.
    Exited(i32),
    /// Killed by a signal, or any other non-exit termination.
    Abnormal { signal: Option<Signal> },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit status: {code}"),
            Self::Abnormal { .. } => f.write_str("terminou de forma anormal"),
        }
    }
}

/// A running child that has not been reaped yet.
#[derive(Debug)]
pub struct Child {
    pid: Pid,
}

impl Child {
    /// The child's process ID.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the child terminates.
    ///
    /// Consumes the handle: a child is reaped exactly once.
    pub fn wait(self) -> Result<Outcome, WaitError> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(Outcome::Exited(code)),
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    return Ok(Outcome::Abnormal { signal: Some(sig) });
                }
                Ok(status) => {
                    tracing::warn!(?status, "unexpected wait status");
                    return Ok(Outcome::Abnormal { signal: None });
                }
                Err(Errno::EINTR) => {}
                Err(source) => {
                    return Err(WaitError {
                        pid: self.pid,
                        source,
                    });
                }
            }
        }
    }
}

/// Tokenize `command` and start it without waiting.
///
/// Returns [`LaunchError::Invalid`] for a command with no tokens; nothing is
/// spawned in that case.
pub fn launch(command: &str) -> Result<Child, LaunchError> {
    let argv = ArgVector::parse(command).ok_or(LaunchError::Invalid)?;
    spawn(&argv)
}

/// Start the program named by `argv` in a new child process.
///
/// If the program cannot be executed the child exits with
/// [`EXEC_FAILED_STATUS`]; this is not reported here.
pub fn spawn(argv: &ArgVector) -> Result<Child, LaunchError> {
    let prog = CString::new(argv.program()).map_err(LaunchError::InvalidCommand)?;
    let args: Vec<CString> = argv
        .as_slice()
        .iter()
        .map(|s| CString::new(s.as_str()))
        .collect::<Result<_, _>>()
        .map_err(LaunchError::InvalidCommand)?;
    // Null-terminated pointer array; `args` outlives the fork in both processes.
    let arg_ptrs: Vec<*const libc::c_char> = args
        .iter()
        .map(|arg| arg.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();
    let failure = format!("fifoexec: failed to exec '{}': ", argv.program());

    match unsafe { fork() }.map_err(LaunchError::Fork)? {
        ForkResult::Parent { child } => Ok(Child { pid: child }),
        ForkResult::Child => exec_child(&prog, &arg_ptrs, failure.as_bytes()),
    }
}

/// Runs in the forked child. Never returns.
///
/// Must not allocate: the parent may have other threads holding the
/// allocator lock at the time of the fork.
fn exec_child(prog: &CStr, arg_ptrs: &[*const libc::c_char], failure: &[u8]) -> ! {
    // Rust ignores SIGPIPE at startup and exec keeps ignored dispositions.
    // SAFETY: sigaction is async-signal-safe and no handler is installed.
    let _ = unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) };

    // SAFETY: `prog` and every non-null entry of `arg_ptrs` point to live
    // NUL-terminated strings, and the array ends with a null pointer.
    unsafe { libc::execvp(prog.as_ptr(), arg_ptrs.as_ptr()) };
    let errno = Errno::last();

    let stderr = std::io::stderr();
    let _ = nix::unistd::write(stderr.as_fd(), failure);
    let _ = nix::unistd::write(stderr.as_fd(), errno.desc().as_bytes());
    let _ = nix::unistd::write(stderr.as_fd(), b"\n");

    // SAFETY: _exit skips atexit handlers and stdio flushing inherited from
    // the parent, which must not run twice.
    unsafe { libc::_exit(EXEC_FAILED_STATUS) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_true() {
        let child = launch("true").unwrap();
        assert!(child.pid().as_raw() > 0);
        assert_eq!(child.wait().unwrap(), Outcome::Exited(0));
    }

    #[test]
    fn test_launch_exit_code() {
        let child = launch("false").unwrap();
        assert_eq!(child.wait().unwrap(), Outcome::Exited(1));
    }

    #[test]
    fn test_launch_passes_arguments() {
        let child = launch("test 3 -gt 2").unwrap();
        assert_eq!(child.wait().unwrap(), Outcome::Exited(0));

        let child = launch("test 1 -gt 2").unwrap();
        assert_eq!(child.wait().unwrap(), Outcome::Exited(1));
    }

    #[test]
    fn test_launch_passes_every_argument() {
        // sh, -c, script and $0 leave MAX_ARGS - 4 positional parameters.
        let positional = vec!["x"; crate::protocol::MAX_ARGS - 4].join(" ");
        let expected = crate::protocol::MAX_ARGS - 4;
        let command = format!("sh -c test${{IFS}}$#${{IFS}}-eq${{IFS}}{expected} sh {positional}");
        assert_eq!(ArgVector::parse(&command).unwrap().dropped(), 0);

        let child = launch(&command).unwrap();
        assert_eq!(child.wait().unwrap(), Outcome::Exited(0));
    }

    #[test]
    fn test_launch_missing_program_surfaces_on_wait() {
        let child = launch("definitely-not-a-real-program-fifoexec").unwrap();
        assert_eq!(child.wait().unwrap(), Outcome::Exited(EXEC_FAILED_STATUS));
    }

    #[test]
    fn test_launch_empty_command() {
        assert!(matches!(launch(""), Err(LaunchError::Invalid)));
        assert!(matches!(launch("   "), Err(LaunchError::Invalid)));
    }

    #[test]
    fn test_launch_nul_byte() {
        let err = launch("ec\0ho hi").unwrap_err();
        assert!(matches!(err, LaunchError::InvalidCommand(_)));
        assert!(err.is_invalid());
    }

    #[test]
    fn test_signaled_child_is_abnormal() {
        let child = launch("sleep 10").unwrap();
        signal::kill(child.pid(), Signal::SIGKILL).unwrap();
        assert_eq!(
            child.wait().unwrap(),
            Outcome::Abnormal {
                signal: Some(Signal::SIGKILL)
            }
        );
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Exited(3).to_string(), "exit status: 3");
        assert_eq!(
            Outcome::Abnormal { signal: None }.to_string(),
            "terminou de forma anormal"
        );
    }
}
