//! Command-line interface for fifoexec.

use crate::protocol::{DEFAULT_FIFO_PATH, DEFAULT_LOG_PATH};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Run commands on a local server over a named pipe.
#[derive(Debug, Parser)]
#[command(name = "fifoexec", version, about)]
pub struct Cli {
    /// Path to the named pipe.
    #[arg(long, default_value = DEFAULT_FIFO_PATH)]
    pub fifo: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server.
    Server {
        /// File that receives one line per executed command.
        #[arg(long, default_value = DEFAULT_LOG_PATH)]
        log_file: PathBuf,
    },

    /// Send commands to the server in one message.
    ///
    /// Each argument is one command line, e.g. `send "ls -la" pwd date`.
    /// Arguments are split on whitespace by the server; quoting is not
    /// supported.
    Send {
        /// Commands to run.
        #[arg(required = true, value_name = "COMMAND")]
        commands: Vec<String>,
    },

    /// Check system health and configuration.
    Doctor {
        /// Log file the server writes to.
        #[arg(long, default_value = DEFAULT_LOG_PATH)]
        log_file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_requires_commands() {
        assert!(Cli::try_parse_from(["fifoexec", "send"]).is_err());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["fifoexec", "server"]).unwrap();
        assert_eq!(cli.fifo, PathBuf::from(DEFAULT_FIFO_PATH));
        assert!(!cli.verbose);
        match cli.command {
            Command::Server { log_file } => assert_eq!(log_file, PathBuf::from(DEFAULT_LOG_PATH)),
            other => panic!("expected Server, got {other:?}"),
        }
    }

    #[test]
    fn test_send_keeps_each_argument_whole() {
        let cli = Cli::try_parse_from(["fifoexec", "--fifo", "/tmp/x", "send", "ls -la", "pwd"]).unwrap();
        assert_eq!(cli.fifo, PathBuf::from("/tmp/x"));
        match cli.command {
            Command::Send { commands } => assert_eq!(commands, ["ls -la", "pwd"]),
            other => panic!("expected Send, got {other:?}"),
        }
    }
}
