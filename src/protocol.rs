//! Wire protocol shared by the fifoexec client and server.
//!
//! A Message is one write on the channel: command lines joined by `;`.
//! There is no length prefix and no escaping. A command cannot contain a
//! literal `;`, and an argument cannot contain whitespace, since the
//! tokenizer splits on whitespace runs only.

use std::borrow::Cow;
use thiserror::Error;

/// Well-known path of the channel.
pub const DEFAULT_FIFO_PATH: &str = "/tmp/exec_fifo";

/// Append log location, relative to the server's working directory.
pub const DEFAULT_LOG_PATH: &str = "logs/server.log";

/// Largest Message in bytes. Matches Linux `PIPE_BUF`, so a client write of
/// this size is never interleaved with another writer's bytes.
pub const MAX_MESSAGE: usize = 4096;

/// Most commands launched for a single Message.
pub const MAX_COMMANDS: usize = 32;

/// Most tokens (program name included) kept for a single command.
pub const MAX_ARGS: usize = 31;

/// Command separator inside a Message.
pub const DELIMITER: char = ';';

/// Exit status of a child whose exec failed.
pub const EXEC_FAILED_STATUS: i32 = 127;

/// Errors building a Message on the client side.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("no commands to send")]
    Empty,

    #[error("message too long: {len} bytes (max {MAX_MESSAGE})")]
    TooLong { len: usize },
}

/// Join commands into one Message.
///
/// A trailing delimiter is always appended so that two Messages drained by a
/// single server read still split into the right commands.
pub fn encode<S: AsRef<str>>(commands: &[S]) -> Result<String, EncodeError> {
    if commands.is_empty() {
        return Err(EncodeError::Empty);
    }

    let mut message = String::new();
    for command in commands {
        message.push_str(command.as_ref());
        message.push(DELIMITER);
    }

    if message.len() > MAX_MESSAGE {
        return Err(EncodeError::TooLong { len: message.len() });
    }
    Ok(message)
}

/// Decode raw Message bytes. Invalid UTF-8 is replaced, not rejected.
#[must_use]
pub fn decode(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// Split a Message into its command strings.
///
/// Empty and whitespace-only segments are skipped.
#[must_use]
pub fn frame(message: &str) -> Frames<'_> {
    Frames {
        segments: message.split(DELIMITER),
    }
}

/// Single-pass iterator over the command strings of one Message.
#[derive(Debug)]
pub struct Frames<'a> {
    segments: std::str::Split<'a, char>,
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.segments
            .by_ref()
            .map(str::trim)
            .find(|segment| !segment.is_empty())
    }
}

/// Program name plus arguments, ready to be exec'd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgVector {
    args: Vec<String>,
    dropped: usize,
}

impl ArgVector {
    /// Tokenize one command string on whitespace runs.
    ///
    /// Tokens past [`MAX_ARGS`] are dropped. Returns `None` when the command
    /// has no tokens at all.
    #[must_use]
    pub fn parse(command: &str) -> Option<Self> {
        let mut tokens = command.split_whitespace();
        let args: Vec<String> = tokens.by_ref().take(MAX_ARGS).map(str::to_owned).collect();
        if args.is_empty() {
            return None;
        }
        let dropped = tokens.count();
        Some(Self { args, dropped })
    }

    /// The program to run.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.args[0]
    }

    /// All tokens, program name first.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    /// Number of tokens discarded by the [`MAX_ARGS`] cap.
    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(message: &str) -> Vec<&str> {
        frame(message).collect()
    }

    #[test]
    fn test_frame_splits_on_delimiter() {
        assert_eq!(frames("ls -la;pwd;date"), vec!["ls -la", "pwd", "date"]);
    }

    #[test]
    fn test_frame_ignores_whitespace_and_trailing_delimiter() {
        assert_eq!(frames("a;b;c"), frames("a; b ;c;"));
        assert_eq!(frames("a; b ;c;"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_frame_skips_empty_segments() {
        assert_eq!(frames(";;  ;\t;pwd;;"), vec!["pwd"]);
        assert!(frames("").is_empty());
        assert!(frames("   \n ").is_empty());
        assert!(frames(";;;").is_empty());
    }

    #[test]
    fn test_frame_strips_newline_from_shell_writers() {
        assert_eq!(frames("pwd\n"), vec!["pwd"]);
    }

    #[test]
    fn test_parse_splits_whitespace_runs() {
        let argv = ArgVector::parse("  ls   -la\t/tmp ").unwrap();
        assert_eq!(argv.program(), "ls");
        assert_eq!(argv.as_slice(), ["ls", "-la", "/tmp"]);
        assert_eq!(argv.dropped(), 0);
    }

    #[test]
    fn test_parse_empty_is_invalid() {
        assert!(ArgVector::parse("").is_none());
        assert!(ArgVector::parse("   \t ").is_none());
    }

    #[test]
    fn test_parse_truncates_at_max_args() {
        let command = (0..40).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let argv = ArgVector::parse(&command).unwrap();
        assert_eq!(argv.as_slice().len(), MAX_ARGS);
        assert_eq!(argv.as_slice().last().map(String::as_str), Some("30"));
        assert_eq!(argv.dropped(), 40 - MAX_ARGS);
    }

    #[test]
    fn test_parse_has_no_quoting() {
        let argv = ArgVector::parse("echo \"hello world\"").unwrap();
        assert_eq!(argv.as_slice(), ["echo", "\"hello", "world\""]);

        let argv = ArgVector::parse("sleep 1 && echo done").unwrap();
        assert_eq!(argv.program(), "sleep");
        assert_eq!(argv.as_slice(), ["sleep", "1", "&&", "echo", "done"]);
    }

    #[test]
    fn test_encode_joins_with_trailing_delimiter() {
        let message = encode(&["ls -la", "pwd"]).unwrap();
        assert_eq!(message, "ls -la;pwd;");
        assert_eq!(frames(&message), vec!["ls -la", "pwd"]);
    }

    #[test]
    fn test_encode_rejects_empty() {
        let commands: [&str; 0] = [];
        assert!(matches!(encode(&commands), Err(EncodeError::Empty)));
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let fits = "x".repeat(MAX_MESSAGE - 1);
        assert_eq!(encode(&[&fits]).unwrap().len(), MAX_MESSAGE);

        let too_long = "x".repeat(MAX_MESSAGE);
        assert!(matches!(
            encode(&[too_long]),
            Err(EncodeError::TooLong { len }) if len == MAX_MESSAGE + 1
        ));
    }

    #[test]
    fn test_concatenated_messages_still_frame() {
        let first = encode(&["pwd"]).unwrap();
        let second = encode(&["date"]).unwrap();
        let drained = format!("{first}{second}");
        assert_eq!(frames(&drained), vec!["pwd", "date"]);
    }

    #[test]
    fn test_decode_is_lossy() {
        assert_eq!(decode(b"pwd"), "pwd");
        assert_eq!(decode(b"ec\xffho"), "ec\u{fffd}ho");
    }
}
