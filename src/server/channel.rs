//! The named pipe the server reads Messages from.

use nix::errno::Errno;
use nix::fcntl::{OFlag, open};
use nix::sys::stat::{Mode, SFlag, fstat};
use nix::unistd::mkfifo;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Permissions of a freshly created channel: any local user may write.
pub const FIFO_MODE: u32 = 0o666;

/// Errors on the server side of the channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to create fifo {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("{path} is a symlink - refusing to use it as a fifo")]
    Symlink { path: PathBuf },

    #[error("{path} exists and is not a fifo")]
    NotFifo { path: PathBuf },

    #[error("failed to open fifo {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("failed to read from fifo: {0}")]
    Read(#[source] nix::Error),

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

/// What a single read produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// This many bytes were placed at the start of the buffer.
    Bytes(usize),
    /// The writer closed its end.
    Eof,
}

/// A FIFO on disk, owned by the server.
#[derive(Debug)]
pub struct Channel {
    path: PathBuf,
}

impl Channel {
    /// Create the FIFO at `path`, or adopt an existing one.
    pub fn create(path: PathBuf) -> Result<Self, ChannelError> {
        match std::fs::symlink_metadata(&path) {
            Ok(metadata) => {
                let file_type = metadata.file_type();
                if file_type.is_symlink() {
                    return Err(ChannelError::Symlink { path });
                }
                if !file_type.is_fifo() {
                    return Err(ChannelError::NotFifo { path });
                }
                debug!(path = %path.display(), "reusing existing fifo");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(ChannelError::Io)?;
                }
                match mkfifo(path.as_path(), Mode::from_bits_truncate(FIFO_MODE)) {
                    Ok(()) => {
                        // mkfifo is subject to the umask
                        let perms = std::fs::Permissions::from_mode(FIFO_MODE);
                        std::fs::set_permissions(&path, perms).map_err(ChannelError::Io)?;
                        debug!(path = %path.display(), "created fifo");
                    }
                    // Lost a race with another creator; the fifo is there now.
                    Err(Errno::EEXIST) => {}
                    Err(source) => return Err(ChannelError::Create { path, source }),
                }
            }
            Err(e) => return Err(ChannelError::Io(e)),
        }

        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the read end. Blocks until a writer connects.
    ///
    /// The path is checked again on every open: if it was replaced by a
    /// symlink or a non-FIFO since [`Channel::create`], this fails.
    pub fn open_reader(&self) -> Result<Reader, ChannelError> {
        loop {
            match open(
                self.path.as_path(),
                OFlag::O_RDONLY | OFlag::O_CLOEXEC | OFlag::O_NOFOLLOW,
                Mode::empty(),
            ) {
                Ok(fd) => {
                    let stat = fstat(fd.as_fd()).map_err(|source| ChannelError::Open {
                        path: self.path.clone(),
                        source,
                    })?;
                    if SFlag::from_bits_truncate(stat.st_mode) & SFlag::S_IFMT != SFlag::S_IFIFO {
                        return Err(ChannelError::NotFifo {
                            path: self.path.clone(),
                        });
                    }
                    return Ok(Reader { fd });
                }
                Err(Errno::EINTR) => {}
                Err(Errno::ELOOP) => {
                    return Err(ChannelError::Symlink {
                        path: self.path.clone(),
                    });
                }
                Err(source) => {
                    return Err(ChannelError::Open {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Remove the FIFO from the filesystem.
    pub fn remove(&self) {
        std::fs::remove_file(&self.path).ok();
    }
}

/// Open read end of the channel, attached to one writer.
#[derive(Debug)]
pub struct Reader {
    fd: OwnedFd,
}

impl Reader {
    /// One read call. No reassembly across reads is attempted.
    pub fn read(&self, buf: &mut [u8]) -> Result<Received, ChannelError> {
        loop {
            match nix::unistd::read(self.fd.as_fd(), buf) {
                Ok(0) => return Ok(Received::Eof),
                Ok(n) => return Ok(Received::Bytes(n)),
                Err(Errno::EINTR) => {}
                Err(e) => return Err(ChannelError::Read(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/fifoexec-channel-{pid}-{id}.fifo"))
    }

    #[test]
    fn test_create_is_idempotent() {
        let path = unique_path();
        let first = Channel::create(path.clone()).unwrap();
        let second = Channel::create(path.clone()).unwrap();
        assert_eq!(first.path(), second.path());

        let metadata = std::fs::metadata(&path).unwrap();
        assert!(metadata.file_type().is_fifo());
        assert_eq!(metadata.permissions().mode() & 0o777, FIFO_MODE);

        first.remove();
        assert!(!path.exists());
    }

    #[test]
    fn test_create_rejects_regular_file() {
        let path = unique_path();
        std::fs::write(&path, b"not a fifo").unwrap();
        let result = Channel::create(path.clone());
        assert!(matches!(result, Err(ChannelError::NotFifo { .. })));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_create_rejects_symlink() {
        let target = unique_path();
        let link = unique_path();
        std::fs::write(&target, b"").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let result = Channel::create(link.clone());
        assert!(matches!(result, Err(ChannelError::Symlink { .. })));

        std::fs::remove_file(&link).ok();
        std::fs::remove_file(&target).ok();
    }

    #[test]
    fn test_open_reader_rejects_replaced_path() {
        let path = unique_path();
        let channel = Channel::create(path.clone()).unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, b"touch /tmp/should-not-run;").unwrap();
        assert!(matches!(
            channel.open_reader(),
            Err(ChannelError::NotFifo { .. })
        ));

        std::fs::remove_file(&path).unwrap();
        let target = unique_path();
        nix::unistd::mkfifo(target.as_path(), Mode::from_bits_truncate(0o600)).unwrap();
        std::os::unix::fs::symlink(&target, &path).unwrap();
        assert!(matches!(
            channel.open_reader(),
            Err(ChannelError::Symlink { .. })
        ));

        channel.remove();
        std::fs::remove_file(&target).ok();
    }

    #[test]
    fn test_read_until_writer_closes() {
        let path = unique_path();
        let channel = Channel::create(path.clone()).unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            let mut fifo = std::fs::OpenOptions::new()
                .write(true)
                .open(writer_path)
                .unwrap();
            fifo.write_all(b"pwd;").unwrap();
        });

        let reader = channel.open_reader().unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(reader.read(&mut buf).unwrap(), Received::Bytes(4));
        assert_eq!(&buf[..4], b"pwd;");

        writer.join().unwrap();
        assert_eq!(reader.read(&mut buf).unwrap(), Received::Eof);

        channel.remove();
    }
}
