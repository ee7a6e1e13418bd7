use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::syscall;

use super::fd::FileDesc;

/// The read/write pair backing the wake-up channel (`spec.md` §4.1).
///
/// Created with `O_NONBLOCK | O_CLOEXEC` so that `wakeup` never blocks the
/// writer and the descriptors don't leak across `exec`.
pub struct Pipe {
    reader: FileDesc,
    writer: FileDesc,
}

impl Pipe {
    pub fn new() -> io::Result<Pipe> {
        let mut fds = [0 as RawFd; 2];

        syscall!(pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC))?;

        Ok(Pipe {
            reader: unsafe { FileDesc::new(fds[0]) },
            writer: unsafe { FileDesc::new(fds[1]) },
        })
    }

    pub fn reader_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Writes a single byte, waking a thread blocked in poll on the reader.
    /// A full pipe (the wake-up was already pending) is not an error.
    pub fn wakeup(&self) -> io::Result<()> {
        match (&self.writer).write(&[1u8]) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drains exactly one pending wake-up byte.
    pub fn drain_one(&self) -> io::Result<()> {
        let mut buf = [0u8; 1];
        match (&self.reader).read(&mut buf) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for Pipe {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}
