//! The pluggable poll driver (`spec.md` §4.1).

mod backend;
mod interest;

pub use interest::Interest;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// A descriptor submitted to a poll call, and the readiness the driver
/// reports back on it — `spec.md` §3 "Poll record": "pointer to a
/// caller-owned descriptor structure (fd, requested event mask, result
/// event mask)".
#[derive(Debug, Clone, Copy)]
pub struct PollFd {
    pub fd: RawFd,
    pub interest: Interest,
    pub revents: Interest,
}

impl PollFd {
    pub fn new(fd: RawFd, interest: Interest) -> PollFd {
        PollFd {
            fd,
            interest,
            revents: Interest::empty(),
        }
    }
}

/// The pluggable poll driver contract (`spec.md` §4.1, §6
/// `set_poll_function`). `timeout` follows the OS convention: `None` is
/// infinite, `Some(Duration::ZERO)` is non-blocking. Returns the number of
/// descriptors with nonzero revents.
pub type PollFn = Box<dyn FnMut(&mut [PollFd], Option<Duration>) -> io::Result<i32> + Send>;

/// The default driver: `poll(2)` (`spec.md` §4.1).
pub fn default_poll_fn() -> PollFn {
    Box::new(backend::poll)
}

/// The `select(2)` fallback (`SPEC_FULL.md` §4.1.a), installable via
/// `set_poll_function` on platforms where `poll(2)` should be avoided.
pub fn select_poll_fn() -> PollFn {
    Box::new(backend::select)
}
