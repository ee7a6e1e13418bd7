//! Wall-clock and monotonic-clock readers (`spec.md` §2 "Wall clock
//! provider", expanded per `SPEC_FULL.md` §1 to also expose a monotonic
//! source for internal timeout arithmetic).

/// A `(seconds, microseconds)` timestamp, normalized so that
/// `microseconds` is always in `[0, 1_000_000)`. This is the unit the
/// public `current_time` call and the timeout source use (`spec.md` §9
/// "Timeout arithmetic").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timeval {
    pub sec: i64,
    pub usec: i64,
}

impl Timeval {
    pub fn new(sec: i64, usec: i64) -> Timeval {
        let mut t = Timeval { sec, usec };
        t.normalize();
        t
    }

    fn normalize(&mut self) {
        if self.usec >= 1_000_000 {
            self.sec += self.usec / 1_000_000;
            self.usec %= 1_000_000;
        } else if self.usec < 0 {
            let borrow = (-self.usec + 999_999) / 1_000_000;
            self.sec -= borrow;
            self.usec += borrow * 1_000_000;
        }
    }

    pub fn add_millis(self, millis: i64) -> Timeval {
        Timeval::new(self.sec, self.usec + millis * 1000)
    }

    /// Milliseconds from `self` until `other`; negative if `other` is past.
    pub fn millis_until(self, other: Timeval) -> i64 {
        (other.sec - self.sec) * 1000 + (other.usec - self.usec) / 1000
    }
}

/// Reads `CLOCK_REALTIME`, the clock the public API exposes via
/// `current_time`.
pub fn realtime() -> Timeval {
    let mut tv: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut tv);
    }
    Timeval::new(tv.tv_sec as i64, tv.tv_nsec as i64 / 1000)
}

/// Reads `CLOCK_MONOTONIC`. Used internally so timer re-arming (`spec.md`
/// §4.6) isn't disturbed by a concurrent wall-clock step.
pub fn monotonic() -> Timeval {
    let mut tv: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut tv);
    }
    Timeval::new(tv.tv_sec as i64, tv.tv_nsec as i64 / 1000)
}
