//! The built-in timeout source (`spec.md` §4.6).

use crate::source::{Prepare, SourceFuncs};
use crate::sys::time::Timeval;

/// `spec.md` §3 "Timeout datum".
pub struct TimeoutSource {
    expiration: Timeval,
    interval_ms: i64,
    callback: Box<dyn FnMut(Timeval) -> bool + Send>,
}

impl TimeoutSource {
    pub fn new(
        now: Timeval,
        interval_ms: i64,
        callback: Box<dyn FnMut(Timeval) -> bool + Send>,
    ) -> TimeoutSource {
        TimeoutSource {
            expiration: now.add_millis(interval_ms),
            interval_ms,
            callback,
        }
    }
}

impl SourceFuncs for TimeoutSource {
    fn prepare(&mut self, now: Timeval) -> Prepare {
        let msec = now.millis_until(self.expiration);
        Prepare {
            ready: msec <= 0,
            timeout_ms: msec.max(0),
        }
    }

    fn check(&mut self, now: Timeval) -> bool {
        now >= self.expiration
    }

    fn dispatch(&mut self, now: Timeval) -> bool {
        let keep = (self.callback)(now);
        if keep {
            // Re-arm from `now`, not from the old expiration, per
            // `spec.md` §4.6: "re-arm by setting expiration = current +
            // interval".
            self.expiration = now.add_millis(self.interval_ms);
        }
        keep
    }
}
