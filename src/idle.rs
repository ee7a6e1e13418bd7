//! The built-in idle source (`spec.md` §4.7).
//!
//! `spec.md` §9 notes the original's idle source writes its timeout to a
//! local rather than the caller's output slot, and is only correct because
//! any ready source already forces the poll timeout to zero. This
//! implementation writes the real value through `Prepare` instead of
//! replicating that bug.

use crate::source::{Prepare, SourceFuncs};
use crate::sys::time::Timeval;

/// `spec.md` §3 "Idle datum".
pub struct IdleSource {
    callback: Box<dyn FnMut(Timeval) -> bool + Send>,
}

impl IdleSource {
    pub fn new(callback: Box<dyn FnMut(Timeval) -> bool + Send>) -> IdleSource {
        IdleSource { callback }
    }
}

impl SourceFuncs for IdleSource {
    fn prepare(&mut self, _now: Timeval) -> Prepare {
        Prepare::ready()
    }

    fn check(&mut self, _now: Timeval) -> bool {
        true
    }

    fn dispatch(&mut self, now: Timeval) -> bool {
        (self.callback)(now)
    }
}
