//! The source registry and the prepare/check/dispatch protocol
//! (`spec.md` §3, §4.3, §4.4).

pub mod flags;
pub mod registry;

use std::any::Any;

use crate::sys::time::Timeval;

/// A registered source's unique identity tag (`spec.md` §3 "a monotonically
/// increasing identity tag (unique across the loop's lifetime)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub(crate) u64);

/// What `prepare` reports: whether the source is already ready, and the
/// maximum number of milliseconds it is willing to wait. Negative means
/// "no upper bound from me" (`spec.md` §4.4: "A negative timeout means
/// 'no upper bound from me'"); this is also the accumulation convention
/// `spec.md` §4.5 step 3 describes ("a negative value is replaced by any
/// non-negative value").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prepare {
    pub ready: bool,
    pub timeout_ms: i64,
}

impl Prepare {
    pub fn not_ready(timeout_ms: i64) -> Prepare {
        Prepare {
            ready: false,
            timeout_ms,
        }
    }

    pub fn ready() -> Prepare {
        Prepare {
            ready: true,
            timeout_ms: 0,
        }
    }
}

/// `spec.md` §4.5 step 3's timeout-accumulation convention: a negative
/// value means "unbounded" and is replaced by whichever side is
/// non-negative; when both sides are non-negative the smaller wins.
pub(crate) fn combine_timeout(a: i64, b: i64) -> i64 {
    match (a < 0, b < 0) {
        (true, true) => -1,
        (true, false) => b,
        (false, true) => a,
        (false, false) => a.min(b),
    }
}

/// The four-operation capability set every source implements
/// (`spec.md` §4.4). This is the Rust rendition of `spec.md`'s abstract
/// vtable: a trait plays the role the original's `{prepare, check,
/// dispatch, destroy}` function-pointer record would, and `destroy` is
/// simply the `Drop` glue that runs when the registry's `Box<dyn
/// SourceFuncs>` is dropped after unlink (`spec.md` invariant 6).
///
/// Both `prepare` and `check` run under the loop's lock; `dispatch` runs
/// with it released (`spec.md` invariant 5).
pub trait SourceFuncs: Send {
    /// Runs under the loop lock, before poll. Reports readiness and a
    /// maximum wait.
    fn prepare(&mut self, now: Timeval) -> Prepare;

    /// Runs under the loop lock, after poll returns.
    fn check(&mut self, now: Timeval) -> bool;

    /// Runs with the loop lock released. Returns whether to keep the
    /// source registered.
    fn dispatch(&mut self, now: Timeval) -> bool;

    /// Exposes the source-private datum for `source_remove_by_source_data`.
    /// `spec.md` compares raw pointers; a predicate over this value is the
    /// idiomatic Rust stand-in (`SPEC_FULL.md` §4.9 / `DESIGN.md`).
    /// Sources that don't need removal-by-data can leave the default.
    fn source_data(&self) -> &dyn Any {
        &()
    }

    /// Exposes the user datum for `source_remove_by_user_data`, same
    /// rationale as `source_data`.
    fn user_data(&self) -> &dyn Any {
        &()
    }
}
