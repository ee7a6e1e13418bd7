//! A priority-ordered, reentrant main-loop dispatcher: a registry of
//! heterogeneous event sources, a pluggable readiness-polling backend, and
//! the two built-in source kinds every such loop needs (timeouts, idle
//! callbacks).
//!
//! ## Usage
//!
//! First, add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! revolve = "0.1"
//! ```
//!
//! # Example
//!
//! ```
//! use revolve::MainLoop;
//!
//! let main_loop = MainLoop::new();
//!
//! main_loop.context().idle_add(|_now| {
//!     println!("idle callback ran");
//!     false // remove after this one dispatch
//! });
//!
//! main_loop.context().iteration(true).unwrap();
//! ```
//!
//! Registering a repeating timer and letting a dedicated loop run until a
//! callback calls `quit`:
//!
//! ```no_run
//! use revolve::MainLoop;
//!
//! let main_loop = MainLoop::new();
//! let handle = main_loop.context();
//!
//! handle.timeout_add(100, {
//!     let main_loop = main_loop.clone();
//!     move |_now| {
//!         main_loop.quit();
//!         false
//!     }
//! });
//!
//! main_loop.run().unwrap();
//! ```

extern crate libc;

mod context;
mod evloop;
mod idle;
mod poll_driver;
mod poll_registry;
mod source;
mod sys;
mod timeout;

pub use context::Context;
pub use evloop::MainLoop;
pub use poll_driver::{Interest, PollFd, PollFn};
pub use poll_registry::PollToken;
pub use source::{Prepare, SourceFuncs, SourceId};
pub use sys::time::Timeval;

/// `spec.md` §6 `current_time`: the wall clock, as `(seconds,
/// microseconds)`, independent of whichever context or clock a particular
/// `Context` uses internally for its own timer arithmetic.
pub fn current_time() -> (i64, i64) {
    let tv = sys::time::realtime();
    (tv.sec, tv.usec)
}

pub mod default {
    //! The process-wide default loop (`SPEC_FULL.md` §3): a thin
    //! free-function surface over a lazily-built, process-wide `Context`
    //! and `MainLoop`, matching `spec.md` §6's table of free functions
    //! one-to-one. Building a `Context` or `MainLoop` directly (see the
    //! crate root) gives an isolated loop instead — useful for tests and
    //! for running more than one loop in a process — while this module
    //! preserves the single-context behavior `spec.md` describes.
    use std::sync::{Arc, OnceLock};

    use crate::{Context, Interest, MainLoop, PollFn, PollToken, SourceFuncs, SourceId, Timeval};
    use std::any::Any;
    use std::io;
    use std::os::unix::io::RawFd;

    fn shared() -> &'static MainLoop {
        static LOOP: OnceLock<MainLoop> = OnceLock::new();
        LOOP.get_or_init(|| MainLoop::with_context(Arc::new(Context::new())))
    }

    /// The process-wide default `Context` (`spec.md` §9 "Global state").
    pub fn context() -> &'static Context {
        shared().context()
    }

    pub fn source_add(priority: i32, can_recurse: bool, funcs: Box<dyn SourceFuncs>) -> SourceId {
        context().source_add(priority, can_recurse, funcs)
    }

    pub fn source_remove(id: SourceId) -> bool {
        context().source_remove(id)
    }

    pub fn source_remove_by_user_data(pred: impl Fn(&dyn Any) -> bool) -> bool {
        context().source_remove_by_user_data(pred)
    }

    pub fn source_remove_by_source_data(pred: impl Fn(&dyn Any) -> bool) -> bool {
        context().source_remove_by_source_data(pred)
    }

    pub fn poll_add(priority: i32, fd: RawFd, interest: Interest) -> PollToken {
        context().poll_add(priority, fd, interest)
    }

    pub fn poll_remove(fd: RawFd) -> bool {
        context().poll_remove_by_fd(fd)
    }

    pub fn set_poll_function(poll_fn: Option<PollFn>) {
        context().set_poll_function(poll_fn)
    }

    pub fn pending() -> io::Result<bool> {
        context().pending()
    }

    pub fn iteration(block: bool) -> io::Result<bool> {
        context().iteration(block)
    }

    pub fn timeout_add(
        interval_ms: i64,
        callback: impl FnMut(Timeval) -> bool + Send + 'static,
    ) -> SourceId {
        context().timeout_add(interval_ms, callback)
    }

    pub fn timeout_add_full(
        priority: i32,
        interval_ms: i64,
        callback: impl FnMut(Timeval) -> bool + Send + 'static,
    ) -> SourceId {
        context().timeout_add_full(priority, interval_ms, callback)
    }

    pub fn idle_add(callback: impl FnMut(Timeval) -> bool + Send + 'static) -> SourceId {
        context().idle_add(callback)
    }

    pub fn idle_add_full(
        priority: i32,
        callback: impl FnMut(Timeval) -> bool + Send + 'static,
    ) -> SourceId {
        context().idle_add_full(priority, callback)
    }

    /// `spec.md` §4.8 `run(loop)` / `quit(loop)` over the process-wide
    /// loop handle.
    pub fn run() -> io::Result<()> {
        shared().run()
    }

    pub fn quit() {
        shared().quit()
    }
}
