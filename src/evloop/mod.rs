//! The loop handle (`spec.md` §4.8): `new`/`run`/`quit`/`destroy`, a
//! trivial `quit` flag driving repeated iteration over a `Context`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::Context;

struct Inner {
    context: Arc<Context>,
    quit: AtomicBool,
}

/// `spec.md` §3 "Loop: a single boolean 'quit' flag."
///
/// `MainLoop` is cheap to clone (it's an `Arc` around its state), which is
/// what lets a dispatched callback capture the same loop handle it's
/// running under and call `quit()` on it, as in the crate's top-level
/// example.
#[derive(Clone)]
pub struct MainLoop {
    inner: Arc<Inner>,
}

impl MainLoop {
    /// Builds a loop bound to a fresh, private `Context`. Most programs
    /// want exactly one of these.
    pub fn new() -> MainLoop {
        MainLoop::with_context(Arc::new(Context::new()))
    }

    /// Builds a loop bound to an existing `Context`, e.g. the process-wide
    /// default context the free functions in the crate root operate on,
    /// or a context shared between more than one `MainLoop` (`spec.md` §9
    /// "Global state" design note: the single-context case is the default,
    /// but nothing prevents more than one `Context` per process).
    pub fn with_context(context: Arc<Context>) -> MainLoop {
        MainLoop {
            inner: Arc::new(Inner {
                context,
                quit: AtomicBool::new(false),
            }),
        }
    }

    /// The `Context` this loop drives: the registry and poll-driver
    /// surface (`source_add`, `timeout_add`, `idle_add`, ...).
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// `spec.md` §4.8 `run(loop)`: "sets quit = false, then repeats
    /// iteration(true) while quit is false."
    pub fn run(&self) -> io::Result<()> {
        self.inner.quit.store(false, Ordering::SeqCst);
        while !self.inner.quit.load(Ordering::SeqCst) {
            self.inner.context.iteration(true)?;
        }
        Ok(())
    }

    /// `spec.md` §4.8 `quit(loop)`: "sets quit = true; the running run
    /// will observe it between iterations."
    pub fn quit(&self) {
        self.inner.quit.store(true, Ordering::SeqCst);
    }

    /// `spec.md` §4.8 `destroy(loop)`: "releases the handle (sources
    /// outlive it)." Sources live in the `Context`, which this loop only
    /// borrows a reference to, so dropping the handle never touches them;
    /// this method exists only to give the spec's `destroy` operation an
    /// explicit, documented spelling instead of relying on `Drop`.
    pub fn destroy(self) {}
}

impl Default for MainLoop {
    fn default() -> MainLoop {
        MainLoop::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn run_stops_after_quit() {
        let main_loop = MainLoop::new();
        let calls = Arc::new(AtomicUsize::new(0));

        {
            let calls = calls.clone();
            let main_loop = main_loop.clone();
            main_loop.context().idle_add(move |_now| {
                calls.fetch_add(1, Ordering::SeqCst);
                if calls.load(Ordering::SeqCst) >= 3 {
                    main_loop.quit();
                }
                true
            });
        }

        main_loop.run().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
