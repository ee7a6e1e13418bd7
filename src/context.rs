//! The explicit state container (`SPEC_FULL.md` §3, resolving `spec.md`
//! §9's "Global state" design note): one `Mutex` guarding the source
//! registry, the poll-record registry, the wake-up pipe, and the
//! pluggable poll function (`spec.md` §5: "A single global lock protects
//! ...").

use std::any::Any;
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::time::Duration;

use crate::idle::IdleSource;
use crate::poll_driver::{default_poll_fn, Interest, PollFd, PollFn};
use crate::poll_registry::{PollRegistry, PollToken};
use crate::source::registry::SourceRegistry;
use crate::source::{combine_timeout, SourceFuncs, SourceId};
use crate::sys::pipe::Pipe;
use crate::sys::time::{self, Timeval};
use crate::timeout::TimeoutSource;

type ClockFn = Box<dyn Fn() -> Timeval + Send + Sync>;

struct Inner {
    sources: SourceRegistry,
    polls: PollRegistry,
    poll_fn: Option<PollFn>,
    wake_pipe: Option<Pipe>,
    wake_token: Option<PollToken>,
    poll_waiting: bool,
    /// `spec.md` §3 "Pending-dispatch queue". A `VecDeque`, not a `Vec`,
    /// because `dispatch_phase` must pop one entry at a time under the
    /// lock: a source dispatched from the front may itself call back into
    /// `iterate`, and that nested call's own reentrancy-drain step
    /// (`spec.md` §4.5 step 2) needs to see — and continue popping from —
    /// this same shared queue rather than a snapshot already taken by the
    /// outer frame, or a sibling source queued this round would be
    /// dispatched twice (once by the nested call, once by the outer
    /// frame's stale copy).
    pending_dispatch: VecDeque<usize>,
}

impl Inner {
    fn new() -> Inner {
        Inner {
            sources: SourceRegistry::new(),
            polls: PollRegistry::new(),
            poll_fn: Some(default_poll_fn()),
            wake_pipe: None,
            wake_token: None,
            poll_waiting: false,
            pending_dispatch: VecDeque::new(),
        }
    }

    /// Lazily creates the wake-up pipe and registers its read end at
    /// priority 0 (`spec.md` §3 invariant 4: "at most once").
    fn ensure_wake_pipe(&mut self) {
        if self.wake_pipe.is_none() {
            // `spec.md` §7: fatal, the loop cannot honor the add-while-
            // blocked contract without it.
            let pipe = Pipe::new().unwrap_or_else(|e| {
                panic!("revolve: failed to create wake-up pipe: {}", e)
            });
            let token = self.polls.add(0, pipe.reader_fd(), Interest::readable());
            self.wake_token = Some(token);
            self.wake_pipe = Some(pipe);
        }
    }

    /// `spec.md` §4.3: "If the dispatch engine is currently blocked in
    /// poll, write one byte to the wake-up pipe and clear the flag."
    fn wake_if_blocked(&mut self) {
        if self.poll_waiting {
            self.poll_waiting = false;
            if let Some(pipe) = &self.wake_pipe {
                let _ = pipe.wakeup();
                #[cfg(feature = "log")]
                log::trace!("revolve: woke a blocked poll after source_add");
            }
        }
    }
}

/// The loop's state. The free-function surface in `lib.rs` operates on a
/// process-wide default `Context`; constructing one directly gives an
/// isolated loop (useful for tests and for running more than one loop in
/// a process).
pub struct Context {
    inner: Mutex<Inner>,
    clock: ClockFn,
}

impl Context {
    pub fn new() -> Context {
        Context {
            inner: Mutex::new(Inner::new()),
            clock: Box::new(time::monotonic),
        }
    }

    /// Builds a context with a caller-supplied clock, letting tests drive
    /// timeout sources deterministically instead of against the real
    /// monotonic clock (`SPEC_FULL.md` §9 Open Question resolution).
    pub fn with_clock(clock: impl Fn() -> Timeval + Send + Sync + 'static) -> Context {
        Context {
            inner: Mutex::new(Inner::new()),
            clock: Box::new(clock),
        }
    }

    fn now(&self) -> Timeval {
        (self.clock)()
    }

    /// `spec.md` §6 `current_time`: the wall clock, independent of
    /// whatever clock drives internal scheduling.
    pub fn current_time(&self) -> Timeval {
        time::realtime()
    }

    // ---- source registry surface (spec.md §4.3) -----------------------

    pub fn source_add(
        &self,
        priority: i32,
        can_recurse: bool,
        funcs: Box<dyn SourceFuncs>,
    ) -> SourceId {
        let mut g = self.inner.lock().unwrap();
        let id = g.sources.add(priority, can_recurse, funcs);
        g.wake_if_blocked();
        id
    }

    pub fn source_remove(&self, id: SourceId) -> bool {
        self.inner.lock().unwrap().sources.remove_by_id(id)
    }

    pub fn source_remove_by_user_data(&self, pred: impl Fn(&dyn Any) -> bool) -> bool {
        self.inner
            .lock()
            .unwrap()
            .sources
            .remove_by_user_data(&pred)
    }

    pub fn source_remove_by_source_data(&self, pred: impl Fn(&dyn Any) -> bool) -> bool {
        self.inner
            .lock()
            .unwrap()
            .sources
            .remove_by_source_data(&pred)
    }

    // ---- poll registry surface (spec.md §4.2) -------------------------

    pub fn poll_add(&self, priority: i32, fd: RawFd, interest: Interest) -> PollToken {
        self.inner.lock().unwrap().polls.add(priority, fd, interest)
    }

    pub fn poll_remove(&self, token: PollToken) {
        self.inner.lock().unwrap().polls.remove(token)
    }

    pub fn poll_remove_by_fd(&self, fd: RawFd) -> bool {
        self.inner.lock().unwrap().polls.remove_by_fd(fd)
    }

    pub fn revents_for(&self, fd: RawFd) -> Interest {
        self.inner.lock().unwrap().polls.revents(fd)
    }

    /// `spec.md` §6 `set_poll_function`: `None` restores the default
    /// `poll(2)` driver.
    pub fn set_poll_function(&self, poll_fn: Option<PollFn>) {
        let mut g = self.inner.lock().unwrap();
        g.poll_fn = Some(poll_fn.unwrap_or_else(default_poll_fn));
    }

    // ---- convenience sources (spec.md §6) ------------------------------

    pub fn timeout_add(
        &self,
        interval_ms: i64,
        callback: impl FnMut(Timeval) -> bool + Send + 'static,
    ) -> SourceId {
        self.timeout_add_full(0, interval_ms, callback)
    }

    pub fn timeout_add_full(
        &self,
        priority: i32,
        interval_ms: i64,
        callback: impl FnMut(Timeval) -> bool + Send + 'static,
    ) -> SourceId {
        let now = self.now();
        let source = TimeoutSource::new(now, interval_ms, Box::new(callback));
        self.source_add(priority, false, Box::new(source))
    }

    pub fn idle_add(&self, callback: impl FnMut(Timeval) -> bool + Send + 'static) -> SourceId {
        self.idle_add_full(0, callback)
    }

    pub fn idle_add_full(
        &self,
        priority: i32,
        callback: impl FnMut(Timeval) -> bool + Send + 'static,
    ) -> SourceId {
        let source = IdleSource::new(Box::new(callback));
        self.source_add(priority, false, Box::new(source))
    }

    // ---- dispatch engine (spec.md §4.5) --------------------------------

    /// Non-blocking readiness probe (`spec.md` §6 `pending`).
    pub fn pending(&self) -> io::Result<bool> {
        self.iterate(false, false)
    }

    /// Runs exactly one iteration (`spec.md` §6 `iteration`).
    pub fn iteration(&self, block: bool) -> io::Result<bool> {
        self.iterate(block, true)
    }

    fn iterate(&self, block: bool, dispatch: bool) -> io::Result<bool> {
        let mut g = self.inner.lock().unwrap();
        let now = self.now();

        // Step 2: reentrancy drain (spec.md §4.5 step 2). A non-empty
        // queue here means a previous call already ran check and left
        // sources queued — from a nested call during dispatch, or from a
        // prior `dispatch = false` probe. Either way the sources are
        // already ref'd and marked not-ready; re-running prepare/check
        // without draining first would queue them a second time.
        if !g.pending_dispatch.is_empty() {
            if dispatch {
                self.dispatch_phase(g, now);
            }
            return Ok(true);
        }

        g.ensure_wake_pipe();

        // Step 3: prepare phase.
        let mut timeout: i64 = if block { -1 } else { 0 };
        let mut ceiling: Option<i32> = None;
        let mut nready = 0usize;

        let order = g.sources.order().to_vec();
        for slot in order {
            if !g.sources.is_valid(slot) {
                continue;
            }
            let priority = g.sources.priority_of(slot);
            if let Some(c) = ceiling {
                if priority > c {
                    break;
                }
            }
            if g.sources.is_in_call(slot) && !g.sources.can_recurse(slot) {
                continue;
            }

            g.sources.add_ref(slot);
            let prep = g.sources.prepare(slot, now);
            g.sources.unref(slot);

            if prep.ready {
                g.sources.set_ready(slot, true);
                ceiling = Some(priority);
                nready += 1;
                timeout = 0;
            } else {
                timeout = combine_timeout(timeout, prep.timeout_ms);
            }
        }

        if !dispatch && nready > 0 {
            return Ok(true);
        }

        // Step 4: poll phase.
        let records = g.polls.collect(ceiling);
        let mut pollfds: Vec<PollFd> = records.iter().map(|&(_, pfd)| pfd).collect();

        g.poll_waiting = true;
        let mut poll_fn = g.poll_fn.take().expect("poll function missing");
        let poll_timeout = if timeout < 0 {
            None
        } else {
            Some(Duration::from_millis(timeout as u64))
        };

        drop(g);
        let poll_result = poll_fn(&mut pollfds, poll_timeout);
        g = self.inner.lock().unwrap();
        g.poll_fn = Some(poll_fn);
        poll_result?;

        if g.poll_waiting {
            // Nobody else touched the flag: no wake-up occurred.
            g.poll_waiting = false;
        } else {
            // Another thread's source_add drained the flag and wrote a
            // byte for us; consume it (spec.md §4.1).
            if let Some(pipe) = &g.wake_pipe {
                let _ = pipe.drain_one();
            }
        }

        for (token, pfd) in records.iter().zip(pollfds.iter()) {
            g.polls.set_revents(token.0, pfd.revents);
        }

        // Step 5: check phase.
        let order = g.sources.order().to_vec();
        for slot in order {
            if !g.sources.is_valid(slot) {
                continue;
            }
            let priority = g.sources.priority_of(slot);
            if let Some(c) = ceiling {
                if priority > c {
                    break;
                }
            }
            if g.sources.is_in_call(slot) && !g.sources.can_recurse(slot) {
                continue;
            }

            let selected = g.sources.is_ready(slot) || g.sources.check(slot, now);
            if selected {
                g.sources.set_ready(slot, false);
                g.sources.add_ref(slot);
                g.pending_dispatch.push_back(slot);
                ceiling = Some(priority);
                nready += 1;
            }
        }

        if !dispatch {
            return Ok(!g.pending_dispatch.is_empty());
        }

        let dispatched = !g.pending_dispatch.is_empty();
        self.dispatch_phase(g, now);
        Ok(dispatched)
    }

    /// Step 6: dispatch phase. Runs with the lock released across each
    /// `dispatch` call (`spec.md` invariant 5), re-acquiring it to update
    /// `IN_CALL` and decide removal between callbacks.
    ///
    /// Pops `g.pending_dispatch` one slot at a time, under the lock,
    /// rather than snapshotting the whole queue up front. A dispatched
    /// callback may itself call back into `iterate` (a `CAN_RECURSE`
    /// source, or any nested pump); that nested call's own reentrancy
    /// drain (`spec.md` §4.5 step 2) sees this same queue and keeps
    /// popping from it. Snapshotting into a local `Vec` instead would let
    /// the nested call's drain and the outer frame's leftover loop each
    /// walk their own copy of a sibling source's slot, dispatching it
    /// twice for the one readiness event that queued it.
    fn dispatch_phase(&self, mut g: std::sync::MutexGuard<'_, Inner>, now: Timeval) {
        while let Some(slot) = g.pending_dispatch.pop_front() {
            // Re-checks validity: a source queued by a prior, interrupted
            // iteration (the reentrancy-drain path) may have been removed
            // by another thread while the lock was released in between.
            if !g.sources.is_valid(slot) {
                g.sources.unref(slot);
                continue;
            }

            // A `CAN_RECURSE` source re-entering its own dispatch: an
            // enclosing frame on this thread already took its funcs out
            // and is mid-`dispatch` further up the call stack. Reach the
            // same boxed value through the pointer it recorded instead of
            // taking ownership (there's nothing left to take) and leave
            // `IN_CALL` for that enclosing frame to clear.
            if g.sources.is_in_flight(slot) {
                let ptr = g.sources.in_flight_ptr(slot);
                drop(g);
                // SAFETY: see `SourceEntry`'s `Send` impl comment in
                // `source/registry.rs` — this is a reentrant call on the
                // same thread, not a concurrent one.
                let keep = unsafe { (*ptr).dispatch(now) };
                g = self.inner.lock().unwrap();

                if !keep {
                    g.sources.retire(slot);
                }
                g.sources.unref(slot);
                continue;
            }

            g.sources.set_in_call(slot, true);
            let mut funcs = g.sources.take_for_dispatch(slot);

            drop(g);
            let keep = funcs.dispatch(now);
            g = self.inner.lock().unwrap();

            g.sources.put_back(slot, funcs);
            g.sources.set_in_call(slot, false);
            if !keep {
                g.sources.retire(slot);
            }
            g.sources.unref(slot);
        }
    }
}
