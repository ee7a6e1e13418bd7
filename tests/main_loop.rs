//! End-to-end scenarios S1-S6 and the remaining testable properties from
//! `spec.md` §8, driven entirely through the public `Context`/`MainLoop`
//! surface.

use std::io::Write;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use revolve::{Context, Interest, MainLoop, Prepare, SourceFuncs, Timeval};

/// A source that is always ready and just runs a closure on dispatch,
/// for scenarios that need an unconditionally-ready source at a given
/// priority (`spec.md` S3, S4, S5) rather than the built-in idle source.
struct AlwaysReady<F>(F);

impl<F: FnMut(Timeval) -> bool + Send> SourceFuncs for AlwaysReady<F> {
    fn prepare(&mut self, _now: Timeval) -> Prepare {
        Prepare::ready()
    }

    fn check(&mut self, _now: Timeval) -> bool {
        true
    }

    fn dispatch(&mut self, now: Timeval) -> bool {
        (self.0)(now)
    }
}

// S1 — Basic idle: register an idle source that appends 'x' and removes
// itself; one iteration dispatches it and the source is gone afterward.
#[test]
fn s1_basic_idle() {
    let ctx = Context::new();
    let buf = Arc::new(Mutex::new(String::new()));

    let id = {
        let buf = buf.clone();
        ctx.idle_add(move |_now| {
            buf.lock().unwrap().push('x');
            false
        })
    };

    assert!(ctx.iteration(true).unwrap());
    assert_eq!(*buf.lock().unwrap(), "x");
    assert!(!ctx.source_remove(id), "dispatch already removed it");
}

// S2 — Timer repeats three times: a 10ms timeout whose callback returns
// true twice then false fires exactly three times and is then gone.
#[test]
fn s2_timer_repeats_three_times() {
    let clock = Arc::new(Mutex::new(Timeval::new(0, 0)));
    let ctx = {
        let clock = clock.clone();
        Context::with_clock(move || *clock.lock().unwrap())
    };

    let count = Arc::new(AtomicUsize::new(0));
    let id = {
        let count = count.clone();
        ctx.timeout_add(10, move |_now| {
            let n = count.fetch_add(1, Ordering::SeqCst) + 1;
            n < 3
        })
    };

    for _ in 0..3 {
        *clock.lock().unwrap() = clock.lock().unwrap().add_millis(10);
        ctx.iteration(false).unwrap();
    }

    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert!(!ctx.source_remove(id));
}

// S3 — Priority gating: a priority-10 always-ready source dispatches
// alone; once removed, a priority-20 source gets its turn.
#[test]
fn s3_priority_gating() {
    let ctx = Context::new();
    let a_ran = Arc::new(AtomicBool::new(false));
    let b_ran = Arc::new(AtomicBool::new(false));

    let a_id = {
        let a_ran = a_ran.clone();
        ctx.source_add(
            10,
            false,
            Box::new(AlwaysReady(move |_now| {
                a_ran.store(true, Ordering::SeqCst);
                true
            })),
        )
    };
    {
        let b_ran = b_ran.clone();
        ctx.source_add(
            20,
            false,
            Box::new(AlwaysReady(move |_now| {
                b_ran.store(true, Ordering::SeqCst);
                true
            })),
        );
    }

    ctx.iteration(false).unwrap();
    assert!(a_ran.load(Ordering::SeqCst));
    assert!(!b_ran.load(Ordering::SeqCst), "lower priority must not run yet");

    ctx.source_remove(a_id);
    ctx.iteration(false).unwrap();
    assert!(b_ran.load(Ordering::SeqCst));
}

// S4 — FIFO within priority: two idle sources at the same priority
// dispatch in registration order within a single iteration.
#[test]
fn s4_fifo_within_priority() {
    let ctx = Context::new();
    let buf = Arc::new(Mutex::new(String::new()));

    {
        let buf = buf.clone();
        ctx.idle_add(move |_now| {
            buf.lock().unwrap().push('1');
            false
        });
    }
    {
        let buf = buf.clone();
        ctx.idle_add(move |_now| {
            buf.lock().unwrap().push('2');
            false
        });
    }

    ctx.iteration(false).unwrap();
    assert_eq!(*buf.lock().unwrap(), "12");
}

// S5 — Non-recursive guard: a dispatch that calls `iteration(false)`
// reentrantly must not re-enter itself; the inner call finds nothing to
// dispatch since the only source present is mid-dispatch.
#[test]
fn s5_non_recursive_guard() {
    let ctx = Arc::new(Context::new());
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let ctx_inner = ctx.clone();
        let calls = calls.clone();
        ctx.source_add(
            0,
            false,
            Box::new(AlwaysReady(move |_now| {
                let ctx = &ctx_inner;
                calls.fetch_add(1, Ordering::SeqCst);
                let reentered = ctx.iteration(false).unwrap();
                assert!(!reentered, "non-recursive source must not be re-entered");
                false
            })),
        );
    }

    ctx.iteration(false).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// S5-b — Recursive allowed: the same shape, but with `can_recurse` set,
// the source may be re-entered from within its own dispatch.
#[test]
fn s5b_recursive_allowed_with_can_recurse() {
    let ctx = Arc::new(Context::new());
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let ctx_inner = ctx.clone();
        let calls = calls.clone();
        ctx.clone().source_add(
            0,
            true,
            Box::new(AlwaysReady(move |_now| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 2 {
                    ctx_inner.iteration(false).unwrap();
                }
                false
            })),
        );
    }

    ctx.iteration(false).unwrap();
    assert!(calls.load(Ordering::SeqCst) >= 2);
}

// S6 — Wake-up: a thread blocked in `iteration(true)` with nothing ready
// and an infinite timeout returns soon after another thread adds a
// source.
#[test]
fn s6_wakeup_liveness() {
    let ctx = Arc::new(Context::new());
    let dispatched = Arc::new(AtomicBool::new(false));

    let blocked = {
        let ctx = ctx.clone();
        thread::spawn(move || ctx.iteration(true).unwrap())
    };

    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    {
        let dispatched = dispatched.clone();
        ctx.idle_add(move |_now| {
            dispatched.store(true, Ordering::SeqCst);
            false
        });
    }

    let ran = blocked.join().unwrap();
    assert!(ran);
    assert!(dispatched.load(Ordering::SeqCst));
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "blocked iteration should wake promptly, took {:?}",
        start.elapsed()
    );
}

// Testable property 9 — round-trip: add then remove leaves the loop with
// nothing to dispatch.
#[test]
fn round_trip_add_remove_leaves_nothing_pending() {
    let ctx = Context::new();
    let id = ctx.idle_add(|_now| true);
    ctx.source_remove(id);
    assert!(!ctx.pending().unwrap());
}

// Calling `pending()` repeatedly without an intervening `iteration()`
// must not queue (or ref) the same ready source twice.
#[test]
fn pending_is_idempotent_when_not_drained() {
    let ctx = Context::new();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        ctx.idle_add(move |_now| {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        });
    }

    assert!(ctx.pending().unwrap());
    assert!(ctx.pending().unwrap());
    assert!(ctx.iteration(false).unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// `MainLoop::run`/`quit`: a timer that quits the loop after firing once
// terminates `run` promptly.
#[test]
fn main_loop_run_quits_on_request() {
    let main_loop = MainLoop::new();

    {
        let main_loop = main_loop.clone();
        main_loop.context().timeout_add(5, move |_now| {
            main_loop.quit();
            false
        });
    }

    main_loop.run().unwrap();
}

// A custom fd-backed source exercises `poll_add`/`poll_remove` and the
// `poll(2)` driver end to end: the source isn't ready until its
// descriptor actually becomes readable.
struct FdReadySource {
    ctx: Arc<Context>,
    fd: RawFd,
    ran: Arc<AtomicBool>,
}

impl SourceFuncs for FdReadySource {
    fn prepare(&mut self, _now: Timeval) -> Prepare {
        Prepare::not_ready(-1)
    }

    fn check(&mut self, _now: Timeval) -> bool {
        self.ctx.revents_for(self.fd).is_readable()
    }

    fn dispatch(&mut self, _now: Timeval) -> bool {
        self.ran.store(true, Ordering::SeqCst);
        false
    }
}

#[test]
fn custom_fd_source_dispatches_when_readable() {
    let ctx = Arc::new(Context::new());
    let (mut a, b) = UnixStream::pair().unwrap();
    b.set_nonblocking(true).unwrap();

    let fd = b.as_raw_fd();
    ctx.poll_add(0, fd, Interest::readable());

    let ran = Arc::new(AtomicBool::new(false));
    ctx.source_add(
        0,
        false,
        Box::new(FdReadySource {
            ctx: ctx.clone(),
            fd,
            ran: ran.clone(),
        }),
    );

    assert!(!ctx.iteration(false).unwrap(), "nothing readable yet");
    assert!(!ran.load(Ordering::SeqCst));

    a.write_all(b"x").unwrap();

    assert!(ctx.iteration(false).unwrap());
    assert!(ran.load(Ordering::SeqCst));

    // `b` stays alive so its fd isn't reused by something else registered
    // later in the same process; drop it last.
    drop(b);
}

/// A source whose `SourceFuncs::Drop` glue increments a counter, used to
/// confirm destroy actually runs (and runs exactly once) when a source
/// retires itself by returning `false` from `dispatch` — as opposed to
/// being removed explicitly by id.
struct CountsDrops {
    drops: Arc<AtomicUsize>,
    dispatches: Arc<AtomicUsize>,
}

impl Drop for CountsDrops {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl SourceFuncs for CountsDrops {
    fn prepare(&mut self, _now: Timeval) -> Prepare {
        Prepare::ready()
    }

    fn check(&mut self, _now: Timeval) -> bool {
        true
    }

    fn dispatch(&mut self, _now: Timeval) -> bool {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        false
    }
}

// Testable property 6 (destroy exactly once) via the dispatch path rather
// than explicit `source_remove`: a source that retires itself by
// returning `false` must still be unlinked and destroyed, not merely
// marked invalid and leaked.
#[test]
fn dispatch_returning_false_destroys_the_source() {
    let ctx = Context::new();
    let drops = Arc::new(AtomicUsize::new(0));
    let dispatches = Arc::new(AtomicUsize::new(0));

    ctx.source_add(
        0,
        false,
        Box::new(CountsDrops {
            drops: drops.clone(),
            dispatches: dispatches.clone(),
        }),
    );

    assert!(ctx.iteration(false).unwrap());
    assert_eq!(dispatches.load(Ordering::SeqCst), 1);
    assert_eq!(
        drops.load(Ordering::SeqCst),
        1,
        "dispatch returning false must destroy the source, not just mark it invalid"
    );

    // And it must not be dispatched again on a later iteration.
    ctx.pending().unwrap();
    assert_eq!(dispatches.load(Ordering::SeqCst), 1);
}

// Reentrant dispatch (testable property 5) must not panic: a
// `CAN_RECURSE` source's own `dispatch` is reachable again mid-call, via
// the raw pointer an enclosing frame recorded rather than finding an
// already-emptied slot.
#[test]
fn recursive_dispatch_does_not_panic_and_runs_twice() {
    let ctx = Arc::new(Context::new());
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let ctx_inner = ctx.clone();
        let calls = calls.clone();
        ctx.source_add(
            0,
            true,
            Box::new(AlwaysReady(move |_now| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 2 {
                    ctx_inner.iteration(false).unwrap();
                }
                false
            })),
        );
    }

    ctx.iteration(false).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!ctx.pending().unwrap(), "both layers retired the source");
}

// Same reentrant-dispatch shape as above, but with a sibling idle source
// queued the same round (`spec.md` S4's two-same-priority setup). Before
// the `pending_dispatch` fix this dispatched the sibling twice: the
// nested `iteration(false)` the recurser triggers found the *shared*
// queue still holding the sibling and correctly drained it once, but a
// `Vec`-snapshotting `dispatch_phase` instead left the outer frame
// holding its own stale copy of the same slot, which it would then
// dispatch a second time once the nested call returned.
#[test]
fn recursive_dispatch_does_not_double_dispatch_a_sibling() {
    let ctx = Arc::new(Context::new());
    let recurser_calls = Arc::new(AtomicUsize::new(0));
    let sibling_calls = Arc::new(AtomicUsize::new(0));

    {
        let ctx_inner = ctx.clone();
        let recurser_calls = recurser_calls.clone();
        ctx.source_add(
            0,
            true,
            Box::new(AlwaysReady(move |_now| {
                recurser_calls.fetch_add(1, Ordering::SeqCst);
                ctx_inner.iteration(false).unwrap();
                false
            })),
        );
    }
    {
        let sibling_calls = sibling_calls.clone();
        ctx.idle_add(move |_now| {
            sibling_calls.fetch_add(1, Ordering::SeqCst);
            false
        });
    }

    ctx.iteration(false).unwrap();

    assert_eq!(recurser_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        sibling_calls.load(Ordering::SeqCst),
        1,
        "sibling source queued the same round as a recursing source must dispatch exactly once"
    );
}
