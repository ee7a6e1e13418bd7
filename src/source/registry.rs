//! Priority-sorted source storage (`spec.md` §3 "Source registry",
//! §9 hook-list substitute, `SPEC_FULL.md` §4.9).
//!
//! Storage is a `slab::Slab<SourceEntry>` keyed by slot, plus a separate
//! `Vec<usize>` of slots kept in ascending-priority order (stable FIFO
//! within a priority, `spec.md` invariant "new source goes after all
//! existing sources of equal priority"). Identity is a monotonic counter
//! independent of the slot, so a removed-and-reused slot never reissues an
//! old id (`spec.md` invariant 2).
//!
//! Removal during iteration doesn't touch the order `Vec` directly: it
//! clears `VALID` (a tombstone) and only unlinks once the entry's
//! reference count reaches zero, exactly the strategy `spec.md` §9
//! describes ("ref-counted nodes with a tombstone flag, iteration skipping
//! tombstones").

use std::any::Any;

use slab::Slab;

use super::flags::SourceFlags;
use super::{Prepare, SourceFuncs, SourceId};
use crate::sys::time::Timeval;

pub(crate) struct SourceEntry {
    pub id: SourceId,
    pub priority: i32,
    pub flags: SourceFlags,
    ref_count: u32,
    pub funcs: Option<Box<dyn SourceFuncs>>,
    /// Set while `funcs` is `None` because an enclosing `dispatch_phase`
    /// frame on this thread took it out to call `dispatch` with the
    /// registry lock released. Lets a `CAN_RECURSE` source that re-enters
    /// its own dispatch (`spec.md` §4.5 "Recursion") reach the same boxed
    /// value a second time instead of finding an empty slot.
    in_flight: Option<*mut dyn SourceFuncs>,
}

// SAFETY: `in_flight` is only ever a pointer to the same `Box<dyn
// SourceFuncs>` this entry's own `funcs` field gave up ownership of
// (`take_for_dispatch`). `SourceFuncs: Send` already lets that box cross
// threads; `in_flight` is read only through `in_flight_ptr`, reachable
// only from a nested `iteration` call on the very thread that's already
// inside this source's `dispatch` (gated by the `IN_CALL` +
// `CAN_RECURSE` check in `Context::iterate`) — a reentrant call, not a
// concurrent one.
unsafe impl Send for SourceEntry {}

pub struct SourceRegistry {
    slots: Slab<SourceEntry>,
    order: Vec<usize>,
    next_id: u64,
}

impl SourceRegistry {
    pub fn new() -> SourceRegistry {
        SourceRegistry {
            slots: Slab::new(),
            order: Vec::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `spec.md` §4.3 `source_add`. The registry's own reference (1)
    /// is released by `remove`.
    pub fn add(&mut self, priority: i32, can_recurse: bool, funcs: Box<dyn SourceFuncs>) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;

        let mut flags = SourceFlags::valid();
        if can_recurse {
            flags.insert(SourceFlags::can_recurse());
        }

        let slot = self.slots.insert(SourceEntry {
            id,
            priority,
            flags,
            ref_count: 1,
            funcs: Some(funcs),
            in_flight: None,
        });

        let pos = self
            .order
            .partition_point(|&s| self.slots[s].priority <= priority);
        self.order.insert(pos, slot);

        id
    }

    /// Ordered (ascending priority, stable FIFO) slot indices. Tombstoned
    /// entries are skipped by the walker, not by this list.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn entry(&self, slot: usize) -> &SourceEntry {
        &self.slots[slot]
    }

    pub fn priority_of(&self, slot: usize) -> i32 {
        self.slots[slot].priority
    }

    pub fn is_valid(&self, slot: usize) -> bool {
        self.slots[slot].flags.contains(SourceFlags::valid())
    }

    pub fn is_in_call(&self, slot: usize) -> bool {
        self.slots[slot].flags.contains(SourceFlags::in_call())
    }

    pub fn can_recurse(&self, slot: usize) -> bool {
        self.slots[slot].flags.contains(SourceFlags::can_recurse())
    }

    pub fn is_ready(&self, slot: usize) -> bool {
        self.slots[slot].flags.contains(SourceFlags::ready())
    }

    pub fn set_ready(&mut self, slot: usize, ready: bool) {
        if ready {
            self.slots[slot].flags.insert(SourceFlags::ready());
        } else {
            self.slots[slot].flags.remove(SourceFlags::ready());
        }
    }

    pub fn set_in_call(&mut self, slot: usize, in_call: bool) {
        if in_call {
            self.slots[slot].flags.insert(SourceFlags::in_call());
        } else {
            self.slots[slot].flags.remove(SourceFlags::in_call());
        }
    }

    /// `spec.md` step 3/5: "ref it"; each scope (prepare, check,
    /// pending-dispatch membership) holds one.
    pub fn add_ref(&mut self, slot: usize) {
        self.slots[slot].ref_count += 1;
    }

    /// Releases a reference taken by `add_ref`, or by `add`'s own initial
    /// registry reference. Unlinks and drops (runs destroy) once the
    /// count reaches zero and the source has been marked invalid.
    pub fn unref(&mut self, slot: usize) {
        let entry = &mut self.slots[slot];
        debug_assert!(entry.ref_count > 0);
        entry.ref_count -= 1;

        if entry.ref_count == 0 && !entry.flags.contains(SourceFlags::valid()) {
            self.unlink(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        if let Some(pos) = self.order.iter().position(|&s| s == slot) {
            self.order.remove(pos);
        }
        // Dropping the entry drops `funcs`, running the source's destroy
        // glue (`spec.md` invariant 6: "only after the source is unlinked").
        self.slots.remove(slot);
    }

    /// `spec.md` §4.3 `source_remove`: releases the registry's own
    /// reference and marks the slot invalid so no further prepare/check
    /// considers it. Actual unlink happens once outstanding refs drain.
    pub fn remove_by_id(&mut self, id: SourceId) -> bool {
        self.remove_by(|entry| entry.id == id)
    }

    pub fn remove_by_source_data(&mut self, pred: &dyn Fn(&dyn Any) -> bool) -> bool {
        self.remove_by(|entry| {
            entry
                .funcs
                .as_ref()
                .map(|f| pred(f.source_data()))
                .unwrap_or(false)
        })
    }

    pub fn remove_by_user_data(&mut self, pred: &dyn Fn(&dyn Any) -> bool) -> bool {
        self.remove_by(|entry| {
            entry
                .funcs
                .as_ref()
                .map(|f| pred(f.user_data()))
                .unwrap_or(false)
        })
    }

    fn remove_by(&mut self, pred: impl Fn(&SourceEntry) -> bool) -> bool {
        let found = self.order.iter().copied().find(|&slot| {
            let entry = &self.slots[slot];
            entry.flags.contains(SourceFlags::valid()) && pred(entry)
        });

        match found {
            Some(slot) => {
                self.slots[slot].flags.remove(SourceFlags::valid());
                self.unref(slot);
                true
            }
            None => false,
        }
    }

    /// Runs `prepare` for one slot (`spec.md` step 3); the engine walks
    /// `order()` and calls this per eligible slot. If the slot is
    /// in-flight — a `CAN_RECURSE` source preparing again from within its
    /// own nested `iteration` call — goes through the pointer an
    /// enclosing frame recorded instead of the (empty) `funcs` field.
    pub fn prepare(&mut self, slot: usize, now: Timeval) -> Prepare {
        if self.is_in_flight(slot) {
            let ptr = self.in_flight_ptr(slot);
            // SAFETY: see `SourceEntry`'s `Send` impl comment — reentrant,
            // same-thread call.
            return unsafe { (*ptr).prepare(now) };
        }
        self.slots[slot]
            .funcs
            .as_mut()
            .expect("prepare on a slot with no funcs")
            .prepare(now)
    }

    pub fn check(&mut self, slot: usize, now: Timeval) -> bool {
        if self.is_in_flight(slot) {
            let ptr = self.in_flight_ptr(slot);
            // SAFETY: see `SourceEntry`'s `Send` impl comment — reentrant,
            // same-thread call.
            return unsafe { (*ptr).check(now) };
        }
        self.slots[slot]
            .funcs
            .as_mut()
            .expect("check on a slot with no funcs")
            .check(now)
    }

    /// Takes the funcs out so dispatch can run with the lock released
    /// (`spec.md` invariant 5). The caller must call `put_back` afterward.
    /// Also records a raw pointer to the same data in `in_flight` so a
    /// `CAN_RECURSE` reentry into this slot can still reach it; see
    /// `is_in_flight`/`in_flight_ptr`.
    pub fn take_for_dispatch(&mut self, slot: usize) -> Box<dyn SourceFuncs> {
        let mut funcs = self.slots[slot]
            .funcs
            .take()
            .expect("take_for_dispatch on an already-taken slot");
        self.slots[slot].in_flight = Some(&mut *funcs as *mut dyn SourceFuncs);
        funcs
    }

    pub fn put_back(&mut self, slot: usize, funcs: Box<dyn SourceFuncs>) {
        self.slots[slot].in_flight = None;
        self.slots[slot].funcs = Some(funcs);
    }

    /// True while `slot`'s funcs are out on loan to an enclosing
    /// `dispatch_phase` frame on this thread — i.e. this selection is a
    /// `CAN_RECURSE` source re-entering its own dispatch.
    pub fn is_in_flight(&self, slot: usize) -> bool {
        self.slots[slot].funcs.is_none()
    }

    /// The raw pointer an enclosing frame recorded via `take_for_dispatch`.
    /// Fetch this before releasing the registry lock, then dispatch
    /// through it after releasing — mirroring the non-reentrant path's
    /// own take-then-unlock-then-call shape.
    pub fn in_flight_ptr(&self, slot: usize) -> *mut dyn SourceFuncs {
        self.slots[slot]
            .in_flight
            .expect("in_flight_ptr on a slot that isn't in flight")
    }

    /// Marks a slot invalid without searching for it and releases the
    /// registry's own reference on it, used by the dispatch phase when a
    /// source's own `dispatch` returns `false` (`spec.md` step 6: "If
    /// dispatch returned false, destroy and unlink"). Mirrors exactly what
    /// `remove_by` does for an externally-requested removal — clear
    /// `VALID`, then `unref` once for the reference `add` established —
    /// so a source that retires itself is unlinked and destroyed on the
    /// same terms as one removed by id.
    ///
    /// Idempotent: a `CAN_RECURSE` source can have more than one dispatch
    /// frame on the call stack agree to remove it (an outer frame and a
    /// reentrant inner one both returning `false`), and only the one that
    /// observes the slot still valid should release the registry's
    /// reference — otherwise the same reference would be released twice.
    pub fn retire(&mut self, slot: usize) {
        if self.slots[slot].flags.contains(SourceFlags::valid()) {
            self.slots[slot].flags.remove(SourceFlags::valid());
            self.unref(slot);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::Prepare;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Stub;

    impl SourceFuncs for Stub {
        fn prepare(&mut self, _now: Timeval) -> Prepare {
            Prepare::not_ready(-1)
        }
        fn check(&mut self, _now: Timeval) -> bool {
            false
        }
        fn dispatch(&mut self, _now: Timeval) -> bool {
            true
        }
    }

    struct CountsDrops(Arc<AtomicUsize>);

    impl Drop for CountsDrops {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SourceFuncs for CountsDrops {
        fn prepare(&mut self, _now: Timeval) -> Prepare {
            Prepare::not_ready(-1)
        }
        fn check(&mut self, _now: Timeval) -> bool {
            false
        }
        fn dispatch(&mut self, _now: Timeval) -> bool {
            true
        }
    }

    #[test]
    fn priority_order_is_stable_fifo_within_priority() {
        let mut reg = SourceRegistry::new();
        let a = reg.add(10, false, Box::new(Stub));
        let b = reg.add(0, false, Box::new(Stub));
        let c = reg.add(0, false, Box::new(Stub));
        let d = reg.add(5, false, Box::new(Stub));

        let ids: Vec<SourceId> = reg.order().iter().map(|&slot| reg.entry(slot).id).collect();
        assert_eq!(ids, vec![b, c, d, a]);
    }

    #[test]
    fn ids_are_unique_and_monotonic() {
        let mut reg = SourceRegistry::new();
        let a = reg.add(0, false, Box::new(Stub));
        let b = reg.add(0, false, Box::new(Stub));
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }

    #[test]
    fn remove_by_id_then_registry_is_empty() {
        let mut reg = SourceRegistry::new();
        let id = reg.add(0, false, Box::new(Stub));
        assert!(!reg.is_empty());

        assert!(reg.remove_by_id(id));
        assert!(reg.is_empty());
        assert!(reg.len() == 0);
    }

    #[test]
    fn remove_of_unknown_id_is_a_no_op() {
        let mut reg = SourceRegistry::new();
        let id = reg.add(0, false, Box::new(Stub));
        reg.remove_by_id(id);
        assert!(!reg.remove_by_id(id));
    }

    #[test]
    fn destroy_runs_exactly_once_on_removal() {
        let mut reg = SourceRegistry::new();
        let drops = Arc::new(AtomicUsize::new(0));
        let id = reg.add(0, false, Box::new(CountsDrops(drops.clone())));

        assert_eq!(drops.load(Ordering::SeqCst), 0);
        reg.remove_by_id(id);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destroy_is_deferred_while_a_reference_is_outstanding() {
        let mut reg = SourceRegistry::new();
        let drops = Arc::new(AtomicUsize::new(0));
        let id = reg.add(0, false, Box::new(CountsDrops(drops.clone())));

        let slot = *reg.order().first().unwrap();
        reg.add_ref(slot);

        reg.remove_by_id(id);
        assert_eq!(drops.load(Ordering::SeqCst), 0, "ref still outstanding");

        reg.unref(slot);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retire_unlinks_once_ref_drains_and_is_a_no_op_once_invalid() {
        let mut reg = SourceRegistry::new();
        let drops = Arc::new(AtomicUsize::new(0));
        reg.add(0, false, Box::new(CountsDrops(drops.clone())));

        let slot = *reg.order().first().unwrap();
        reg.add_ref(slot); // simulate a pending-dispatch reference

        reg.retire(slot);
        assert!(!reg.is_valid(slot));
        assert_eq!(drops.load(Ordering::SeqCst), 0, "pending ref still held");

        // A second `retire` call on an already-invalid slot (the
        // recursive-dispatch case, where more than one stack frame may
        // agree to remove the same source) must not release the
        // registry's reference a second time.
        reg.retire(slot);
        reg.unref(slot);
        assert_eq!(
            drops.load(Ordering::SeqCst),
            1,
            "destroy must run exactly once even with a redundant retire"
        );
    }
}
