//! The priority-sorted poll-record registry (`spec.md` §3 "Poll record",
//! §4.2).

use std::os::unix::io::RawFd;

use slab::Slab;

use crate::poll_driver::{Interest, PollFd};

/// A handle to a registered poll record, returned by `poll_add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollToken(pub(crate) usize);

struct PollRecord {
    priority: i32,
    fd: RawFd,
    interest: Interest,
    revents: Interest,
}

pub struct PollRegistry {
    slots: Slab<PollRecord>,
    order: Vec<usize>,
}

impl PollRegistry {
    pub fn new() -> PollRegistry {
        PollRegistry {
            slots: Slab::new(),
            order: Vec::new(),
        }
    }

    /// `spec.md` §4.2 `poll_add`: "insert into the priority-sorted list
    /// (new entry after equal-priority entries)".
    pub fn add(&mut self, priority: i32, fd: RawFd, interest: Interest) -> PollToken {
        let slot = self.slots.insert(PollRecord {
            priority,
            fd,
            interest,
            revents: Interest::empty(),
        });

        let pos = self
            .order
            .partition_point(|&s| self.slots[s].priority <= priority);
        self.order.insert(pos, slot);

        PollToken(slot)
    }

    /// `spec.md` §4.2 `poll_remove`: "unlink the record whose descriptor
    /// pointer matches; the record enters a free list." `Slab::remove`
    /// is our free list.
    pub fn remove(&mut self, token: PollToken) {
        if self.slots.contains(token.0) {
            self.slots.remove(token.0);
            if let Some(pos) = self.order.iter().position(|&s| s == token.0) {
                self.order.remove(pos);
            }
        }
    }

    /// Removes the first record whose fd matches, mirroring the literal
    /// `poll_remove(fd_ref)` contract for callers that never kept the
    /// token around.
    pub fn remove_by_fd(&mut self, fd: RawFd) -> bool {
        match self.order.iter().copied().find(|&s| self.slots[s].fd == fd) {
            Some(slot) => {
                self.remove(PollToken(slot));
                true
            }
            None => false,
        }
    }

    /// Descriptors with `priority <= ceiling` (or all, if `ceiling` is
    /// `None`), in the order the engine should submit them to the poll
    /// driver. Returns `(token, PollFd)` pairs so results can be copied
    /// back with `set_revents`.
    pub fn collect(&self, ceiling: Option<i32>) -> Vec<(PollToken, PollFd)> {
        self.order
            .iter()
            .copied()
            .filter(|&s| ceiling.map_or(true, |c| self.slots[s].priority <= c))
            .map(|s| {
                let rec = &self.slots[s];
                (PollToken(s), PollFd::new(rec.fd, rec.interest))
            })
            .collect()
    }

    pub fn set_revents(&mut self, token: PollToken, revents: Interest) {
        if let Some(rec) = self.slots.get_mut(token.0) {
            rec.revents = revents;
        }
    }

    pub fn revents(&self, fd: RawFd) -> Interest {
        self.order
            .iter()
            .copied()
            .find(|&s| self.slots[s].fd == fd)
            .map(|s| self.slots[s].revents)
            .unwrap_or(Interest::empty())
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
