//!
//! Lock Backends
//!
//! Every primitive in this crate is built from two raw pieces:
//!
//! - `RawMutex` - a bare exclusive lock with no notion of ownership
//! - `WaitQueue` - a ticketed queue of blocked threads
//!
//! Both come in a portable flavor (std `Mutex` + `Condvar`) and a parking
//! flavor (`parking_lot`). The flavor is chosen per primitive from a
//! `BackendKind`, so the public contracts in the rest of the crate never
//! branch on the platform.
//!
//! ## Wait tickets
//!
//! A waiter registers a ticket *before* it releases the user's lock, and a
//! notification moves tickets from `waiting` to `signaled`. A notify that
//! happens after the release therefore always finds the ticket, and a
//! notify issued while nobody is registered is simply lost.
//!

mod parking;
mod portable;

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use weft_core::BackendKind;

/// A registered wait, redeemed by `WaitQueue::wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Ticket(u64);

#[derive(Debug, Default)]
pub(crate) struct Tickets {
    next: u64,
    waiting: VecDeque<u64>,
    signaled: HashSet<u64>,
}

impl Tickets {
    fn register(&mut self) -> Ticket {
        self.next += 1;
        self.waiting.push_back(self.next);
        Ticket(self.next)
    }

    fn notify_one(&mut self) -> usize {
        match self.waiting.pop_front() {
            Some(ticket) => {
                self.signaled.insert(ticket);
                1
            }
            None => 0,
        }
    }

    fn notify_all(&mut self) -> usize {
        let woken = self.waiting.len();
        self.signaled.extend(self.waiting.drain(..));
        woken
    }

    fn take(&mut self, ticket: Ticket) -> bool {
        self.signaled.remove(&ticket.0)
    }

    /// Withdraws a ticket whose owner stopped waiting. Returns `true` if a
    /// notification had already been delivered to it.
    fn abandon(&mut self, ticket: Ticket) -> bool {
        if self.signaled.remove(&ticket.0) {
            return true;
        }
        if let Some(pos) = self.waiting.iter().position(|&t| t == ticket.0) {
            self.waiting.remove(pos);
        }
        false
    }

    fn waiters(&self) -> usize {
        self.waiting.len()
    }
}

pub(crate) enum RawMutex {
    Portable(portable::RawMutex),
    Parking(parking::RawMutex),
}

impl RawMutex {
    pub(crate) fn new(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Portable => RawMutex::Portable(portable::RawMutex::new()),
            BackendKind::Parking => RawMutex::Parking(parking::RawMutex::new()),
        }
    }

    pub(crate) fn kind(&self) -> BackendKind {
        match self {
            RawMutex::Portable(_) => BackendKind::Portable,
            RawMutex::Parking(_) => BackendKind::Parking,
        }
    }

    pub(crate) fn lock(&self) {
        match self {
            RawMutex::Portable(m) => m.lock(),
            RawMutex::Parking(m) => m.lock(),
        }
    }

    pub(crate) fn try_lock(&self) -> bool {
        match self {
            RawMutex::Portable(m) => m.try_lock(),
            RawMutex::Parking(m) => m.try_lock(),
        }
    }

    pub(crate) fn try_lock_until(&self, deadline: Instant) -> bool {
        match self {
            RawMutex::Portable(m) => m.try_lock_until(deadline),
            RawMutex::Parking(m) => m.try_lock_until(deadline),
        }
    }

    /// Releases the lock. Callers must have verified ownership first.
    pub(crate) fn unlock(&self) {
        match self {
            RawMutex::Portable(m) => m.unlock(),
            RawMutex::Parking(m) => m.unlock(),
        }
    }
}

pub(crate) enum WaitQueue {
    Portable(portable::WaitQueue),
    Parking(parking::WaitQueue),
}

impl WaitQueue {
    pub(crate) fn new(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Portable => WaitQueue::Portable(portable::WaitQueue::new()),
            BackendKind::Parking => WaitQueue::Parking(parking::WaitQueue::new()),
        }
    }

    pub(crate) fn kind(&self) -> BackendKind {
        match self {
            WaitQueue::Portable(_) => BackendKind::Portable,
            WaitQueue::Parking(_) => BackendKind::Parking,
        }
    }

    pub(crate) fn register(&self) -> Ticket {
        match self {
            WaitQueue::Portable(q) => q.register(),
            WaitQueue::Parking(q) => q.register(),
        }
    }

    /// Blocks until `ticket` is notified or `deadline` passes.
    /// Returns `true` when notified.
    pub(crate) fn wait(&self, ticket: Ticket, deadline: Option<Instant>) -> bool {
        match self {
            WaitQueue::Portable(q) => q.wait(ticket, deadline),
            WaitQueue::Parking(q) => q.wait(ticket, deadline),
        }
    }

    pub(crate) fn abandon(&self, ticket: Ticket) -> bool {
        match self {
            WaitQueue::Portable(q) => q.abandon(ticket),
            WaitQueue::Parking(q) => q.abandon(ticket),
        }
    }

    pub(crate) fn notify_one(&self) -> usize {
        match self {
            WaitQueue::Portable(q) => q.notify_one(),
            WaitQueue::Parking(q) => q.notify_one(),
        }
    }

    pub(crate) fn notify_all(&self) -> usize {
        match self {
            WaitQueue::Portable(q) => q.notify_all(),
            WaitQueue::Parking(q) => q.notify_all(),
        }
    }

    pub(crate) fn waiters(&self) -> usize {
        match self {
            WaitQueue::Portable(q) => q.waiters(),
            WaitQueue::Parking(q) => q.waiters(),
        }
    }
}
