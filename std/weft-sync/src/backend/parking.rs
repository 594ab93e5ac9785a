//! Parking backend on `parking_lot`.

use std::time::Instant;

use parking_lot::lock_api::{RawMutex as _, RawMutexTimed as _};
use parking_lot::{Condvar, Mutex};

use super::{Ticket, Tickets};

pub(crate) struct RawMutex {
    raw: parking_lot::RawMutex,
}

impl RawMutex {
    pub(crate) fn new() -> Self {
        Self {
            raw: parking_lot::RawMutex::INIT,
        }
    }

    pub(crate) fn lock(&self) {
        self.raw.lock();
    }

    pub(crate) fn try_lock(&self) -> bool {
        self.raw.try_lock()
    }

    pub(crate) fn try_lock_until(&self, deadline: Instant) -> bool {
        self.raw.try_lock_until(deadline)
    }

    pub(crate) fn unlock(&self) {
        // SAFETY: every caller checks ownership through its owner field
        // before releasing, so the lock is held in this context.
        unsafe { self.raw.unlock() };
    }
}

pub(crate) struct WaitQueue {
    tickets: Mutex<Tickets>,
    cond: Condvar,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self {
            tickets: Mutex::new(Tickets::default()),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn register(&self) -> Ticket {
        self.tickets.lock().register()
    }

    pub(crate) fn wait(&self, ticket: Ticket, deadline: Option<Instant>) -> bool {
        let mut tickets = self.tickets.lock();
        loop {
            if tickets.take(ticket) {
                return true;
            }
            match deadline {
                None => self.cond.wait(&mut tickets),
                Some(deadline) => {
                    if self.cond.wait_until(&mut tickets, deadline).timed_out() {
                        return tickets.abandon(ticket);
                    }
                }
            }
        }
    }

    pub(crate) fn abandon(&self, ticket: Ticket) -> bool {
        self.tickets.lock().abandon(ticket)
    }

    pub(crate) fn notify_one(&self) -> usize {
        let woken = self.tickets.lock().notify_one();
        if woken > 0 {
            self.cond.notify_all();
        }
        woken
    }

    pub(crate) fn notify_all(&self) -> usize {
        let woken = self.tickets.lock().notify_all();
        if woken > 0 {
            self.cond.notify_all();
        }
        woken
    }

    pub(crate) fn waiters(&self) -> usize {
        self.tickets.lock().waiters()
    }
}
