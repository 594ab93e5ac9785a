//! Portable backend on `std::sync::Mutex` and `std::sync::Condvar`.
//!
//! The inner std mutexes are only held for a few instructions and never
//! across user code, so poisoning cannot leave them inconsistent and is
//! ignored.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::{Ticket, Tickets};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct RawMutex {
    locked: Mutex<bool>,
    released: Condvar,
}

impl RawMutex {
    pub(crate) fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) {
        let mut locked = lock(&self.locked);
        while *locked {
            locked = self
                .released
                .wait(locked)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
    }

    pub(crate) fn try_lock(&self) -> bool {
        let mut locked = lock(&self.locked);
        if *locked {
            return false;
        }
        *locked = true;
        true
    }

    pub(crate) fn try_lock_until(&self, deadline: Instant) -> bool {
        let mut locked = lock(&self.locked);
        while *locked {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .released
                .wait_timeout(locked, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            locked = guard;
        }
        *locked = true;
        true
    }

    pub(crate) fn unlock(&self) {
        *lock(&self.locked) = false;
        self.released.notify_one();
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
        lock(&self.tickets).register()
    }

    pub(crate) fn wait(&self, ticket: Ticket, deadline: Option<Instant>) -> bool {
        let mut tickets = lock(&self.tickets);
        loop {
            if tickets.take(ticket) {
                return true;
            }
            match deadline {
                None => {
                    tickets = self
                        .cond
                        .wait(tickets)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return tickets.abandon(ticket);
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(tickets, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    tickets = guard;
                }
            }
        }
    }

    pub(crate) fn abandon(&self, ticket: Ticket) -> bool {
        lock(&self.tickets).abandon(ticket)
    }

    // std's Condvar cannot target one thread, so every sleeper wakes and
    // rechecks its own ticket; only the signaled ones return.
    pub(crate) fn notify_one(&self) -> usize {
        let woken = lock(&self.tickets).notify_one();
        if woken > 0 {
            self.cond.notify_all();
        }
        woken
    }

    pub(crate) fn notify_all(&self) -> usize {
        let woken = lock(&self.tickets).notify_all();
        if woken > 0 {
            self.cond.notify_all();
        }
        woken
    }

    pub(crate) fn waiters(&self) -> usize {
        lock(&self.tickets).waiters()
    }
}
