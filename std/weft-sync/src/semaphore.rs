//! Counting semaphore built on a `Monitor`.

use std::marker::PhantomData;
use std::time::Duration;

use weft_core::{BackendKind, SyncError};

use crate::condvar::WaitStatus;
use crate::default_backend;
use crate::monitor::Monitor;

#[derive(Debug)]
struct Permits {
    count: usize,
    waiting: usize,
    /// Waiters in `acquire_many`, which a single-permit wakeup may not satisfy.
    bulk_waiting: usize,
}

pub struct Semaphore {
    permits: Monitor<Permits>,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self::with_backend(initial, default_backend())
    }

    pub fn with_backend(initial: usize, backend: BackendKind) -> Self {
        Self {
            permits: Monitor::with_backend(
                Permits {
                    count: initial,
                    waiting: 0,
                    bulk_waiting: 0,
                },
                backend,
            ),
        }
    }

    pub fn acquire(&self) -> Result<(), SyncError> {
        let mut permits = self.permits.synchronized()?;
        permits.waiting += 1;
        let waited = permits.wait_while(|p| p.count == 0);
        permits.waiting -= 1;
        waited?;
        permits.count -= 1;
        Ok(())
    }

    pub fn try_acquire(&self) -> Result<bool, SyncError> {
        let mut permits = self.permits.synchronized()?;
        if permits.count == 0 {
            return Ok(false);
        }
        permits.count -= 1;
        Ok(true)
    }

    pub fn try_acquire_for(&self, timeout: Duration) -> Result<bool, SyncError> {
        let mut permits = self.permits.synchronized()?;
        permits.waiting += 1;
        let waited = permits.wait_timeout_while(timeout, |p| p.count == 0);
        permits.waiting -= 1;
        if waited? == WaitStatus::TimedOut {
            return Ok(false);
        }
        permits.count -= 1;
        Ok(true)
    }

    /// Takes `n` permits at once, waiting until all of them are available.
    pub fn acquire_many(&self, n: usize) -> Result<(), SyncError> {
        let mut permits = self.permits.synchronized()?;
        permits.waiting += 1;
        permits.bulk_waiting += 1;
        let waited = permits.wait_while(|p| p.count < n);
        permits.waiting -= 1;
        permits.bulk_waiting -= 1;
        waited?;
        permits.count -= n;
        Ok(())
    }

    pub fn release(&self) -> Result<(), SyncError> {
        self.release_many(1)
    }

    pub fn release_many(&self, n: usize) -> Result<(), SyncError> {
        let mut permits = self.permits.synchronized()?;
        permits.count = permits
            .count
            .checked_add(n)
            .ok_or(SyncError::PermitOverflow)?;
        if permits.waiting > 0 {
            if n == 1 && permits.bulk_waiting == 0 {
                permits.notify_one();
            } else {
                permits.notify_all();
            }
        }
        Ok(())
    }

    pub fn available(&self) -> Result<usize, SyncError> {
        Ok(self.permits.synchronized()?.count)
    }

    /// Acquires one permit, returned when the guard drops.
    pub fn permit(&self) -> Result<Permit<'_>, SyncError> {
        self.acquire()?;
        Ok(Permit {
            semaphore: self,
            _not_send: PhantomData,
        })
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("backend", &self.permits.backend())
            .finish_non_exhaustive()
    }
}

#[must_use = "dropping the permit releases it immediately"]
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
    _not_send: PhantomData<*const ()>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.semaphore.release() {
            tracing::error!(%err, "permit failed to release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fourth_acquire_blocks_until_release() {
        for backend in [BackendKind::Portable, BackendKind::Parking] {
            let sem = Arc::new(Semaphore::with_backend(3, backend));
            for _ in 0..3 {
                sem.acquire().unwrap();
            }
            assert_eq!(sem.available().unwrap(), 0);
            assert!(!sem.try_acquire().unwrap());

            let acquired = Arc::new(AtomicBool::new(false));
            let waiter = {
                let (sem, acquired) = (Arc::clone(&sem), Arc::clone(&acquired));
                thread::spawn(move || {
                    sem.acquire().unwrap();
                    acquired.store(true, Ordering::SeqCst);
                })
            };

            thread::sleep(Duration::from_millis(30));
            assert!(!acquired.load(Ordering::SeqCst));

            sem.release().unwrap();
            waiter.join().unwrap();
            assert!(acquired.load(Ordering::SeqCst));
            // 3 initial + 1 release - 4 acquires
            assert_eq!(sem.available().unwrap(), 0);
        }
    }

    #[test]
    fn test_releases_unblock_every_waiter() {
        for backend in [BackendKind::Portable, BackendKind::Parking] {
            let sem = Arc::new(Semaphore::with_backend(3, backend));
            for _ in 0..3 {
                sem.acquire().unwrap();
            }

            let woken = Arc::new(AtomicUsize::new(0));
            let waiters: Vec<_> = (0..2)
                .map(|_| {
                    let (sem, woken) = (Arc::clone(&sem), Arc::clone(&woken));
                    thread::spawn(move || {
                        sem.acquire().unwrap();
                        woken.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .collect();

            let deadline = Instant::now() + Duration::from_secs(5);
            while sem.permits.synchronized().unwrap().waiting < 2 {
                assert!(Instant::now() < deadline, "waiters never blocked");
                thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(woken.load(Ordering::SeqCst), 0);

            for _ in 0..4 {
                sem.release().unwrap();
            }
            for waiter in waiters {
                waiter.join().unwrap();
            }
            assert_eq!(woken.load(Ordering::SeqCst), 2);
            // 3 initial + 4 releases - 5 acquires
            assert_eq!(sem.available().unwrap(), 2);
        }
    }

    #[test]
    fn test_timed_acquire() {
        let sem = Semaphore::new(0);
        let start = Instant::now();
        assert!(!sem.try_acquire_for(Duration::from_millis(20)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(20));

        sem.release().unwrap();
        assert!(sem.try_acquire_for(Duration::from_millis(20)).unwrap());
        assert_eq!(sem.available().unwrap(), 0);
    }

    #[test]
    fn test_bulk_acquire_and_release() {
        let sem = Arc::new(Semaphore::new(1));
        let bulk = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire_many(3).unwrap())
        };

        thread::sleep(Duration::from_millis(10));
        sem.release().unwrap();
        sem.release().unwrap();
        bulk.join().unwrap();
        assert_eq!(sem.available().unwrap(), 0);

        sem.release_many(5).unwrap();
        assert_eq!(sem.available().unwrap(), 5);
    }

    #[test]
    fn test_permit_guard_limits_concurrency() {
        let sem = Arc::new(Semaphore::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let (sem, active, peak) = (Arc::clone(&sem), Arc::clone(&active), Arc::clone(&peak));
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _permit = sem.permit().unwrap();
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        active.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(sem.available().unwrap(), 2);
    }

    #[test]
    fn test_release_overflow() {
        let sem = Semaphore::new(usize::MAX);
        assert_eq!(sem.release().unwrap_err(), SyncError::PermitOverflow);
    }
}
