//!
//! Periodic and delayed registrations.
//!
//! A single timer thread per running manager keeps registrations sorted by
//! their next deadline. It sleeps on the timer monitor until the earliest
//! one is due, hands every due registration to the queue, and reschedules
//! the repeating ones.
//!
//! ## Scheduling rules
//!
//! - the next deadline is the previous one plus the interval; if that is
//!   already in the past it becomes now plus the interval, so a stall never
//!   produces a burst of catch-up firings
//! - a registration has at most one firing waiting in the queue; a deadline
//!   that passes while one is still queued is counted as skipped
//! - a cancelled registration's queued firing is dropped when a worker
//!   dequeues it; a run already in progress is not interrupted
//! - `set_interval` takes effect from the next reschedule
//!

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use weft_core::{SyncError, TaskError};

use crate::manager::Shared;
use crate::runnable::Task;

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const FINISHED: u8 = 2;

fn to_nanos(interval: Duration) -> u64 {
    u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX)
}

pub(crate) struct PeriodicEntry {
    id: u64,
    task: Task,
    repeat: bool,
    interval_nanos: AtomicU64,
    pending: AtomicBool,
    cycles: AtomicU64,
    skipped: AtomicU64,
    state: AtomicU8,
}

impl PeriodicEntry {
    pub(crate) fn new(id: u64, task: Task, interval: Duration, repeat: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            task,
            repeat,
            interval_nanos: AtomicU64::new(to_nanos(interval)),
            pending: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            state: AtomicU8::new(ACTIVE),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_repeating(&self) -> bool {
        self.repeat
    }

    fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_nanos.load(Ordering::Relaxed))
    }

    /// Claims the single queue slot. `false` if a firing is already queued.
    pub(crate) fn try_mark_pending(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_pending(&self) {
        self.pending.store(false, Ordering::Release);
    }

    pub(crate) fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    fn cancel(&self) {
        let _ = self
            .state
            .compare_exchange(ACTIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Ends the registration without discarding a queued firing.
    pub(crate) fn finish(&self) {
        let _ = self
            .state
            .compare_exchange(ACTIVE, FINISHED, Ordering::AcqRel, Ordering::Acquire);
    }

    pub(crate) fn run(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.task.run();
    }
}

/// Caller's view of a periodic or delayed registration.
#[derive(Clone)]
pub struct PeriodicHandle {
    entry: Arc<PeriodicEntry>,
}

impl PeriodicHandle {
    pub(crate) fn new(entry: Arc<PeriodicEntry>) -> Self {
        Self { entry }
    }

    pub fn id(&self) -> u64 {
        self.entry.id
    }

    /// Number of times the task has been run for this registration.
    pub fn cycles(&self) -> u64 {
        self.entry.cycles.load(Ordering::Relaxed)
    }

    /// Deadlines that passed while a previous firing was still queued.
    pub fn skipped(&self) -> u64 {
        self.entry.skipped.load(Ordering::Relaxed)
    }

    pub fn interval(&self) -> Duration {
        self.entry.interval()
    }

    pub fn set_interval(&self, interval: Duration) -> Result<(), TaskError> {
        if interval.is_zero() {
            return Err(TaskError::InvalidInterval);
        }
        self.entry
            .interval_nanos
            .store(to_nanos(interval), Ordering::Relaxed);
        Ok(())
    }

    /// `false` once cancelled, finished (one-shot) or terminated by `stop`.
    pub fn is_active(&self) -> bool {
        self.entry.is_active()
    }
}

impl fmt::Debug for PeriodicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicHandle")
            .field("id", &self.id())
            .field("interval", &self.interval())
            .field("cycles", &self.cycles())
            .field("skipped", &self.skipped())
            .field("active", &self.is_active())
            .finish()
    }
}

struct Deadline {
    fire_at: Instant,
    entry: Arc<PeriodicEntry>,
}

#[derive(Default)]
pub(crate) struct TimerState {
    schedule: Vec<Deadline>,
    registrations: HashMap<u64, Arc<PeriodicEntry>>,
    shutdown: bool,
}

impl TimerState {
    pub(crate) fn register(&mut self, entry: Arc<PeriodicEntry>, first: Instant) {
        self.registrations.insert(entry.id, Arc::clone(&entry));
        self.insert(Deadline {
            fire_at: first,
            entry,
        });
    }

    fn insert(&mut self, deadline: Deadline) {
        let pos = self
            .schedule
            .partition_point(|d| d.fire_at <= deadline.fire_at);
        self.schedule.insert(pos, deadline);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.schedule.first().map(|d| d.fire_at)
    }

    /// Pops every deadline at or before `now` and reschedules repeating ones.
    fn take_due(&mut self, now: Instant) -> Vec<Arc<PeriodicEntry>> {
        let split = self.schedule.partition_point(|d| d.fire_at <= now);
        let due: Vec<Deadline> = self.schedule.drain(..split).collect();
        let mut fired = Vec::with_capacity(due.len());

        for Deadline { fire_at, entry } in due {
            if !entry.is_active() {
                self.registrations.remove(&entry.id);
                continue;
            }
            if entry.repeat {
                let interval = entry.interval();
                let mut next = fire_at + interval;
                if next <= now {
                    next = now + interval;
                }
                self.insert(Deadline {
                    fire_at: next,
                    entry: Arc::clone(&entry),
                });
            }
            fired.push(entry);
        }
        fired
    }

    pub(crate) fn cancel(&mut self, id: u64) -> Option<Arc<PeriodicEntry>> {
        let entry = self.registrations.remove(&id)?;
        entry.cancel();
        self.schedule.retain(|d| d.entry.id != id);
        Some(entry)
    }

    /// Drops a one-shot registration after it has run.
    pub(crate) fn forget(&mut self, id: u64) {
        self.registrations.remove(&id);
    }

    /// Ends every registration and tells the timer thread to exit.
    pub(crate) fn terminate(&mut self) -> usize {
        let count = self.registrations.len();
        for entry in self.registrations.values() {
            entry.finish();
        }
        self.registrations.clear();
        self.schedule.clear();
        self.shutdown = true;
        count
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown
    }

    pub(crate) fn reopen(&mut self) {
        self.shutdown = false;
    }

    pub(crate) fn len(&self) -> usize {
        self.registrations.len()
    }
}

/// Body of the timer thread.
pub(crate) fn run_timer(shared: &Shared) -> Result<(), SyncError> {
    loop {
        let due = {
            let mut timers = shared.timers.synchronized()?;
            loop {
                if timers.shutdown {
                    return Ok(());
                }
                match timers.next_deadline() {
                    None => timers.wait()?,
                    Some(at) if at > Instant::now() => {
                        timers.wait_until(at)?;
                    }
                    Some(_) => break,
                }
            }
            timers.take_due(Instant::now())
        };

        for entry in due {
            tracing::trace!(registration = entry.id, "timer firing");
            shared.enqueue_firing(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::task;

    fn entry(id: u64, interval_ms: u64, repeat: bool) -> Arc<PeriodicEntry> {
        PeriodicEntry::new(id, task(|| {}), Duration::from_millis(interval_ms), repeat)
    }

    #[test]
    fn test_take_due_reschedules_from_previous_deadline() {
        let base = Instant::now();
        let mut timers = TimerState::default();
        timers.register(entry(1, 10, true), base);

        let fired = timers.take_due(base + Duration::from_millis(3));
        assert_eq!(fired.len(), 1);
        assert_eq!(timers.next_deadline(), Some(base + Duration::from_millis(10)));
    }

    #[test]
    fn test_take_due_skips_backlog() {
        let base = Instant::now();
        let mut timers = TimerState::default();
        timers.register(entry(1, 10, true), base);

        let late = base + Duration::from_millis(55);
        let fired = timers.take_due(late);
        assert_eq!(fired.len(), 1);
        assert_eq!(timers.next_deadline(), Some(late + Duration::from_millis(10)));
    }

    #[test]
    fn test_one_shot_not_rescheduled() {
        let base = Instant::now();
        let mut timers = TimerState::default();
        timers.register(entry(7, 5, false), base);
        assert_eq!(timers.take_due(base).len(), 1);
        assert_eq!(timers.next_deadline(), None);
        assert_eq!(timers.len(), 1);
        timers.forget(7);
        assert_eq!(timers.len(), 0);
    }

    #[test]
    fn test_deadlines_stay_sorted() {
        let base = Instant::now();
        let mut timers = TimerState::default();
        timers.register(entry(1, 30, true), base + Duration::from_millis(30));
        timers.register(entry(2, 10, true), base + Duration::from_millis(10));
        timers.register(entry(3, 20, true), base + Duration::from_millis(20));

        let order: Vec<u64> = timers.schedule.iter().map(|d| d.entry.id).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_cancel_and_terminate() {
        let base = Instant::now();
        let mut timers = TimerState::default();
        let first = entry(1, 10, true);
        let second = entry(2, 10, true);
        timers.register(Arc::clone(&first), base);
        timers.register(Arc::clone(&second), base);

        assert!(timers.cancel(1).is_some());
        assert!(timers.cancel(1).is_none());
        assert!(first.is_cancelled());
        assert_eq!(timers.take_due(base).len(), 1);

        assert_eq!(timers.terminate(), 1);
        assert!(!second.is_active());
        assert!(!second.is_cancelled());
        assert!(timers.shutdown);
        timers.reopen();
        assert!(!timers.shutdown);
    }

    #[test]
    fn test_pending_slot_and_handle() {
        let e = entry(4, 10, true);
        assert!(e.try_mark_pending());
        assert!(!e.try_mark_pending());
        e.record_skip();
        e.clear_pending();
        assert!(e.try_mark_pending());

        let handle = PeriodicHandle::new(Arc::clone(&e));
        assert_eq!(handle.skipped(), 1);
        e.run();
        assert_eq!(handle.cycles(), 1);
        assert!(matches!(
            handle.set_interval(Duration::ZERO),
            Err(TaskError::InvalidInterval)
        ));
        handle.set_interval(Duration::from_millis(25)).unwrap();
        assert_eq!(handle.interval(), Duration::from_millis(25));
    }
}
