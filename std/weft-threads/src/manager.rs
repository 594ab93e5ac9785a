//!
//! Task Manager
//!
//! A pool of worker threads fed from one prioritized queue, plus a timer
//! thread for periodic and delayed registrations.
//!
//! ## Lifecycle
//!
//! `Stopped -> Running -> Stopping -> Stopped`, and a stopped manager can be
//! started again. Work is only accepted while `Running`.
//!
//! ## Workers
//!
//! Each worker waits on the queue monitor while the queue is empty and the
//! manager is running, pops one job under the lock, releases the lock and
//! runs it. A panicking task is caught and counted; the worker carries on.
//! When the manager leaves `Running`, workers finish whatever is still
//! queued and exit.
//!
//! ## Shutdown
//!
//! `stop(true)` runs everything already queued before returning.
//! `stop(false)` discards queued work and reports how much. Either way all
//! periodic registrations end and every worker is joined.
//!

use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use weft_core::{
    BackendKind, Capabilities, PoolConfig, SyncError, TaskError, ThreadId, current_thread_id,
};
use weft_sync::{Monitor, Synchronized};

use crate::periodic::{PeriodicEntry, PeriodicHandle, TimerState, run_timer};
use crate::queue::{Job, JobQueue, Priority};
use crate::runnable::{Task, task};
use crate::thread::{Thread, ThreadBuilder, panic_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Stopped,
    Running,
    Stopping,
}

impl ManagerState {
    pub fn name(self) -> &'static str {
        match self {
            ManagerState::Stopped => "stopped",
            ManagerState::Running => "running",
            ManagerState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of `stop`. Counts cover the run since the last `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopReport {
    /// Queued jobs discarded by this stop.
    pub dropped: usize,
    pub executed: usize,
    pub failed: usize,
}

/// Point-in-time snapshot of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub state: ManagerState,
    pub workers: usize,
    pub idle: usize,
    pub executing: usize,
    pub queued: usize,
    pub submitted: usize,
    pub executed: usize,
    pub failed: usize,
    /// Jobs discarded by `clear` or a non-draining `stop`, plus delayed
    /// one-shots that found the queue full.
    pub dropped: usize,
    /// Firings of cancelled registrations dropped at dequeue.
    pub cancelled: usize,
    pub periodic: usize,
}

struct QueueState {
    status: ManagerState,
    jobs: JobQueue,
    workers: usize,
    idle: usize,
    executing: usize,
    retire: usize,
    worker_ids: HashSet<ThreadId>,
    submitted: usize,
    executed: usize,
    failed: usize,
    dropped: usize,
    cancelled: usize,
}

impl QueueState {
    fn new() -> Self {
        Self {
            status: ManagerState::Stopped,
            jobs: JobQueue::default(),
            workers: 0,
            idle: 0,
            executing: 0,
            retire: 0,
            worker_ids: HashSet::new(),
            submitted: 0,
            executed: 0,
            failed: 0,
            dropped: 0,
            cancelled: 0,
        }
    }

    fn reset_counters(&mut self) {
        self.submitted = 0;
        self.executed = 0;
        self.failed = 0;
        self.dropped = 0;
        self.cancelled = 0;
    }

    fn should_sleep(&self) -> bool {
        self.jobs.is_empty() && self.status == ManagerState::Running && self.retire == 0
    }
}

/// State shared by the manager, its workers and its timer thread.
pub(crate) struct Shared {
    queue: Monitor<QueueState>,
    pub(crate) timers: Monitor<TimerState>,
    max_queued: Option<usize>,
}

enum Outcome {
    Executed,
    Failed,
    Cancelled,
}

impl Shared {
    /// Queues a due firing unless its previous one is still waiting.
    pub(crate) fn enqueue_firing(&self, entry: Arc<PeriodicEntry>) {
        let discarded = match self.queue.synchronized() {
            Ok(mut queue) => self.offer_firing(&mut queue, &entry),
            Err(err) => {
                tracing::error!(%err, "timer could not lock the task queue");
                return;
            }
        };
        if discarded {
            match self.timers.synchronized() {
                Ok(mut timers) => timers.forget(entry.id()),
                Err(err) => tracing::error!(%err, "could not release one-shot registration"),
            }
        }
    }

    /// Returns `true` when a one-shot firing was dropped for good.
    fn offer_firing(
        &self,
        queue: &mut Synchronized<'_, QueueState>,
        entry: &Arc<PeriodicEntry>,
    ) -> bool {
        if queue.status != ManagerState::Running {
            return false;
        }
        if self.max_queued.is_some_and(|limit| queue.jobs.len() >= limit) {
            entry.record_skip();
            if entry.is_repeating() {
                tracing::warn!(registration = entry.id(), "queue full; periodic firing skipped");
                return false;
            }
            // A one-shot gets no later deadline to retry on.
            entry.finish();
            queue.dropped += 1;
            tracing::warn!(registration = entry.id(), "queue full; delayed task dropped");
            return true;
        }
        if !entry.try_mark_pending() {
            entry.record_skip();
            tracing::debug!(registration = entry.id(), "previous firing still queued; skipped");
            return false;
        }
        queue.jobs.push_back(Job::Firing(Arc::clone(entry)), Priority::Normal);
        queue.notify_one();
        false
    }

    fn execute(&self, job: Job) -> Outcome {
        match job {
            Job::Task(task) => run_guarded(|| task.run()),
            Job::Firing(entry) => {
                entry.clear_pending();
                if entry.is_cancelled() {
                    return Outcome::Cancelled;
                }
                let outcome = run_guarded(|| entry.run());
                if !entry.is_repeating() {
                    entry.finish();
                    match self.timers.synchronized() {
                        Ok(mut timers) => timers.forget(entry.id()),
                        Err(err) => tracing::error!(%err, "could not release one-shot registration"),
                    }
                }
                outcome
            }
        }
    }
}

fn run_guarded(body: impl FnOnce()) -> Outcome {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(()) => Outcome::Executed,
        Err(payload) => {
            tracing::error!(
                worker = %current_thread_id(),
                panic = %panic_message(payload.as_ref()),
                "task panicked"
            );
            Outcome::Failed
        }
    }
}

fn worker_loop(shared: &Shared) -> Result<(), SyncError> {
    let me = current_thread_id();
    shared.queue.synchronized()?.worker_ids.insert(me);
    tracing::debug!(worker = %me, "worker started");

    loop {
        let job = {
            let mut queue = shared.queue.synchronized()?;
            queue.idle += 1;
            let waited = queue.wait_while(|q| q.should_sleep());
            queue.idle -= 1;
            waited?;

            let job = if queue.retire > 0 {
                queue.retire -= 1;
                None
            } else {
                queue.jobs.pop()
            };
            match job {
                Some(job) => {
                    queue.executing += 1;
                    job
                }
                None => {
                    queue.workers -= 1;
                    queue.worker_ids.remove(&me);
                    tracing::debug!(worker = %me, "worker exiting");
                    return Ok(());
                }
            }
        };

        let outcome = shared.execute(job);

        let mut queue = shared.queue.synchronized()?;
        queue.executing -= 1;
        match outcome {
            Outcome::Executed => queue.executed += 1,
            Outcome::Failed => queue.failed += 1,
            Outcome::Cancelled => queue.cancelled += 1,
        }
    }
}

pub struct TaskManager {
    config: PoolConfig,
    caps: Capabilities,
    backend: BackendKind,
    shared: Arc<Shared>,
    workers: Mutex<Vec<Thread>>,
    timer: Mutex<Option<Thread>>,
    next_worker: AtomicUsize,
    next_registration: AtomicU64,
}

impl TaskManager {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_capabilities(config, Capabilities::detect())
    }

    pub fn with_capabilities(config: PoolConfig, caps: Capabilities) -> Self {
        let backend = config.resolved_backend(&caps);
        let shared = Arc::new(Shared {
            queue: Monitor::with_backend(QueueState::new(), backend),
            timers: Monitor::with_backend(TimerState::default(), backend),
            max_queued: config.max_queued,
        });
        Self {
            config,
            caps,
            backend,
            shared,
            workers: Mutex::new(Vec::new()),
            timer: Mutex::new(None),
            next_worker: AtomicUsize::new(0),
            next_registration: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Starts with the configured worker count (CPU count if unset).
    pub fn start(&self) -> Result<(), TaskError> {
        self.start_with(self.config.resolved_workers())
    }

    pub fn start_with(&self, workers: usize) -> Result<(), TaskError> {
        if workers == 0 {
            return Err(TaskError::InvalidWorkerCount);
        }
        {
            let mut queue = self.shared.queue.synchronized()?;
            if queue.status != ManagerState::Stopped {
                return Err(TaskError::InvalidState {
                    expected: ManagerState::Stopped.name(),
                    found: queue.status.name(),
                });
            }
            queue.status = ManagerState::Running;
            queue.reset_counters();
            self.shared.timers.synchronized()?.reopen();
        }

        if let Err(err) = self.spawn_timer().and_then(|()| self.spawn_workers(workers)) {
            tracing::error!(%err, "task manager failed to start; rolling back");
            // A concurrent `stop` that already closed the queue owns the cleanup.
            if let Err(rollback) = self.stop(true) {
                tracing::error!(%rollback, "rollback failed");
            }
            return Err(err);
        }

        tracing::info!(workers, backend = %self.backend, "task manager started");
        Ok(())
    }

    pub fn submit(&self, task: Task) -> Result<(), TaskError> {
        self.enqueue(|jobs, job| jobs.push_back(job, Priority::Normal), task)
    }

    pub fn submit_with_priority(&self, task: Task, priority: Priority) -> Result<(), TaskError> {
        self.enqueue(|jobs, job| jobs.push_back(job, priority), task)
    }

    /// Queues `task` ahead of everything already waiting.
    pub fn submit_front(&self, task: Task) -> Result<(), TaskError> {
        self.enqueue(|jobs, job| jobs.push_front(job), task)
    }

    fn enqueue(&self, push: impl FnOnce(&mut JobQueue, Job), task: Task) -> Result<(), TaskError> {
        let mut queue = self.shared.queue.synchronized()?;
        if queue.status != ManagerState::Running {
            return Err(TaskError::Rejected {
                state: queue.status.name(),
            });
        }
        if let Some(limit) = self.shared.max_queued {
            if queue.jobs.len() >= limit {
                return Err(TaskError::QueueFull { limit });
            }
        }
        push(&mut queue.jobs, Job::Task(task));
        queue.submitted += 1;
        queue.notify_one();
        Ok(())
    }

    /// Runs `task` every `interval` until cancelled or the manager stops.
    pub fn schedule_periodic(
        &self,
        task: Task,
        interval: Duration,
    ) -> Result<PeriodicHandle, TaskError> {
        if interval.is_zero() {
            return Err(TaskError::InvalidInterval);
        }
        self.register(task, interval, true)
    }

    /// Runs `task` once, no earlier than `delay` from now.
    pub fn schedule_once(&self, task: Task, delay: Duration) -> Result<PeriodicHandle, TaskError> {
        self.register(task, delay, false)
    }

    fn register(
        &self,
        task: Task,
        interval: Duration,
        repeat: bool,
    ) -> Result<PeriodicHandle, TaskError> {
        let state = self.state()?;
        if state != ManagerState::Running {
            return Err(TaskError::Rejected { state: state.name() });
        }

        let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
        let entry = PeriodicEntry::new(id, task, interval, repeat);
        let mut timers = self.shared.timers.synchronized()?;
        if timers.is_shut_down() {
            return Err(TaskError::Rejected {
                state: ManagerState::Stopping.name(),
            });
        }
        timers.register(Arc::clone(&entry), Instant::now() + interval);
        timers.notify_all();
        tracing::debug!(registration = id, ?interval, repeat, "registration added");
        Ok(PeriodicHandle::new(entry))
    }

    pub fn cancel(&self, handle: &PeriodicHandle) -> Result<(), TaskError> {
        self.cancel_id(handle.id())
    }

    pub fn cancel_id(&self, id: u64) -> Result<(), TaskError> {
        let mut timers = self.shared.timers.synchronized()?;
        match timers.cancel(id) {
            Some(_) => {
                timers.notify_all();
                tracing::debug!(registration = id, "registration cancelled");
                Ok(())
            }
            None => Err(TaskError::NotFound { id }),
        }
    }

    /// Stops the manager. With `drain`, queued work runs first; without it,
    /// queued work is discarded and counted in the report.
    pub fn stop(&self, drain: bool) -> Result<StopReport, TaskError> {
        let me = current_thread_id();
        let dropped = {
            let mut queue = self.shared.queue.synchronized()?;
            if queue.worker_ids.contains(&me) {
                return Err(TaskError::StopFromWorker { caller: me });
            }
            if queue.status != ManagerState::Running {
                return Err(TaskError::InvalidState {
                    expected: ManagerState::Running.name(),
                    found: queue.status.name(),
                });
            }
            close_queue(&mut queue, drain)
        };
        self.end_registrations()?;
        self.finish_shutdown(dropped)
    }

    /// Joins the timer and every worker, then marks the manager stopped.
    fn finish_shutdown(&self, dropped: usize) -> Result<StopReport, TaskError> {
        if let Some(timer) = self.timer.lock().take() {
            join_logged(timer);
        }
        let workers: Vec<Thread> = self.workers.lock().drain(..).collect();
        for worker in workers {
            join_logged(worker);
        }

        let mut queue = self.shared.queue.synchronized()?;
        // Anything queued after the workers left cannot run.
        let leftover = queue.jobs.clear();
        queue.dropped += leftover;
        queue.status = ManagerState::Stopped;
        let report = StopReport {
            dropped: dropped + leftover,
            executed: queue.executed,
            failed: queue.failed,
        };
        tracing::info!(
            executed = report.executed,
            failed = report.failed,
            dropped = report.dropped,
            "task manager stopped"
        );
        Ok(report)
    }

    /// Closes the queue and ends every registration without joining
    /// anything. Used when dropped on one of the manager's own workers.
    fn signal_shutdown(&self, drain: bool) -> Result<(), TaskError> {
        close_queue(&mut self.shared.queue.synchronized()?, drain);
        self.end_registrations()
    }

    fn end_registrations(&self) -> Result<(), TaskError> {
        let mut timers = self.shared.timers.synchronized()?;
        let terminated = timers.terminate();
        timers.notify_all();
        if terminated > 0 {
            tracing::debug!(terminated, "periodic registrations terminated");
        }
        Ok(())
    }

    /// Discards all queued work. Returns how many jobs were dropped.
    pub fn clear(&self) -> Result<usize, TaskError> {
        let mut queue = self.shared.queue.synchronized()?;
        let dropped = queue.jobs.clear();
        queue.dropped += dropped;
        Ok(dropped)
    }

    pub fn add_workers(&self, count: usize) -> Result<(), TaskError> {
        if count == 0 {
            return Err(TaskError::InvalidWorkerCount);
        }
        self.spawn_workers(count)?;
        tracing::info!(added = count, "workers added");
        Ok(())
    }

    /// Asks `count` workers to exit once they are idle. At least one worker
    /// always remains.
    pub fn remove_workers(&self, count: usize) -> Result<(), TaskError> {
        let mut queue = self.shared.queue.synchronized()?;
        if queue.status != ManagerState::Running {
            return Err(TaskError::InvalidState {
                expected: ManagerState::Running.name(),
                found: queue.status.name(),
            });
        }
        if count == 0 || queue.retire + count >= queue.workers {
            return Err(TaskError::InvalidWorkerCount);
        }
        queue.retire += count;
        queue.notify_all();
        tracing::info!(retiring = count, "workers retiring");
        Ok(())
    }

    pub fn state(&self) -> Result<ManagerState, TaskError> {
        Ok(self.shared.queue.synchronized()?.status)
    }

    pub fn queued(&self) -> Result<usize, TaskError> {
        Ok(self.shared.queue.synchronized()?.jobs.len())
    }

    pub fn worker_count(&self) -> Result<usize, TaskError> {
        Ok(self.shared.queue.synchronized()?.workers)
    }

    pub fn idle_workers(&self) -> Result<usize, TaskError> {
        Ok(self.shared.queue.synchronized()?.idle)
    }

    pub fn stats(&self) -> Result<PoolStats, TaskError> {
        let periodic = self.shared.timers.synchronized()?.len();
        let queue = self.shared.queue.synchronized()?;
        Ok(PoolStats {
            state: queue.status,
            workers: queue.workers,
            idle: queue.idle,
            executing: queue.executing,
            queued: queue.jobs.len(),
            submitted: queue.submitted,
            executed: queue.executed,
            failed: queue.failed,
            dropped: queue.dropped,
            cancelled: queue.cancelled,
            periodic,
        })
    }

    fn builder(&self, name: String) -> ThreadBuilder {
        let mut builder = ThreadBuilder::new().name(name).capabilities(self.caps);
        if let Some(bytes) = self.config.stack_size {
            builder = builder.stack_size(bytes);
        }
        builder
    }

    /// Spawns `count` workers. Fails with `InvalidState` once the manager
    /// has left `Running`, so a concurrent `stop` never misses a handle.
    fn spawn_workers(&self, count: usize) -> Result<(), TaskError> {
        let mut handles = self.workers.lock();
        reap_finished(&mut handles);
        for _ in 0..count {
            let index = self.next_worker.fetch_add(1, Ordering::Relaxed);
            let name = format!("{}-{}", self.config.thread_name, index);
            let shared = Arc::clone(&self.shared);

            {
                let mut queue = self.shared.queue.synchronized()?;
                if queue.status != ManagerState::Running {
                    return Err(TaskError::InvalidState {
                        expected: ManagerState::Running.name(),
                        found: queue.status.name(),
                    });
                }
                queue.workers += 1;
            }
            let spawned = self.builder(name).spawn(task(move || {
                if let Err(err) = worker_loop(&shared) {
                    tracing::error!(%err, "worker stopped on a lock error");
                }
            }));
            match spawned {
                Ok(thread) => handles.push(thread),
                Err(err) => {
                    self.shared.queue.synchronized()?.workers -= 1;
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    fn spawn_timer(&self) -> Result<(), TaskError> {
        let shared = Arc::clone(&self.shared);
        let name = format!("{}-timer", self.config.thread_name);
        let thread = self.builder(name).spawn(task(move || {
            if let Err(err) = run_timer(&shared) {
                tracing::error!(%err, "timer stopped on a lock error");
            }
        }))?;
        *self.timer.lock() = Some(thread);
        Ok(())
    }
}

/// Moves to `Stopping` and wakes every worker. Returns how many queued jobs
/// were discarded.
fn close_queue(queue: &mut Synchronized<'_, QueueState>, drain: bool) -> usize {
    queue.status = ManagerState::Stopping;
    let dropped = if drain { 0 } else { queue.jobs.clear() };
    queue.dropped += dropped;
    queue.retire = 0;
    queue.notify_all();
    tracing::info!(drain, dropped, "task manager stopping");
    dropped
}

/// Joins the handles of workers that already exited after retiring.
fn reap_finished(handles: &mut Vec<Thread>) {
    let (finished, running): (Vec<Thread>, Vec<Thread>) =
        handles.drain(..).partition(|thread| thread.is_finished());
    *handles = running;
    finished.into_iter().for_each(join_logged);
}

fn join_logged(thread: Thread) {
    let id = thread.id();
    if let Err(err) = thread.join() {
        tracing::warn!(thread = %id, %err, "thread ended abnormally");
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        if !matches!(self.state(), Ok(ManagerState::Running)) {
            return;
        }
        match self.stop(self.config.drain_on_drop) {
            Ok(_) => {}
            Err(TaskError::StopFromWorker { caller }) => {
                // A worker cannot join itself; let the threads wind down detached.
                tracing::warn!(worker = %caller, "task manager dropped on its own worker");
                if let Err(err) = self.signal_shutdown(self.config.drain_on_drop) {
                    tracing::error!(%err, "task manager could not stop on drop");
                }
                if let Some(timer) = self.timer.lock().take() {
                    timer.detach();
                }
                self.workers.lock().drain(..).for_each(Thread::detach);
            }
            Err(err) => tracing::error!(%err, "task manager could not stop on drop"),
        }
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("backend", &self.backend)
            .field("state", &self.state().ok())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use std::thread as std_thread;
    use weft_sync::{Event, EventMode};

    fn manager(workers: usize) -> TaskManager {
        let manager = TaskManager::new(PoolConfig::default().with_workers(workers));
        manager.start().unwrap();
        manager
    }

    fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std_thread::sleep(Duration::from_millis(2));
        }
    }

    /// Occupies the single worker until the returned event is signaled.
    fn block_worker(manager: &TaskManager) -> Arc<Event> {
        let gate = Arc::new(Event::new(EventMode::ManualReset, false));
        let started = Arc::new(Event::new(EventMode::ManualReset, false));
        let (g, s) = (Arc::clone(&gate), Arc::clone(&started));
        manager
            .submit(task(move || {
                s.signal().unwrap();
                g.wait().unwrap();
            }))
            .unwrap();
        started.wait().unwrap();
        gate
    }

    #[test]
    fn test_lifecycle_states() {
        let manager = TaskManager::new(PoolConfig::default().with_workers(2));
        assert_eq!(manager.state().unwrap(), ManagerState::Stopped);
        assert!(matches!(
            manager.stop(true),
            Err(TaskError::InvalidState { .. })
        ));

        manager.start().unwrap();
        assert_eq!(manager.state().unwrap(), ManagerState::Running);
        assert_eq!(manager.worker_count().unwrap(), 2);
        assert!(matches!(
            manager.start_with(1),
            Err(TaskError::InvalidState { found: "running", .. })
        ));

        manager.stop(true).unwrap();
        assert_eq!(manager.state().unwrap(), ManagerState::Stopped);
        assert_eq!(manager.worker_count().unwrap(), 0);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let manager = TaskManager::new(PoolConfig::default());
        assert!(matches!(
            manager.start_with(0),
            Err(TaskError::InvalidWorkerCount)
        ));
        assert_eq!(manager.state().unwrap(), ManagerState::Stopped);
    }

    #[test]
    fn test_submit_rejected_when_stopped() {
        let manager = TaskManager::new(PoolConfig::default());
        let err = manager.submit(task(|| {})).unwrap_err();
        assert!(matches!(err, TaskError::Rejected { state: "stopped" }));
        assert!(matches!(
            manager.schedule_periodic(task(|| {}), Duration::from_millis(10)),
            Err(TaskError::Rejected { .. })
        ));
    }

    #[test]
    fn test_drain_executes_everything() {
        let manager = manager(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            manager
                .submit(task(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        let report = manager.stop(true).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(report.executed, 100);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_stop_without_drain_discards_queue() {
        let manager = manager(1);
        let gate = block_worker(&manager);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let ran = Arc::clone(&ran);
            manager
                .submit(task(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        assert_eq!(manager.queued().unwrap(), 10);

        let opener = {
            let gate = Arc::clone(&gate);
            std_thread::spawn(move || {
                std_thread::sleep(Duration::from_millis(30));
                gate.signal().unwrap();
            })
        };
        let report = manager.stop(false).unwrap();
        opener.join().unwrap();

        assert_eq!(report.dropped, 10);
        assert_eq!(report.executed, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let manager = manager(1);
        let ran = Arc::new(AtomicUsize::new(0));
        manager.submit(task(|| panic!("task failure"))).unwrap();
        let after = Arc::clone(&ran);
        manager
            .submit(task(move || {
                after.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let report = manager.stop(true).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_from_worker_rejected() {
        let manager = Arc::new(manager(2));
        let (tx, rx) = std::sync::mpsc::channel();
        let inner = Arc::clone(&manager);
        manager
            .submit(task(move || {
                let result = inner.stop(true);
                tx.send(matches!(result, Err(TaskError::StopFromWorker { .. })))
                    .unwrap();
            }))
            .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        manager.stop(true).unwrap();
    }

    #[test]
    fn test_priority_and_front_ordering() {
        let manager = manager(1);
        let gate = block_worker(&manager);
        let order = Arc::new(StdMutex::new(Vec::new()));

        let record = |label: &'static str| {
            let order = Arc::clone(&order);
            task(move || order.lock().unwrap().push(label))
        };
        manager.submit_with_priority(record("low"), Priority::Low).unwrap();
        manager.submit(record("normal-1")).unwrap();
        manager.submit(record("normal-2")).unwrap();
        manager.submit_with_priority(record("high"), Priority::High).unwrap();
        manager.submit_front(record("front")).unwrap();

        gate.signal().unwrap();
        manager.stop(true).unwrap();
        assert_eq!(
            *order.lock().unwrap(),
            vec!["front", "high", "normal-1", "normal-2", "low"]
        );
    }

    #[test]
    fn test_queue_limit() {
        let mut config = PoolConfig::default().with_workers(1);
        config.max_queued = Some(2);
        let manager = TaskManager::new(config);
        manager.start().unwrap();
        let gate = block_worker(&manager);

        manager.submit(task(|| {})).unwrap();
        manager.submit(task(|| {})).unwrap();
        assert!(matches!(
            manager.submit(task(|| {})),
            Err(TaskError::QueueFull { limit: 2 })
        ));

        assert_eq!(manager.clear().unwrap(), 2);
        manager.submit(task(|| {})).unwrap();
        gate.signal().unwrap();
        let report = manager.stop(true).unwrap();
        assert_eq!(report.executed, 2);
        assert_eq!(manager.stats().unwrap().dropped, 2);
    }

    #[test]
    fn test_one_shot_dropped_when_queue_full() {
        let mut config = PoolConfig::default().with_workers(1);
        config.max_queued = Some(1);
        let manager = TaskManager::new(config);
        manager.start().unwrap();
        let gate = block_worker(&manager);
        manager.submit(task(|| {})).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        let handle = manager
            .schedule_once(
                task(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::from_millis(10),
            )
            .unwrap();

        eventually(|| manager.stats().unwrap().periodic == 0);
        assert!(!handle.is_active());
        assert_eq!(handle.skipped(), 1);
        assert_eq!(manager.stats().unwrap().dropped, 1);
        assert!(matches!(
            manager.cancel(&handle),
            Err(TaskError::NotFound { .. })
        ));

        gate.signal().unwrap();
        let report = manager.stop(true).unwrap();
        assert_eq!(report.executed, 2);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(handle.cycles(), 0);
    }

    #[test]
    fn test_concurrent_stops_have_one_winner() {
        for _ in 0..20 {
            let manager = Arc::new(manager(2));
            let start = Arc::new(std::sync::Barrier::new(4));
            let callers: Vec<_> = (0..4)
                .map(|_| {
                    let (manager, start) = (Arc::clone(&manager), Arc::clone(&start));
                    std_thread::spawn(move || {
                        start.wait();
                        manager.stop(true)
                    })
                })
                .collect();

            let results: Vec<_> = callers.into_iter().map(|c| c.join().unwrap()).collect();
            let winners = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(winners, 1);
            assert!(
                results
                    .iter()
                    .filter_map(|r| r.as_ref().err())
                    .all(|err| matches!(err, TaskError::InvalidState { .. }))
            );
            assert_eq!(manager.state().unwrap(), ManagerState::Stopped);
            assert_eq!(manager.worker_count().unwrap(), 0);

            manager.start_with(1).unwrap();
            manager.stop(true).unwrap();
        }
    }

    #[test]
    fn test_retired_worker_handles_are_reaped() {
        let manager = manager(1);
        for _ in 0..5 {
            manager.add_workers(2).unwrap();
            manager.remove_workers(2).unwrap();
            eventually(|| manager.worker_count().unwrap() == 1);
        }
        // Only the last live worker may still be running.
        eventually(|| {
            let handles = manager.workers.lock();
            handles.iter().filter(|thread| thread.is_finished()).count() + 1 == handles.len()
        });

        manager.add_workers(1).unwrap();
        assert_eq!(manager.workers.lock().len(), 2);
        assert_eq!(manager.worker_count().unwrap(), 2);
        manager.stop(true).unwrap();
    }

    #[test]
    fn test_add_and_remove_workers() {
        let manager = manager(1);
        manager.add_workers(3).unwrap();
        assert_eq!(manager.worker_count().unwrap(), 4);
        eventually(|| manager.idle_workers().unwrap() == 4);

        manager.remove_workers(2).unwrap();
        eventually(|| manager.worker_count().unwrap() == 2);
        assert!(matches!(
            manager.remove_workers(2),
            Err(TaskError::InvalidWorkerCount)
        ));
        assert!(matches!(
            manager.add_workers(0),
            Err(TaskError::InvalidWorkerCount)
        ));

        manager.stop(true).unwrap();
        assert!(matches!(
            manager.add_workers(1),
            Err(TaskError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_restart_after_stop() {
        let manager = manager(2);
        manager.stop(true).unwrap();

        manager.start_with(1).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        manager
            .submit(task(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        let report = manager.stop(true).unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_rolls_back_without_threads() {
        let manager = TaskManager::with_capabilities(
            PoolConfig::default().with_workers(2),
            Capabilities::minimal(),
        );
        let err = manager.start().unwrap_err();
        assert!(matches!(err, TaskError::Thread(weft_core::ThreadError::Unsupported)));
        assert_eq!(manager.state().unwrap(), ManagerState::Stopped);
        assert_eq!(manager.worker_count().unwrap(), 0);
    }

    #[test]
    fn test_stats_snapshot() {
        let manager = manager(1);
        let gate = block_worker(&manager);
        manager.submit(task(|| {})).unwrap();

        let stats = manager.stats().unwrap();
        assert_eq!(stats.state, ManagerState::Running);
        assert_eq!(stats.workers, 1);
        assert_eq!(stats.executing, 1);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.submitted, 2);

        gate.signal().unwrap();
        manager.stop(true).unwrap();
    }

    #[test]
    fn test_drop_drains_by_default() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let manager = manager(2);
            for _ in 0..20 {
                let counter = Arc::clone(&counter);
                manager
                    .submit(task(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }))
                    .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
