//!
//! Stress scenarios.
//!
//! Every scenario hammers one primitive (or the task manager) from several
//! threads and checks an invariant that a broken implementation would
//! violate under contention: lost updates, overlapping writers, more
//! holders than permits, barrier rounds bleeding into each other, dropped
//! tasks or missed periodic firings.
//!

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use weft_core::{BackendKind, PoolConfig, SyncError, TaskError, ThreadError};
use weft_sync::{
    Barrier, Lockable, Monitor, Mutex, RecursiveMutex, RwMutex, Semaphore, SpinLock, lock_guard,
};
use weft_threads::{Priority, TaskManager, ThreadBuilder, task, yield_now};

#[derive(Debug, Error)]
pub enum StressError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Thread(#[from] ThreadError),

    #[error("{0}")]
    Violation(String),
}

fn violation(message: impl Into<String>) -> StressError {
    StressError::Violation(message.into())
}

/// Resolved run parameters shared by every scenario.
#[derive(Debug, Clone)]
pub struct Settings {
    pub threads: usize,
    pub iterations: usize,
    pub backend: BackendKind,
    pub config: PoolConfig,
}

/// Which lock the mutex scenario exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFlavor {
    Default,
    Adaptive,
    Recursive,
    Spin,
}

impl LockFlavor {
    pub fn name(self) -> &'static str {
        match self {
            LockFlavor::Default => "mutex",
            LockFlavor::Adaptive => "adaptive mutex",
            LockFlavor::Recursive => "recursive mutex",
            LockFlavor::Spin => "spinlock",
        }
    }

    fn build(self, settings: &Settings) -> Arc<dyn Lockable + Send + Sync> {
        match self {
            LockFlavor::Default => Arc::new(Mutex::with_backend(settings.backend)),
            LockFlavor::Adaptive => Arc::new(Mutex::adaptive_with(
                settings.backend,
                settings.config.spin_limit,
            )),
            LockFlavor::Recursive => Arc::new(RecursiveMutex::with_backend(settings.backend)),
            LockFlavor::Spin => Arc::new(SpinLock::new()),
        }
    }
}

/// Runs `body(index)` on `settings.threads` threads and collects failures.
fn run_threads<F>(settings: &Settings, label: &str, body: F) -> Result<(), StressError>
where
    F: Fn(usize) -> Result<(), StressError> + Send + Sync + 'static,
{
    let body = Arc::new(body);
    let failures = Arc::new(Monitor::with_backend(Vec::<String>::new(), settings.backend));

    let mut threads = Vec::with_capacity(settings.threads);
    for index in 0..settings.threads {
        let (body, failures) = (Arc::clone(&body), Arc::clone(&failures));
        let thread = ThreadBuilder::new()
            .name(format!("{label}-{index}"))
            .spawn(task(move || {
                if let Err(err) = body(index) {
                    tracing::warn!(index, error = %err, "stress thread failed");
                    if let Ok(mut list) = failures.synchronized() {
                        list.push(err.to_string());
                    }
                }
            }))?;
        threads.push(thread);
    }
    for thread in threads {
        thread.join()?;
    }

    let failures = failures.synchronized()?;
    match failures.first() {
        Some(first) => Err(violation(format!(
            "{} thread(s) failed, first: {first}",
            failures.len()
        ))),
        None => Ok(()),
    }
}

/// Unsynchronized read-modify-write; only correct under mutual exclusion.
fn bump(value: &AtomicUsize) {
    let current = value.load(Ordering::Relaxed);
    value.store(current + 1, Ordering::Relaxed);
}

pub fn mutex(settings: &Settings, flavor: LockFlavor) -> Result<String, StressError> {
    let lock = flavor.build(settings);
    let counter = Arc::new(AtomicUsize::new(0));
    let inside = Arc::new(AtomicUsize::new(0));
    let iterations = settings.iterations;

    let started = Instant::now();
    {
        let (lock, counter, inside) = (Arc::clone(&lock), Arc::clone(&counter), Arc::clone(&inside));
        run_threads(settings, "stress-mutex", move |_| {
            for i in 0..iterations {
                let _guard = lock_guard(&*lock)?;
                let _nested = (flavor == LockFlavor::Recursive && i % 4 == 0)
                    .then(|| lock_guard(&*lock))
                    .transpose()?;
                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                    return Err(violation("two threads inside the critical section"));
                }
                bump(&counter);
                inside.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        })?;
    }

    let expected = settings.threads * iterations;
    let total = counter.load(Ordering::SeqCst);
    if total != expected {
        return Err(violation(format!("counter is {total}, expected {expected}")));
    }
    Ok(format!(
        "{}: {expected} increments over {} threads in {:?}",
        flavor.name(),
        settings.threads,
        started.elapsed()
    ))
}

pub fn rwlock(settings: &Settings) -> Result<String, StressError> {
    let lock = Arc::new(RwMutex::with_backend(
        settings.backend,
        settings.config.rw_policy,
    ));
    let readers = Arc::new(AtomicUsize::new(0));
    let writing = Arc::new(AtomicBool::new(false));
    let writes = Arc::new(AtomicUsize::new(0));
    let iterations = settings.iterations;

    let started = Instant::now();
    {
        let (lock, readers, writing, writes) = (
            Arc::clone(&lock),
            Arc::clone(&readers),
            Arc::clone(&writing),
            Arc::clone(&writes),
        );
        run_threads(settings, "stress-rw", move |index| {
            for i in 0..iterations {
                if (i + index) % 8 == 0 {
                    let _guard = lock.write()?;
                    if writing.swap(true, Ordering::SeqCst) {
                        return Err(violation("two writers inside"));
                    }
                    if readers.load(Ordering::SeqCst) != 0 {
                        return Err(violation("writer admitted while readers hold the lock"));
                    }
                    bump(&writes);
                    writing.store(false, Ordering::SeqCst);
                } else {
                    let _guard = lock.read()?;
                    readers.fetch_add(1, Ordering::SeqCst);
                    if writing.load(Ordering::SeqCst) {
                        return Err(violation("reader admitted while a writer holds the lock"));
                    }
                    readers.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Ok(())
        })?;
    }

    let expected = (0..settings.threads)
        .map(|index| (0..iterations).filter(|i| (i + index) % 8 == 0).count())
        .sum::<usize>();
    let total = writes.load(Ordering::SeqCst);
    if total != expected {
        return Err(violation(format!("{total} writes recorded, expected {expected}")));
    }
    if lock.reader_count()? != 0 || lock.is_write_locked()? {
        return Err(violation("lock still held after all threads finished"));
    }
    Ok(format!(
        "rwlock ({:?}): {expected} writes, {} reads in {:?}",
        lock.policy(),
        settings.threads * iterations - expected,
        started.elapsed()
    ))
}

pub fn semaphore(settings: &Settings, permits: usize) -> Result<String, StressError> {
    if permits == 0 {
        return Err(violation("semaphore scenario needs at least one permit"));
    }
    let semaphore = Arc::new(Semaphore::with_backend(permits, settings.backend));
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let iterations = settings.iterations;

    let started = Instant::now();
    {
        let (semaphore, inside, peak) =
            (Arc::clone(&semaphore), Arc::clone(&inside), Arc::clone(&peak));
        run_threads(settings, "stress-sem", move |_| {
            for _ in 0..iterations {
                let _permit = semaphore.permit()?;
                let holders = inside.fetch_add(1, Ordering::SeqCst) + 1;
                if holders > permits {
                    return Err(violation(format!(
                        "{holders} holders with {permits} permits"
                    )));
                }
                peak.fetch_max(holders, Ordering::SeqCst);
                yield_now();
                inside.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        })?;
    }

    let available = semaphore.available()?;
    if available != permits {
        return Err(violation(format!(
            "{available} permits available after the run, expected {permits}"
        )));
    }
    Ok(format!(
        "semaphore: {permits} permits, peak {} holders in {:?}",
        peak.load(Ordering::SeqCst),
        started.elapsed()
    ))
}

pub fn barrier(settings: &Settings, rounds: usize) -> Result<String, StressError> {
    let threads = settings.threads;
    let barrier = Arc::new(Barrier::with_backend(threads, settings.backend)?);
    let arrived = Arc::new(AtomicUsize::new(0));
    let leaders = Arc::new(AtomicUsize::new(0));

    let started = Instant::now();
    {
        let (barrier, arrived, leaders) =
            (Arc::clone(&barrier), Arc::clone(&arrived), Arc::clone(&leaders));
        run_threads(settings, "stress-barrier", move |_| {
            for round in 0..rounds {
                arrived.fetch_add(1, Ordering::SeqCst);
                let result = barrier.wait()?;
                if result.generation != round as u64 {
                    return Err(violation(format!(
                        "round {round} released as generation {}",
                        result.generation
                    )));
                }
                let seen = arrived.load(Ordering::SeqCst);
                if seen < (round + 1) * threads {
                    return Err(violation(format!(
                        "released from round {round} after only {seen} arrivals"
                    )));
                }
                if result.is_leader {
                    leaders.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok(())
        })?;
    }

    let led = leaders.load(Ordering::SeqCst);
    if led != rounds {
        return Err(violation(format!("{led} leaders over {rounds} rounds")));
    }
    Ok(format!(
        "barrier: {rounds} rounds of {threads} threads in {:?}",
        started.elapsed()
    ))
}

pub fn pool(settings: &Settings) -> Result<String, StressError> {
    let manager = TaskManager::new(settings.config.clone().with_workers(settings.threads));
    manager.start()?;

    let hits = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();
    for i in 0..settings.iterations {
        let hits = Arc::clone(&hits);
        let job = task(move || {
            hits.fetch_add(1, Ordering::Relaxed);
        });
        match i % 16 {
            0 => manager.submit_front(job)?,
            1..=4 => manager.submit_with_priority(job, Priority::High)?,
            5..=8 => manager.submit_with_priority(job, Priority::Low)?,
            _ => manager.submit(job)?,
        }
    }

    let report = manager.stop(true)?;
    let ran = hits.load(Ordering::SeqCst);
    if report.dropped != 0 || report.failed != 0 {
        return Err(violation(format!(
            "draining stop dropped {} and failed {} jobs",
            report.dropped, report.failed
        )));
    }
    if ran != settings.iterations || report.executed != settings.iterations {
        return Err(violation(format!(
            "{ran} tasks ran ({} reported), expected {}",
            report.executed, settings.iterations
        )));
    }
    Ok(format!(
        "pool: {ran} tasks on {} workers ({}) in {:?}",
        settings.threads,
        manager.backend().name(),
        started.elapsed()
    ))
}

pub fn periodic(settings: &Settings, interval: Duration, periods: u32) -> Result<String, StressError> {
    let manager = TaskManager::new(settings.config.clone().with_workers(settings.threads));
    manager.start()?;

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handle = manager.schedule_periodic(
        task(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        interval,
    )?;

    weft_threads::sleep(interval * periods + interval / 3);
    manager.cancel(&handle)?;
    let fired = hits.load(Ordering::SeqCst);

    let expected = periods as usize;
    if fired + 1 < expected || fired > expected + 1 {
        manager.stop(false)?;
        return Err(violation(format!(
            "fired {fired} times over {periods} intervals"
        )));
    }

    // A firing may still be running when the cancel lands.
    weft_threads::sleep(interval / 2);
    let settled = hits.load(Ordering::SeqCst);
    weft_threads::sleep(interval * 3);
    let late = hits.load(Ordering::SeqCst) - settled;
    manager.stop(false)?;
    if late != 0 {
        return Err(violation(format!("{late} firings after cancel")));
    }

    Ok(format!(
        "periodic: {fired} firings over {periods} x {interval:?}, {} skipped",
        handle.skipped()
    ))
}
