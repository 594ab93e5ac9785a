//!
//! Pending-work queue.
//!
//! Jobs are ordered by priority, then by arrival. Within one priority level
//! the queue is strictly FIFO. `push_front` jumps ahead of everything,
//! including higher priorities; front-pushed jobs run most-recent-first.
//!

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::periodic::PeriodicEntry;
use crate::runnable::Task;

/// Scheduling priority of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
    Custom(i32),
}

impl Priority {
    /// Numeric level; higher runs first.
    pub fn level(self) -> i32 {
        match self {
            Priority::Lowest => -200,
            Priority::Low => -100,
            Priority::Normal => 0,
            Priority::High => 100,
            Priority::Highest => 200,
            Priority::Custom(level) => level,
        }
    }
}

pub(crate) enum Job {
    Task(Task),
    Firing(Arc<PeriodicEntry>),
}

impl Job {
    /// Undo bookkeeping for a job that will never run.
    pub(crate) fn discard(self) {
        if let Job::Firing(entry) = self {
            entry.clear_pending();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Band {
    Front,
    Ordered,
}

type Key = (Band, Reverse<i32>, i64);

#[derive(Default)]
pub(crate) struct JobQueue {
    jobs: BTreeMap<Key, Job>,
    back_seq: i64,
    front_seq: i64,
}

impl JobQueue {
    pub(crate) fn push_back(&mut self, job: Job, priority: Priority) {
        let seq = self.back_seq;
        self.back_seq += 1;
        self.jobs.insert((Band::Ordered, Reverse(priority.level()), seq), job);
    }

    pub(crate) fn push_front(&mut self, job: Job) {
        self.front_seq -= 1;
        self.jobs.insert((Band::Front, Reverse(0), self.front_seq), job);
    }

    pub(crate) fn pop(&mut self) -> Option<Job> {
        self.jobs.pop_first().map(|(_, job)| job)
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Removes every job; returns how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let jobs = std::mem::take(&mut self.jobs);
        let count = jobs.len();
        jobs.into_values().for_each(Job::discard);
        count
    }
}
