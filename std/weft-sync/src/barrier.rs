//! Reusable barrier: the `n`-th arrival releases the other `n - 1`.

use weft_core::{BackendKind, SyncError};

use crate::default_backend;
use crate::monitor::Monitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    /// `true` for exactly one thread per round, the one that completed it.
    pub is_leader: bool,
    /// Round number, starting at 0.
    pub generation: u64,
}

#[derive(Debug)]
struct Round {
    arrived: usize,
    generation: u64,
}

pub struct Barrier {
    threshold: usize,
    round: Monitor<Round>,
}

impl Barrier {
    pub fn new(participants: usize) -> Result<Self, SyncError> {
        Self::with_backend(participants, default_backend())
    }

    pub fn with_backend(participants: usize, backend: BackendKind) -> Result<Self, SyncError> {
        if participants == 0 {
            return Err(SyncError::InvalidParticipants);
        }
        Ok(Self {
            threshold: participants,
            round: Monitor::with_backend(
                Round {
                    arrived: 0,
                    generation: 0,
                },
                backend,
            ),
        })
    }

    pub fn participants(&self) -> usize {
        self.threshold
    }

    pub fn wait(&self) -> Result<BarrierWaitResult, SyncError> {
        let mut round = self.round.synchronized()?;
        let generation = round.generation;
        round.arrived += 1;

        if round.arrived == self.threshold {
            round.arrived = 0;
            round.generation += 1;
            round.notify_all();
            return Ok(BarrierWaitResult {
                is_leader: true,
                generation,
            });
        }

        round.wait_while(|r| r.generation == generation)?;
        Ok(BarrierWaitResult {
            is_leader: false,
            generation,
        })
    }
}

impl std::fmt::Debug for Barrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Barrier")
            .field("participants", &self.threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_zero_participants_rejected() {
        assert_eq!(Barrier::new(0).unwrap_err(), SyncError::InvalidParticipants);
    }

    #[test]
    fn test_single_participant_never_blocks() {
        let barrier = Barrier::new(1).unwrap();
        for generation in 0..3 {
            let result = barrier.wait().unwrap();
            assert!(result.is_leader);
            assert_eq!(result.generation, generation);
        }
    }

    #[test]
    fn test_fourth_arrival_releases_all() {
        for backend in [BackendKind::Portable, BackendKind::Parking] {
            let barrier = Arc::new(Barrier::with_backend(4, backend).unwrap());
            let passed = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..3)
                .map(|_| {
                    let (barrier, passed) = (Arc::clone(&barrier), Arc::clone(&passed));
                    thread::spawn(move || {
                        let result = barrier.wait().unwrap();
                        passed.fetch_add(1, Ordering::SeqCst);
                        result
                    })
                })
                .collect();

            thread::sleep(Duration::from_millis(30));
            assert_eq!(passed.load(Ordering::SeqCst), 0);

            let mine = barrier.wait().unwrap();
            let mut leaders = usize::from(mine.is_leader);
            for h in handles {
                let result = h.join().unwrap();
                assert_eq!(result.generation, 0);
                leaders += usize::from(result.is_leader);
            }
            assert_eq!(leaders, 1);
            assert_eq!(passed.load(Ordering::SeqCst), 3);
        }
    }

    #[test]
    fn test_barrier_is_reusable() {
        let barrier = Arc::new(Barrier::new(3).unwrap());
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    (0..5)
                        .map(|_| barrier.wait().unwrap().generation)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), vec![0, 1, 2, 3, 4]);
        }
    }
}
