//! A multi-worker [`ProcessGroup`] whose workers are threads of the current process.
//!
//! Ranks meet at a shared slot table guarded by a mutex. A collective completes when the last rank
//! deposits its payload; the completed round is published under a generation counter so that
//! waiters from that round can pick it up even after the next round has started filling.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::{CommError, ProcessGroup};

#[derive(Debug)]
struct Round {
    generation: u64,
    slots: Vec<Option<Vec<u8>>>,
    arrived: usize,
    completed: Option<Arc<Vec<Vec<u8>>>>,
    departed: Vec<bool>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    round: Mutex<Round>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Round>, CommError> {
        self.round.lock().map_err(|_| CommError::Poisoned)
    }
}

/// Factory for the rank handles of an in-process worker group.
pub struct ThreadGroup;

impl ThreadGroup {
    /// Create `size` connected rank handles, one per worker.
    pub fn new(size: usize) -> Vec<ThreadComm> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            size,
            round: Mutex::new(Round {
                generation: 0,
                slots: vec![None; size],
                arrived: 0,
                completed: None,
                departed: vec![false; size],
            }),
            cond: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                shared: shared.clone(),
            })
            .collect()
    }

    /// Run `f` once per rank on its own thread and collect the results in rank order.
    ///
    /// A panic on any worker is resumed on the calling thread.
    pub fn run<F, T>(size: usize, f: F) -> Vec<T>
    where
        F: Fn(ThreadComm) -> T + Sync,
        T: Send,
    {
        let comms = Self::new(size);
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    scope.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(value) => value,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

/// One rank's handle into a [`ThreadGroup`].
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    fn departed_peer(&self, round: &Round) -> Option<usize> {
        round
            .departed
            .iter()
            .zip(&round.slots)
            .position(|(&departed, slot)| departed && slot.is_none())
    }
}

impl ProcessGroup for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_gather_bytes(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError> {
        let mut round = self.shared.lock()?;

        if let Some(rank) = self.departed_peer(&round) {
            return Err(CommError::PeerDisconnected { rank });
        }

        let generation = round.generation;
        round.slots[self.rank] = Some(payload);
        round.arrived += 1;

        if round.arrived == self.shared.size {
            let gathered: Vec<Vec<u8>> = round
                .slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            let gathered = Arc::new(gathered);
            round.completed = Some(gathered.clone());
            round.arrived = 0;
            round.generation += 1;
            self.shared.cond.notify_all();
            log::trace!("rank {} completed all-gather round {generation}", self.rank);
            return Ok(gathered.as_ref().clone());
        }

        loop {
            round = self
                .shared
                .cond
                .wait(round)
                .map_err(|_| CommError::Poisoned)?;

            if round.generation != generation {
                return round
                    .completed
                    .as_ref()
                    .map(|gathered| gathered.as_ref().clone())
                    .ok_or(CommError::Poisoned);
            }
            if let Some(rank) = self.departed_peer(&round) {
                // Withdraw so the remaining peers see a consistent round.
                round.slots[self.rank] = None;
                round.arrived -= 1;
                return Err(CommError::PeerDisconnected { rank });
            }
        }
    }
}

impl Drop for ThreadComm {
    fn drop(&mut self) {
        if let Ok(mut round) = self.shared.round.lock() {
            round.departed[self.rank] = true;
            self.shared.cond.notify_all();
        }
    }
}
