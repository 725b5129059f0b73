//! Bounded in-process indexing queue.
//!
//! Every scheduled job carries a generation drawn from a queue-wide counter,
//! and each item remembers the generation of its newest job. Scheduling a
//! new photo for an item supersedes any job still holding an older one.
//! Entries are dropped once the newest job finishes or the item is
//! superseded, so the maps only hold items with work in flight.
//! Re-submitting the same photo (same blake3 fingerprint) while a job for
//! it is pending returns the pending job instead of queueing another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use vitrina_core::defaults::{self, env_or, JOB_QUEUE_CAPACITY};
use vitrina_core::{Error, Result};

/// A scheduled primary-embedding computation.
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub id: Uuid,
    pub item_id: Uuid,
    pub generation: u64,
    pub fingerprint: blake3::Hash,
    pub image: Arc<[u8]>,
    pub enqueued_at: Instant,
}

/// What `schedule` did with a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledJob {
    pub job_id: Uuid,
    pub generation: u64,
    /// The submission matched a pending job and nothing new was queued.
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    job_id: Uuid,
    generation: u64,
    fingerprint: blake3::Hash,
}

#[derive(Default)]
struct QueueState {
    last_generation: u64,
    generations: HashMap<Uuid, u64>,
    pending: HashMap<Uuid, Pending>,
}

/// Producer side of the indexing queue. Cheap to clone.
#[derive(Clone)]
pub struct IndexQueue {
    tx: mpsc::Sender<IndexJob>,
    state: Arc<Mutex<QueueState>>,
    /// Serializes "still current?" checks with the writes they guard.
    commit: Arc<tokio::sync::Mutex<()>>,
    capacity: usize,
}

/// Consumer side, owned by the worker.
pub struct IndexReceiver {
    rx: mpsc::Receiver<IndexJob>,
}

impl IndexReceiver {
    pub async fn recv(&mut self) -> Option<IndexJob> {
        self.rx.recv().await
    }

    /// Refuse further jobs; `schedule` fails from now on.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl IndexQueue {
    pub fn bounded(capacity: usize) -> (Self, IndexReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            tx,
            state: Arc::new(Mutex::new(QueueState::default())),
            commit: Arc::new(tokio::sync::Mutex::new(())),
            capacity,
        };
        (queue, IndexReceiver { rx })
    }

    /// Queue sized by `VITRINA_JOB_QUEUE_CAPACITY`.
    pub fn from_env() -> (Self, IndexReceiver) {
        Self::bounded(env_or(defaults::ENV_JOB_QUEUE_CAPACITY, JOB_QUEUE_CAPACITY))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        // state is only ever mutated in short, non-panicking sections
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queue a photo for `item_id` without waiting.
    ///
    /// A full or closed queue is a `Job` error and leaves the item's
    /// current job untouched.
    pub fn schedule(&self, item_id: Uuid, image: Vec<u8>) -> Result<ScheduledJob> {
        let fingerprint = blake3::hash(&image);
        let mut state = self.state();

        if let Some(pending) = state.pending.get(&item_id) {
            if pending.fingerprint == fingerprint {
                debug!(
                    subsystem = "jobs",
                    component = "queue",
                    item_id = %item_id,
                    job_id = %pending.job_id,
                    "Identical photo already pending"
                );
                return Ok(ScheduledJob {
                    job_id: pending.job_id,
                    generation: pending.generation,
                    deduplicated: true,
                });
            }
        }

        let generation = state.last_generation + 1;
        let job = IndexJob {
            id: Uuid::now_v7(),
            item_id,
            generation,
            fingerprint,
            image: Arc::from(image),
            enqueued_at: Instant::now(),
        };
        let job_id = job.id;

        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return Err(Error::Job(format!(
                    "index queue full ({} jobs), item {} not scheduled",
                    self.capacity, item_id
                )))
            }
            Err(TrySendError::Closed(_)) => {
                return Err(Error::Job("index queue closed".to_string()))
            }
        }

        state.last_generation = generation;
        state.generations.insert(item_id, generation);
        state.pending.insert(
            item_id,
            Pending {
                job_id,
                generation,
                fingerprint,
            },
        );
        Ok(ScheduledJob {
            job_id,
            generation,
            deduplicated: false,
        })
    }

    /// Invalidate every queued or running job for `item_id`.
    pub fn supersede(&self, item_id: Uuid) {
        let mut state = self.state();
        state.pending.remove(&item_id);
        state.generations.remove(&item_id);
    }

    /// Whether `job` still holds its item's latest generation.
    pub fn is_current(&self, job: &IndexJob) -> bool {
        self.state().generations.get(&job.item_id) == Some(&job.generation)
    }

    /// Take the commit lock if `job` is still current.
    ///
    /// Holding the guard across the write orders it before the write of any
    /// job scheduled after the check.
    pub async fn lock_if_current(
        &self,
        job: &IndexJob,
    ) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        let guard = self.commit.lock().await;
        self.is_current(job).then_some(guard)
    }

    /// Take the commit lock unconditionally, for writes that race with jobs.
    pub async fn commit_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.commit.lock().await
    }

    /// Forget a finished job. Entries belonging to newer jobs stay.
    pub fn finish(&self, job: &IndexJob) {
        let mut state = self.state();
        if state.generations.get(&job.item_id) == Some(&job.generation) {
            state.generations.remove(&job.item_id);
        }
        if state
            .pending
            .get(&job.item_id)
            .is_some_and(|p| p.job_id == job.id)
        {
            state.pending.remove(&job.item_id);
        }
    }

    /// Jobs scheduled but not yet finished.
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Drop every pending entry once the consumer is gone, so resubmissions
    /// are not matched against jobs that will never run.
    pub fn clear_pending(&self) {
        let mut state = self.state();
        state.pending.clear();
        state.generations.clear();
    }
}
