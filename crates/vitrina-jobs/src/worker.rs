//! Job worker consuming the indexing queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vitrina_core::defaults::{
    self, env_flag, env_or, EVENT_BUS_CAPACITY, JOB_MAX_CONCURRENT, JOB_TIMEOUT_SECS,
};
use vitrina_core::{Error, Result};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::queue::{IndexJob, IndexQueue, IndexReceiver};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Per-job timeout.
    pub job_timeout: Duration,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: JOB_MAX_CONCURRENT,
            job_timeout: Duration::from_secs(JOB_TIMEOUT_SECS),
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `VITRINA_JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `VITRINA_JOB_MAX_CONCURRENT` | `2` | Max concurrent jobs |
    /// | `VITRINA_JOB_TIMEOUT_SECS` | `120` | Per-job timeout |
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: env_or(defaults::ENV_JOB_MAX_CONCURRENT, JOB_MAX_CONCURRENT)
                .max(1),
            job_timeout: Duration::from_secs(env_or(
                defaults::ENV_JOB_TIMEOUT_SECS,
                JOB_TIMEOUT_SECS,
            )),
            enabled: env_flag(defaults::ENV_JOB_WORKER_ENABLED, true),
        }
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Worker started.
    WorkerStarted,
    /// A job was started.
    JobStarted { job_id: Uuid, item_id: Uuid },
    /// A job persisted its result.
    JobCompleted { job_id: Uuid, item_id: Uuid },
    /// A job finished but a newer one for the same item owns the write.
    JobSuperseded { job_id: Uuid, item_id: Uuid },
    /// A job failed or timed out.
    JobFailed {
        job_id: Uuid,
        item_id: Uuid,
        error: String,
    },
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
///
/// Dropping the handle also stops the worker once in-flight jobs finish.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop taking jobs, wait for in-flight ones, and return.
    pub async fn shutdown(self) -> Result<()> {
        // a closed channel means the worker already exited
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("worker task failed: {}", e)))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Worker processing index jobs with bounded concurrency.
pub struct JobWorker {
    receiver: IndexReceiver,
    queue: IndexQueue,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(
        receiver: IndexReceiver,
        queue: IndexQueue,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            receiver,
            queue,
            handler,
            config,
            event_tx,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let task = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(subsystem = "jobs", "Job worker is disabled, not starting");
            self.receiver.close();
            self.queue.clear_pending();
            return;
        }

        let max_concurrent = self.config.max_concurrent_jobs.max(1);
        info!(
            subsystem = "jobs",
            component = "worker",
            handler = self.handler.name(),
            max_concurrent,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            queue_capacity = self.queue.capacity(),
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(subsystem = "jobs", component = "worker", "Job worker received shutdown signal");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(subsystem = "jobs", component = "worker", error = ?e, "Index job task panicked");
                    }
                }
                job = self.receiver.recv(), if tasks.len() < max_concurrent => {
                    let Some(job) = job else {
                        info!(subsystem = "jobs", component = "worker", "Index queue closed");
                        break;
                    };
                    tasks.spawn(self.runner().execute(job));
                }
            }
        }

        // queued jobs not yet received are dropped with the receiver
        self.receiver.close();

        if !tasks.is_empty() {
            debug!(
                subsystem = "jobs",
                component = "worker",
                in_flight = tasks.len(),
                "Waiting for in-flight jobs"
            );
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(
                    subsystem = "jobs",
                    component = "worker",
                    error = ?e,
                    "Index job task panicked"
                );
            }
        }

        self.queue.clear_pending();
        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "jobs", component = "worker", "Job worker stopped");
    }

    fn runner(&self) -> JobRunner {
        JobRunner {
            queue: self.queue.clone(),
            handler: self.handler.clone(),
            event_tx: self.event_tx.clone(),
            timeout: self.config.job_timeout,
        }
    }
}

/// Everything one spawned job needs.
struct JobRunner {
    queue: IndexQueue,
    handler: Arc<dyn JobHandler>,
    event_tx: broadcast::Sender<WorkerEvent>,
    timeout: Duration,
}

impl JobRunner {
    async fn execute(self, job: IndexJob) {
        let start = Instant::now();
        let job_id = job.id;
        let item_id = job.item_id;

        debug!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job_id,
            item_id = %item_id,
            generation = job.generation,
            queue_wait_ms = job.enqueued_at.elapsed().as_millis() as u64,
            "Processing index job"
        );
        let _ = self
            .event_tx
            .send(WorkerEvent::JobStarted { job_id, item_id });

        let ctx = JobContext::new(job.clone(), self.queue.clone());
        let result = match tokio::time::timeout(self.timeout, self.handler.execute(ctx)).await {
            Ok(result) => result,
            Err(_) => JobResult::Failed(format!(
                "job exceeded timeout of {}ms",
                self.timeout.as_millis()
            )),
        };
        if let JobResult::Failed(error) = &result {
            let ctx = JobContext::new(job.clone(), self.queue.clone());
            self.handler.on_failure(&ctx, error).await;
        }
        self.queue.finish(&job);

        let duration_ms = start.elapsed().as_millis() as u64;
        let event = match result {
            JobResult::Success => {
                info!(
                    subsystem = "jobs",
                    component = "worker",
                    handler = self.handler.name(),
                    job_id = %job_id,
                    item_id = %item_id,
                    duration_ms,
                    "Index job completed"
                );
                WorkerEvent::JobCompleted { job_id, item_id }
            }
            JobResult::Superseded => {
                debug!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    item_id = %item_id,
                    duration_ms,
                    "Index job superseded, result discarded"
                );
                WorkerEvent::JobSuperseded { job_id, item_id }
            }
            JobResult::Failed(error) => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    handler = self.handler.name(),
                    job_id = %job_id,
                    item_id = %item_id,
                    %error,
                    duration_ms,
                    "Index job failed"
                );
                WorkerEvent::JobFailed {
                    job_id,
                    item_id,
                    error,
                }
            }
        };
        let _ = self.event_tx.send(event);
    }
}
