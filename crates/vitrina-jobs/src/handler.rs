//! Job handler seam.

use async_trait::async_trait;
use uuid::Uuid;

use crate::queue::{IndexJob, IndexQueue};

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: IndexJob,
    queue: IndexQueue,
}

impl JobContext {
    pub fn new(job: IndexJob, queue: IndexQueue) -> Self {
        Self { job, queue }
    }

    pub fn item_id(&self) -> Uuid {
        self.job.item_id
    }

    pub fn image(&self) -> &[u8] {
        &self.job.image
    }

    /// Whether a newer photo has been scheduled for the same item.
    pub fn is_superseded(&self) -> bool {
        !self.queue.is_current(&self.job)
    }

    /// Commit lock for this job's write, or `None` once superseded.
    pub async fn lock_if_current(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.queue.lock_if_current(&self.job).await
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// The result was persisted.
    Success,
    /// A newer job for the same item exists; nothing was written.
    Superseded,
    /// Job failed with an error message.
    Failed(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Called after a job failed or timed out, before it is marked finished.
    async fn on_failure(&self, _ctx: &JobContext, _error: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl JobHandler for EchoHandler {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, ctx: JobContext) -> JobResult {
            match ctx.lock_if_current().await {
                Some(_guard) if !ctx.image().is_empty() => JobResult::Success,
                Some(_) => JobResult::Failed("empty image".to_string()),
                None => JobResult::Superseded,
            }
        }
    }

    #[tokio::test]
    async fn test_context_reports_supersession() {
        let (queue, mut rx) = IndexQueue::bounded(4);
        let item = Uuid::new_v4();
        queue.schedule(item, vec![1, 2, 3]).unwrap();
        let job = rx.recv().await.unwrap();

        let ctx = JobContext::new(job.clone(), queue.clone());
        assert_eq!(ctx.item_id(), item);
        assert!(!ctx.is_superseded());
        assert_eq!(EchoHandler.execute(ctx).await, JobResult::Success);

        queue.schedule(item, vec![4]).unwrap();
        let ctx = JobContext::new(job, queue.clone());
        assert!(ctx.is_superseded());
        assert_eq!(EchoHandler.execute(ctx).await, JobResult::Superseded);
    }
}
