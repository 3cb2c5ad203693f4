//! Serial task queue.
//!
//! Tasks are processed one at a time in submission order by a single worker.
//! Each task runs inside its own spawned future so a panic is contained and
//! logged while the worker keeps draining the queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BspsyncError, Result};
use crate::pipeline::PipelineReport;
use crate::tracked::Task;

/// Something that can carry a task through the pipeline
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, task: &Task) -> PipelineReport;
}

/// Called once with the report of a finished task
pub type CompletionFn = Box<dyn FnOnce(PipelineReport) + Send>;

struct QueuedTask {
    task: Task,
    on_complete: CompletionFn,
}

/// FIFO queue with exactly one worker.
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    pending: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
}

impl TaskQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn start(processor: Arc<dyn TaskProcessor>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(worker_loop(processor, rx, pending.clone()));
        Self { tx, pending, worker }
    }

    /// Append a task; `on_complete` runs after it finishes.
    pub fn push(&self, task: Task, on_complete: CompletionFn) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(QueuedTask { task, on_complete }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(BspsyncError::QueueClosed);
        }
        Ok(())
    }

    /// Tasks queued or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stop accepting tasks and wait for the queued ones to finish
    pub async fn shutdown(self) {
        let Self { tx, pending, worker } = self;
        drop(tx);
        let remaining = pending.load(Ordering::SeqCst);
        if remaining > 0 {
            log::info!("Waiting for {} queued task(s) to finish", remaining);
        }
        if let Err(e) = worker.await {
            tracing::error!(error = ?e, "Queue worker terminated abnormally");
        }
    }
}

async fn worker_loop(
    processor: Arc<dyn TaskProcessor>,
    mut rx: mpsc::UnboundedReceiver<QueuedTask>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(QueuedTask { task, on_complete }) = rx.recv().await {
        let file_name = task.file_name.clone();
        let waited = chrono::Utc::now() - task.enqueued_at;
        tracing::debug!(file = %file_name, waited_ms = waited.num_milliseconds(), "Task started");

        let processor = processor.clone();
        let handle = tokio::spawn(async move { processor.process(&task).await });

        match handle.await {
            Ok(report) => {
                tracing::debug!(file = %file_name, success = report.succeeded(), "Task finished");
                on_complete(report);
            }
            Err(e) => {
                tracing::error!(file = %file_name, error = ?e, "Task panicked");
            }
        }

        pending.fetch_sub(1, Ordering::SeqCst);
    }
    log::debug!("Task queue closed");
}
