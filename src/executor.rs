//! Lane execution policies.
//!
//! A lane hands its tasks to a [`TaskExecutor`] as boxed futures in
//! submission order and gets every outcome back in the same order. Two
//! policies exist:
//!
//! * [`SequentialExecutor`] — one task at a time. Used by the merge lane,
//!   where page order must equal submission order.
//! * [`BoundedConcurrentExecutor`] — fixed-size chunks started together;
//!   the next chunk starts only after every task of the current one has
//!   settled. A failing task never cancels its siblings.
//!
//! Executors run futures on the calling task. Tasks that need real CPU
//! parallelism move their heavy stages to `spawn_blocking` themselves.

use futures::future::{join_all, BoxFuture, FutureExt};
use tracing::debug;

/// A scheduling policy for one lane.
pub trait TaskExecutor<T: Send + 'static>: Send + Sync {
    /// Drive every task to completion. Outcomes are returned in submission
    /// order regardless of completion order.
    fn run_all<'a>(&'a self, tasks: Vec<BoxFuture<'a, T>>) -> BoxFuture<'a, Vec<T>>;
}

/// Strictly one task in flight.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialExecutor;

impl<T: Send + 'static> TaskExecutor<T> for SequentialExecutor {
    fn run_all<'a>(&'a self, tasks: Vec<BoxFuture<'a, T>>) -> BoxFuture<'a, Vec<T>> {
        async move {
            let mut out = Vec::with_capacity(tasks.len());
            for task in tasks {
                out.push(task.await);
            }
            out
        }
        .boxed()
    }
}

/// Chunks of at most `batch_size` tasks, each chunk joined all-settled.
#[derive(Debug, Clone, Copy)]
pub struct BoundedConcurrentExecutor {
    batch_size: usize,
}

impl BoundedConcurrentExecutor {
    /// `batch_size` of zero is treated as one.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<T: Send + 'static> TaskExecutor<T> for BoundedConcurrentExecutor {
    fn run_all<'a>(&'a self, tasks: Vec<BoxFuture<'a, T>>) -> BoxFuture<'a, Vec<T>> {
        async move {
            let total = tasks.len();
            let mut out = Vec::with_capacity(total);
            let mut pending = tasks.into_iter().peekable();
            let mut chunk_no = 0;
            while pending.peek().is_some() {
                chunk_no += 1;
                let chunk: Vec<_> = pending.by_ref().take(self.batch_size).collect();
                debug!("Starting chunk {} ({} tasks of {})", chunk_no, chunk.len(), total);
                out.extend(join_all(chunk).await);
            }
            out
        }
        .boxed()
    }
}
