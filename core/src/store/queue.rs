// Operation queue - one strictly ordered lane for storage work
//
// Every mutation of the message store funnels through a single worker so
// writes never interleave, whichever conversation they touch. Tasks are
// opaque futures; the worker runs them one at a time, in submission order,
// each to completion. A failing task fails only its submitter.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::StoreError;

/// Task backlog before submitters are backpressured
const QUEUE_DEPTH: usize = 256;

/// How long one task may run before the worker starts warning
const SLOW_TASK_WARN: Duration = Duration::from_secs(30);

/// Handle to the storage work lane.
///
/// Clones share the same worker. The worker exits once every handle is
/// gone and the backlog is drained; tasks already submitted always run.
#[derive(Clone)]
pub struct OpQueue {
    task_tx: mpsc::Sender<BoxFuture<'static, ()>>,
}

impl OpQueue {
    /// Create the queue and spawn its worker.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let (task_tx, mut task_rx) = mpsc::channel::<BoxFuture<'static, ()>>(QUEUE_DEPTH);

        tokio::spawn(async move {
            while let Some(task) = task_rx.recv().await {
                run_watched(task).await;
            }
            debug!("Operation queue drained and stopped");
        });

        Self { task_tx }
    }

    /// Run `fut` after every previously submitted task has finished and
    /// hand its output back.
    ///
    /// Submission order is completion order. If the submitter stops
    /// waiting, the task still runs; only the reply is dropped.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);

        let task = async move {
            let result = fut.await;
            let _ = reply_tx.send(result).await;
        }
        .boxed();

        self.task_tx
            .send(task)
            .await
            .map_err(|_| StoreError::QueueClosed)?;

        reply_rx.recv().await.ok_or(StoreError::QueueClosed)
    }
}

impl Default for OpQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Await one task, warning periodically while it stalls the lane. The
/// task is never cancelled; the warning is the only remedy offered.
async fn run_watched(mut task: BoxFuture<'static, ()>) {
    let started = tokio::time::Instant::now();
    loop {
        tokio::select! {
            _ = &mut task => return,
            _ = tokio::time::sleep(SLOW_TASK_WARN) => {
                warn!(
                    "Storage task running for {:?}; queued operations are waiting behind it",
                    started.elapsed()
                );
            }
        }
    }
}
