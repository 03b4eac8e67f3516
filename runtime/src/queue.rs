//! Named serial execution contexts.
//!
//! A [`SerialQueue`] runs submitted jobs one at a time, in submission order,
//! on a dedicated task. Completion handlers can be hopped onto a queue with
//! [`Request::response_on`](crate::request::Request::response_on) so that
//! callers that care about ordering get it without locking.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::StoreError;

type Job = Box<dyn FnOnce() + Send>;

/// Handle to a serial execution context.
///
/// Cloning the handle shares the queue. The worker task stops once every
/// handle is dropped and the queued jobs have run.
#[derive(Clone)]
pub struct SerialQueue {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Job>,
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SerialQueue {
    /// Start a new queue. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let worker_name = Arc::clone(&name);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            tracing::trace!(queue = %worker_name, "Serial queue drained, stopping");
        });

        Self { name, tx }
    }

    /// Queue name, for diagnostics
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `job` after every previously submitted job
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MailboxClosed`] if the worker task is gone
    /// (for example because its runtime shut down).
    pub fn submit<F>(&self, job: F) -> Result<(), StoreError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(job))
            .map_err(|_| StoreError::MailboxClosed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let queue = SerialQueue::new("ordered");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = Arc::clone(&seen);
            queue.submit(move || seen.lock().unwrap().push(i)).unwrap();
        }

        let (tx, rx) = oneshot::channel();
        queue.submit(move || tx.send(()).unwrap()).unwrap();
        rx.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
        assert_eq!(queue.name(), "ordered");
    }
}
