use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Explicit submission API for background work.
///
/// Fire-and-forget tasks are easy to lose errors from; every task submitted
/// here is wrapped so that an `Err` outcome is logged with the task's label
/// before being swallowed. Callers that care about the result keep the
/// returned [`TaskHandle`] and await it.
#[derive(Clone)]
pub struct TaskExecutor {
    handle: Handle,
}

impl TaskExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawn `future` on the runtime. The wrapper logs a failure once; the
    /// handle yields `Some(value)` on success and `None` on failure or if
    /// the task panicked.
    pub fn submit<F, T, E>(&self, label: &str, future: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let label = label.to_string();
        let join = self.handle.spawn(async move {
            match future.await {
                Ok(value) => Some(value),
                Err(error) => {
                    tracing::error!(task = %label, %error, "background task failed");
                    None
                }
            }
        });
        TaskHandle { join }
    }
}

/// Handle to a submitted task.
pub struct TaskHandle<T> {
    join: JoinHandle<Option<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task. `None` means it failed (already logged) or
    /// panicked.
    pub async fn join(self) -> Option<T> {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "background task panicked");
                None
            }
        }
    }

    pub fn abort(&self) {
        self.join.abort();
    }
}
