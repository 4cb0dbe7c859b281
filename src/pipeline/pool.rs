use std::future::Future;
use std::sync::Arc;

use tokio::sync::{AcquireError, Semaphore};
use tokio::task::JoinHandle;

/// Runs futures on the tokio runtime, at most `size` at a time
///
/// [`TaskPool::spawn`] waits for a free slot instead of dropping work, which
/// pushes back on whoever submits.
#[derive(Debug, Clone)]
pub struct TaskPool {
    slots: Arc<Semaphore>,
    size: usize,
}

impl TaskPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of futures currently running
    pub fn in_flight(&self) -> usize {
        self.size - self.slots.available_permits()
    }

    /// Wait for a free slot, then spawn `task` holding it until completion.
    pub async fn spawn<F>(&self, task: F) -> Result<JoinHandle<()>, AcquireError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self.slots.clone().acquire_owned().await?;

        Ok(tokio::spawn(async move {
            task.await;
            drop(permit);
        }))
    }

    /// Wait until nothing is running
    pub async fn wait_idle(&self) -> Result<(), AcquireError> {
        let all = self.slots.acquire_many(self.size as u32).await?;
        drop(all);
        Ok(())
    }
}
