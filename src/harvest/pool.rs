//! Bounded task group.
//!
//! [`TaskPool`] waits for a free slot before spawning, yields results as
//! tasks complete, and aborts whatever is still running when dropped, so a
//! pool can never leak tasks past its owner.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use super::HarvestError;

/// Bounded set of spawned tasks producing `T`.
#[derive(Debug)]
pub struct TaskPool<T> {
    tasks: JoinSet<T>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl<T: Send + 'static> TaskPool<T> {
    /// Creates a pool running at most `capacity` tasks at once (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tasks: JoinSet::new(),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Maximum number of concurrently running tasks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks spawned and not yet collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns whether no tasks are pending collection.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for a free slot, then spawns `task`. The slot is released when
    /// the task finishes.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::PoolClosed`] if the slot semaphore was closed.
    pub async fn spawn<F>(&mut self, task: F) -> Result<(), HarvestError>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| HarvestError::PoolClosed)?;
        self.tasks.spawn(async move {
            let _permit = permit;
            task.await
        });
        Ok(())
    }

    /// Waits for the next task to finish.
    ///
    /// Returns `None` once every spawned task has been collected.
    pub async fn next(&mut self) -> Option<Result<T, JoinError>> {
        self.tasks.join_next().await
    }

    /// Collects a finished task without waiting, if there is one.
    pub fn try_next(&mut self) -> Option<Result<T, JoinError>> {
        self.tasks.try_join_next()
    }
}
