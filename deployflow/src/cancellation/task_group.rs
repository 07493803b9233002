//! Fail-fast group for independent tasks.

use crate::errors::{DeployflowError, Result};
use std::future::Future;
use tokio::task::JoinSet;
use tracing::debug;

/// A group of independent tasks where the first failure aborts the rest.
///
/// Used for work with no ordering between items, such as building images
/// for several services. Results are returned in spawn order.
pub struct FailFastGroup<T> {
    set: JoinSet<(usize, Result<T>)>,
    spawned: usize,
}

impl<T: Send + 'static> FailFastGroup<T> {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            set: JoinSet::new(),
            spawned: 0,
        }
    }

    /// Spawns a task in the group.
    pub fn spawn<Fut>(&mut self, task: Fut)
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let index = self.spawned;
        self.spawned += 1;
        self.set.spawn(async move { (index, task.await) });
    }

    /// Number of tasks spawned so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spawned
    }

    /// Returns true if nothing was spawned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spawned == 0
    }

    /// Waits for every task, aborting the remainder on the first error.
    ///
    /// # Errors
    ///
    /// Returns the first task error; a panicking task is reported as an
    /// external tool failure.
    pub async fn join(mut self) -> Result<Vec<T>> {
        let mut results: Vec<Option<T>> = (0..self.spawned).map(|_| None).collect();

        while let Some(joined) = self.set.join_next().await {
            let failure = match joined {
                Ok((index, Ok(value))) => {
                    results[index] = Some(value);
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => DeployflowError::tool("task", format!("task panicked: {e}")),
            };
            debug!(remaining = self.set.len(), "aborting sibling tasks");
            self.set.abort_all();
            while self.set.join_next().await.is_some() {}
            return Err(failure);
        }

        Ok(results.into_iter().flatten().collect())
    }
}

impl<T: Send + 'static> Default for FailFastGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for FailFastGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailFastGroup")
            .field("spawned", &self.spawned)
            .field("running", &self.set.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_in_spawn_order() {
        let mut group = FailFastGroup::new();
        for (i, delay) in [30u64, 10, 20].into_iter().enumerate() {
            group.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(i)
            });
        }
        assert_eq!(group.join().await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_error_aborts_siblings() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut group = FailFastGroup::new();

        let f = finished.clone();
        group.spawn(async move {
            tokio::time::sleep(Duration::from_secs(600)).await;
            f.store(true, Ordering::SeqCst);
            Ok(())
        });
        group.spawn(async { Err(DeployflowError::tool("docker", "build failed")) });

        let err = group.join().await.unwrap_err();
        assert_eq!(err.kind(), "external_tool_failure");
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_group() {
        let group: FailFastGroup<()> = FailFastGroup::default();
        assert!(group.is_empty());
        assert!(group.join().await.unwrap().is_empty());
    }
}
