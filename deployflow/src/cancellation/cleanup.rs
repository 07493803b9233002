//! Cleanup registry for run-scoped resources.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

struct CleanupEntry {
    name: String,
    release: ReleaseFn,
}

/// A release action that failed or timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFailure {
    /// Name the action was registered under.
    pub name: String,
    /// What went wrong.
    pub reason: String,
}

/// Registry of async release actions executed in LIFO order.
///
/// Stages register anything that must not outlive the run (port forwards,
/// temporary checkouts). The pipeline drains the registry on every exit path,
/// including halts, cancellation and deadline expiry.
#[derive(Default)]
pub struct CleanupRegistry {
    entries: Mutex<Vec<CleanupEntry>>,
}

impl CleanupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a release action.
    pub fn register<F, Fut>(&self, name: impl Into<String>, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let name = name.into();
        debug!(resource = %name, "registered scoped resource");
        self.entries.lock().push(CleanupEntry {
            name,
            release: Box::new(move || Box::pin(release())),
        });
    }

    /// Removes a release action without running it.
    ///
    /// Returns true if an entry was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.name != name);
        entries.len() < before
    }

    /// Number of pending release actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Runs every release action, most recent first.
    ///
    /// Each action gets `per_entry_timeout`. Failures are collected and never
    /// stop later actions. The registry is empty afterwards.
    pub async fn release_all(&self, per_entry_timeout: Duration) -> Vec<ReleaseFailure> {
        let entries = std::mem::take(&mut *self.entries.lock());
        let mut failures = Vec::new();

        for entry in entries.into_iter().rev() {
            let outcome = tokio::time::timeout(per_entry_timeout, (entry.release)()).await;
            let reason = match outcome {
                Ok(Ok(())) => {
                    debug!(resource = %entry.name, "released scoped resource");
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_) => format!("timed out after {per_entry_timeout:?}"),
            };
            warn!(resource = %entry.name, %reason, "failed to release scoped resource");
            failures.push(ReleaseFailure {
                name: entry.name,
                reason,
            });
        }

        failures
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.entries.lock().iter().map(|e| e.name.clone()).collect();
        f.debug_struct("CleanupRegistry").field("pending", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_release_in_lifo_order() {
        let registry = CleanupRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = order.clone();
            registry.register(name, move || async move {
                order.lock().push(name);
                Ok(())
            });
        }

        let failures = registry.release_all(Duration::from_secs(1)).await;
        assert!(failures.is_empty());
        assert_eq!(*order.lock(), vec!["third", "second", "first"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_others() {
        let registry = CleanupRegistry::new();
        let ran = Arc::new(Mutex::new(0));

        let r = ran.clone();
        registry.register("ok", move || async move {
            *r.lock() += 1;
            Ok(())
        });
        registry.register("broken", || async { Err("port still bound".to_string()) });

        let failures = registry.release_all(Duration::from_secs(1)).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "broken");
        assert_eq!(*ran.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_timeout() {
        let registry = CleanupRegistry::new();
        registry.register("slow", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let failures = registry.release_all(Duration::from_secs(1)).await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].reason.contains("timed out"));
    }

    #[test]
    fn test_unregister() {
        let registry = CleanupRegistry::new();
        registry.register("forward", || async { Ok(()) });
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("forward"));
        assert!(!registry.unregister("forward"));
        assert!(registry.is_empty());
    }
}
