//! Bounded polling and convergence verification.
//!
//! [`poll_until`] is the single polling algorithm in the crate. The
//! [`Verifier`] applies it to cluster state and the quality-gate stage
//! applies it to scanner state; they differ only in [`RetryPolicy`].
//!
//! Timeout is a normal outcome here: nothing in this module raises when a
//! budget is exhausted, it returns `converged = false` instead.

use crate::cancellation::CancellationToken;
use crate::cluster::{ClusterClient, ObservedObject};
use crate::core::RunEvent;
use crate::events::EventSink;
use crate::resources::Selector;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff strategy between poll attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = interval
    #[default]
    Constant,
    /// delay = min(interval * 2^(attempt - 1), max_interval)
    Exponential,
}

/// How many times to poll and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub interval_ms: u64,
    /// Upper bound for any single delay in milliseconds.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Randomize each delay within `[delay / 2, delay]`.
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_interval_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::constant(30, Duration::from_secs(10))
    }
}

impl RetryPolicy {
    /// Constant-interval policy.
    #[must_use]
    pub fn constant(max_attempts: u32, interval: Duration) -> Self {
        let interval_ms = duration_ms(interval);
        Self {
            max_attempts,
            interval_ms,
            max_interval_ms: interval_ms.max(default_max_interval_ms()),
            backoff: BackoffStrategy::Constant,
            jitter: false,
        }
    }

    /// Capped exponential policy.
    #[must_use]
    pub fn exponential(max_attempts: u32, interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_attempts,
            interval_ms: duration_ms(interval),
            max_interval_ms: duration_ms(max_interval),
            backoff: BackoffStrategy::Exponential,
            jitter: false,
        }
    }

    /// Enables jitter.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Base interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Delay to wait after the given 1-based attempt failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = match self.backoff {
            BackoffStrategy::Constant => self.interval_ms,
            BackoffStrategy::Exponential => {
                let shift = attempt.saturating_sub(1).min(32);
                self.interval_ms.saturating_mul(1u64 << shift)
            }
        };
        let capped = base.min(self.max_interval_ms.max(self.interval_ms));
        let delay = if self.jitter && capped > 1 {
            rand::thread_rng().gen_range(capped / 2..=capped)
        } else {
            capped
        };
        Duration::from_millis(delay)
    }

    /// Upper bound on total waiting, ignoring probe time.
    #[must_use]
    pub fn total_wait(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_for(a)).sum()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Result of [`poll_until`].
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome<T> {
    /// Whether `done` held on some attempt.
    pub converged: bool,
    /// Attempts actually made.
    pub attempts: u32,
    /// Value from the last attempt made.
    pub last: Option<T>,
    /// Whether polling stopped because of cancellation.
    pub cancelled: bool,
}

/// Polls `probe` until `done` holds or the attempt budget runs out.
///
/// Attempts are numbered from 1. Success short-circuits without waiting;
/// waits happen only between attempts, so `max_attempts = n` means `n`
/// probes and `n - 1` waits. Cancellation ends polling early with
/// `converged = false`.
pub async fn poll_until<T, P, Fut, D>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut probe: P,
    mut done: D,
) -> PollOutcome<T>
where
    P: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
    D: FnMut(&T) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut outcome = PollOutcome {
        converged: false,
        attempts: 0,
        last: None,
        cancelled: false,
    };

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            return outcome;
        }

        let value = probe(attempt).await;
        outcome.attempts = attempt;
        let converged = done(&value);
        outcome.last = Some(value);
        if converged {
            outcome.converged = true;
            return outcome;
        }

        if attempt < max_attempts {
            tokio::select! {
                () = tokio::time::sleep(policy.delay_for(attempt)) => {}
                () = cancel.cancelled() => {
                    outcome.cancelled = true;
                    return outcome;
                }
            }
        }
    }

    outcome
}

/// Predicate over observed cluster state.
pub type Predicate = dyn Fn(&[ObservedObject]) -> bool + Send + Sync;

/// Every observed object is Ready/Running, and there is at least one.
#[must_use]
pub fn all_ready(objects: &[ObservedObject]) -> bool {
    !objects.is_empty() && objects.iter().all(|o| o.ready)
}

/// At least one object exists.
#[must_use]
pub fn exists(objects: &[ObservedObject]) -> bool {
    !objects.is_empty()
}

/// Nothing matches. Used to confirm deletion.
#[must_use]
pub fn absent(objects: &[ObservedObject]) -> bool {
    objects.is_empty()
}

/// Result of a convergence check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    /// Whether the predicate held.
    pub converged: bool,
    /// Number of `get` calls made.
    pub attempts_used: u32,
    /// Objects seen by the last successful `get`.
    pub last_observed: Vec<ObservedObject>,
    /// Error from the last attempt, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl VerifyResult {
    /// Human-readable summary of the last observation.
    #[must_use]
    pub fn summary(&self) -> String {
        if let Some(err) = &self.last_error {
            return format!("last attempt failed: {err}");
        }
        let not_ready: Vec<&str> = self
            .last_observed
            .iter()
            .filter(|o| !o.ready)
            .map(|o| o.name.as_str())
            .collect();
        if self.last_observed.is_empty() {
            "nothing observed".to_string()
        } else if not_ready.is_empty() {
            format!("{} ready", self.last_observed.len())
        } else {
            format!("not ready: {}", not_ready.join(", "))
        }
    }
}

/// Polls cluster state until a predicate holds.
#[derive(Clone)]
pub struct Verifier {
    policy: RetryPolicy,
    events: Option<Arc<dyn EventSink>>,
}

impl Verifier {
    /// Creates a verifier with the given policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            events: None,
        }
    }

    /// Reports each attempt to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// The policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Waits until `predicate` holds for the objects matching `selector`.
    ///
    /// An empty observation never converges here, whatever the predicate
    /// says; use [`Verifier::verify_absent`] to wait for deletion. Failed
    /// `get` calls count as non-converged attempts.
    pub async fn verify<C>(
        &self,
        client: &C,
        selector: &Selector,
        predicate: &Predicate,
        cancel: &CancellationToken,
    ) -> VerifyResult
    where
        C: ClusterClient + ?Sized,
    {
        self.run(client, selector, cancel, |objects| {
            !objects.is_empty() && predicate(objects)
        })
        .await
    }

    /// Waits until nothing matches `selector`.
    pub async fn verify_absent<C>(
        &self,
        client: &C,
        selector: &Selector,
        cancel: &CancellationToken,
    ) -> VerifyResult
    where
        C: ClusterClient + ?Sized,
    {
        self.run(client, selector, cancel, absent).await
    }

    async fn run<C, F>(
        &self,
        client: &C,
        selector: &Selector,
        cancel: &CancellationToken,
        holds: F,
    ) -> VerifyResult
    where
        C: ClusterClient + ?Sized,
        F: Fn(&[ObservedObject]) -> bool,
    {
        let subject = selector.describe();
        let holds = &holds;
        let subject_ref = subject.as_str();
        let events = self.events.as_deref();

        let outcome = poll_until(
            &self.policy,
            cancel,
            |attempt| async move {
                let observed = client.get(selector).await;
                let converged = match &observed {
                    Ok(objects) => holds(objects),
                    Err(e) => {
                        warn!(subject = subject_ref, attempt, error = %e, "poll attempt failed");
                        false
                    }
                };
                debug!(subject = subject_ref, attempt, converged, "poll attempt");
                if let Some(sink) = events {
                    sink.emit(&RunEvent::PollAttempt {
                        subject: subject_ref.to_string(),
                        attempt,
                        converged,
                    })
                    .await;
                }
                (observed, converged)
            },
            |(_, converged)| *converged,
        )
        .await;

        let (last_observed, last_error) = match outcome.last {
            Some((Ok(objects), _)) => (objects, None),
            Some((Err(e), _)) => (Vec::new(), Some(e.to_string())),
            None => (Vec::new(), None),
        };
        let last_error = if outcome.cancelled && last_error.is_none() && !outcome.converged {
            Some(format!("cancelled: {}", cancel.reason().unwrap_or_default()))
        } else {
            last_error
        };

        VerifyResult {
            converged: outcome.converged,
            attempts_used: outcome.attempts,
            last_observed,
            last_error,
        }
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("policy", &self.policy)
            .field("has_events", &self.events.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::errors::ClusterError;
    use crate::events::CollectingEventSink;
    use crate::resources::{ResourceDescriptor, ResourceKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(n: u32) -> RetryPolicy {
        RetryPolicy::constant(n, Duration::from_secs(5))
    }

    #[test]
    fn test_constant_delay() {
        let policy = fast(3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(7), Duration::from_secs(5));
        assert_eq!(policy.total_wait(), Duration::from_secs(10));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy =
            RetryPolicy::exponential(10, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = fast(3).with_jitter();
        for attempt in 1..20 {
            let d = policy.delay_for(attempt);
            assert!(d >= Duration::from_millis(2500) && d <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RetryPolicy =
            serde_json::from_value(json!({"max_attempts": 4, "interval_ms": 250})).unwrap();
        assert_eq!(policy.backoff, BackoffStrategy::Constant);
        assert_eq!(policy.max_interval_ms, 60_000);
        assert!(!policy.jitter);
    }

    #[test]
    fn test_builtin_predicates() {
        assert!(!all_ready(&[]));
        assert!(!exists(&[]));
        assert!(absent(&[]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_short_circuits() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let outcome = poll_until(
            &fast(5),
            &CancellationToken::new(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { true }
            },
            |v| *v,
        )
        .await;

        assert!(outcome.converged);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_exhaustion_waits_between_attempts_only() {
        let start = tokio::time::Instant::now();
        let cancel = CancellationToken::new();
        let outcome = poll_until(&fast(3), &cancel, |n| async move { n }, |_| false).await;

        assert!(!outcome.converged);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.last, Some(3));
        // Two intervening waits of 5s.
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_on_cancel() {
        let cancel = Arc::new(CancellationToken::new());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel("deadline");
        });

        let outcome = poll_until(&fast(100), &cancel, |n| async move { n }, |_| false).await;
        assert!(outcome.cancelled);
        assert!(!outcome.converged);
        assert_eq!(outcome.attempts, 2);
    }

    async fn cluster_with_namespace() -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        let ns = ResourceDescriptor::new(ResourceKind::Namespace, None, "shop", json!({})).unwrap();
        cluster.apply(&ns).await.unwrap();
        cluster
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_short_circuit_issues_one_get() {
        let cluster = cluster_with_namespace().await;
        cluster.reset_counters();
        let selector = Selector {
            kind: ResourceKind::Namespace,
            namespace: None,
            name: Some("shop".into()),
            labels: Default::default(),
        };

        let result = Verifier::new(fast(5))
            .verify(&cluster, &selector, &all_ready, &CancellationToken::new())
            .await;

        assert!(result.converged);
        assert_eq!(result.attempts_used, 1);
        assert_eq!(cluster.counters().gets, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_exhaustion_never_raises() {
        let cluster = cluster_with_namespace().await;
        cluster.reset_counters();
        let sink = Arc::new(CollectingEventSink::new());
        let selector = Selector::kind_in(ResourceKind::Pod, "shop");
        let start = tokio::time::Instant::now();

        let result = Verifier::new(fast(3))
            .with_events(sink.clone())
            .verify(&cluster, &selector, &all_ready, &CancellationToken::new())
            .await;

        assert!(!result.converged);
        assert_eq!(result.attempts_used, 3);
        assert_eq!(cluster.counters().gets, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(sink.events_named("poll.attempt").len(), 3);
        assert_eq!(result.summary(), "nothing observed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_set_is_not_vacuously_true() {
        let cluster = cluster_with_namespace().await;
        let always = |_: &[ObservedObject]| true;
        let result = Verifier::new(fast(2))
            .verify(
                &cluster,
                &Selector::kind_in(ResourceKind::Pod, "shop"),
                &always,
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.converged);

        let result = Verifier::new(fast(2))
            .verify_absent(
                &cluster,
                &Selector::kind_in(ResourceKind::Pod, "shop"),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.converged);
        assert_eq!(result.attempts_used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_errors_count_as_attempts() {
        let cluster = cluster_with_namespace().await;
        cluster.fail_all_with(Some(ClusterError::Unreachable("connection refused".into())));

        let result = Verifier::new(fast(3))
            .verify(
                &cluster,
                &Selector::kind_in(ResourceKind::Pod, "shop"),
                &all_ready,
                &CancellationToken::new(),
            )
            .await;

        assert!(!result.converged);
        assert_eq!(result.attempts_used, 3);
        assert!(result.last_error.unwrap().contains("connection refused"));
    }
}
