//! Concurrency-safe map from job id to its in-flight tracking operation.
//!
//! Each tracked job runs its resolver as one tokio task. Callers hold a
//! [`ResolverHandle`] that waits on a `watch` slot; the slot is written exactly
//! once, by whichever comes first of the task finishing or the job being closed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::error::StatusError;
use crate::resolver::Resolution;
use crate::status::{JobId, Status};

/// Final result of one tracking operation.
pub type Outcome = Result<Resolution, StatusError>;

struct TrackedJob {
    job_id: JobId,
    outcome: watch::Sender<Option<Outcome>>,
    task: Mutex<Option<AbortHandle>>,
}

impl TrackedJob {
    /// Store the outcome unless one is already there. Returns whether it was stored.
    fn publish(&self, outcome: Outcome) -> bool {
        self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    fn handle(&self) -> ResolverHandle {
        ResolverHandle {
            job_id: self.job_id.clone(),
            outcome: self.outcome.subscribe(),
        }
    }

    fn cancel(&self) {
        self.publish(Err(StatusError::Cancelled(self.job_id.clone())));
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

/// Caller-side view of a tracked job. Every handle for the same operation
/// observes the same outcome.
#[derive(Debug, Clone)]
pub struct ResolverHandle {
    job_id: JobId,
    outcome: watch::Receiver<Option<Outcome>>,
}

impl ResolverHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Suspend until the operation ends.
    pub async fn resolution(mut self) -> Outcome {
        let cancelled = StatusError::Cancelled(self.job_id.clone());
        match self.outcome.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone().unwrap_or(Err(cancelled)),
            Err(_) => Err(cancelled),
        }
    }

    pub async fn status(self) -> Result<Status, StatusError> {
        self.resolution().await.map(|resolution| resolution.status)
    }

    /// The outcome if the operation has already ended.
    pub fn try_outcome(&self) -> Option<Outcome> {
        self.outcome.borrow().clone()
    }
}

#[derive(Default)]
pub struct JobRegistry {
    entries: Mutex<HashMap<JobId, Arc<TrackedJob>>>,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join the in-flight operation for `job_id`, or start one by spawning the
    /// future built by `start`.
    pub fn track<F, Fut>(self: &Arc<Self>, job_id: &JobId, start: F) -> ResolverHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let mut entries = lock(&self.entries);
        if let Some(existing) = entries.get(job_id) {
            tracing::debug!(job_id = %job_id, "joining in-flight tracking");
            return existing.handle();
        }

        let (outcome, _) = watch::channel(None);
        let entry = Arc::new(TrackedJob {
            job_id: job_id.clone(),
            outcome,
            task: Mutex::new(None),
        });
        entries.insert(job_id.clone(), entry.clone());
        let handle = entry.handle();

        let lease = Lease {
            registry: Arc::clone(self),
            entry: Some(entry.clone()),
        };
        let work = start();
        let task = tokio::spawn(async move {
            let outcome = work.await;
            lease.finish(outcome);
        });
        *lock(&entry.task) = Some(task.abort_handle());

        tracing::debug!(job_id = %job_id, "tracking started");
        handle
    }

    /// Cancel the operation for `job_id`. Returns `false` if nothing was tracked.
    pub fn close(&self, job_id: &JobId) -> bool {
        let entry = lock(&self.entries).remove(job_id);
        match entry {
            Some(entry) => {
                tracing::warn!(job_id = %job_id, "tracking closed by caller");
                entry.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked operation. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<TrackedJob>> = lock(&self.entries).drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.cancel();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "closed all tracked jobs");
        }
        drained.len()
    }

    pub fn is_tracked(&self, job_id: &JobId) -> bool {
        lock(&self.entries).contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop `entry` from the map if it is still the current one for its job.
    fn release(&self, entry: &Arc<TrackedJob>) {
        let mut entries = lock(&self.entries);
        if entries
            .get(&entry.job_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(&entry.job_id);
        }
    }
}

/// Owned by the tracking task. Releases the registry entry on completion, or
/// on drop if the task is aborted first.
struct Lease {
    registry: Arc<JobRegistry>,
    entry: Option<Arc<TrackedJob>>,
}

impl Lease {
    fn finish(mut self, outcome: Outcome) {
        if let Some(entry) = self.entry.take() {
            // Release first so woken waiters never see a stale entry.
            self.registry.release(&entry);
            entry.publish(outcome);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.registry.release(&entry);
            entry.publish(Err(StatusError::Cancelled(entry.job_id.clone())));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::reconnect::Mode;
    use crate::resolver::ResolutionPath;

    fn resolution(job_id: &JobId, status: Status) -> Resolution {
        Resolution {
            job_id: job_id.clone(),
            status,
            path: ResolutionPath::Snapshot,
            transitions: Vec::new(),
            mode: Mode::Push,
            retry_count: 0,
            started_at: Utc::now(),
            resolved_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    #[tokio::test]
    async fn finished_operation_leaves_registry() {
        let registry = JobRegistry::new();
        let id = JobId::from("1");
        let outcome = Ok(resolution(&id, Status::Completed));

        let handle = registry.track(&id, || async move { outcome });
        assert_eq!(handle.status().await.unwrap(), Status::Completed);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_track_joins_one_operation() {
        let registry = JobRegistry::new();
        let id = JobId::from("1");
        let started = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let make = |id: JobId, started: Arc<std::sync::atomic::AtomicUsize>| {
            move || {
                started.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(resolution(&id, Status::Error))
                }
            }
        };

        let a = registry.track(&id, make(id.clone(), started.clone()));
        let b = registry.track(&id, make(id.clone(), started.clone()));
        assert_eq!(registry.len(), 1);

        let (a, b) = tokio::join!(a.resolution(), b.resolution());
        assert_eq!(started.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_waiters_and_is_idempotent() {
        let registry = JobRegistry::new();
        let id = JobId::from("1");

        let handle = registry.track(&id, || std::future::pending::<Outcome>());
        assert!(registry.is_tracked(&id));

        assert!(registry.close(&id));
        assert!(!registry.close(&id));
        assert_eq!(
            handle.resolution().await.unwrap_err(),
            StatusError::Cancelled(id.clone())
        );
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_reports_count() {
        let registry = JobRegistry::new();
        let handles: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|id| registry.track(&JobId::from(id), || std::future::pending::<Outcome>()))
            .collect();

        assert_eq!(registry.close_all(), 3);
        assert_eq!(registry.close_all(), 0);
        for handle in handles {
            assert!(matches!(
                handle.resolution().await,
                Err(StatusError::Cancelled(_))
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn outcome_is_written_once() {
        let registry = JobRegistry::new();
        let id = JobId::from("1");
        let done = Ok(resolution(&id, Status::Completed));

        let handle = registry.track(&id, || async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            done
        });
        registry.close(&id);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The late completion (if any) does not overwrite the cancellation.
        assert!(matches!(
            handle.try_outcome(),
            Some(Err(StatusError::Cancelled(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn retrack_after_completion_starts_fresh() {
        let registry = JobRegistry::new();
        let id = JobId::from("1");

        let first = Ok(resolution(&id, Status::Error));
        registry.track(&id, || async move { first }).status().await.unwrap();

        let second = Ok(resolution(&id, Status::Completed));
        let status = registry.track(&id, || async move { second }).status().await.unwrap();
        assert_eq!(status, Status::Completed);
    }
}
