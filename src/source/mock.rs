//! In-memory job service.
//!
//! Stands in for the real backend in tests and in `jobwatch demo`. All timing
//! goes through `tokio::time`, so scenarios run deterministically under a
//! paused test clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use super::{SUBSCRIPTION_BUFFER, SourceEvent, StatusSource, Subscription};
use crate::error::StatusError;
use crate::status::{JobId, Status, StatusEvent};

/// How the push channel of a job behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushBehavior {
    /// Connect, report the current status, report the terminal status when reached.
    Deliver,
    /// Every connection attempt fails.
    Refuse,
    /// The first `drops` connections are lost right after connecting; later
    /// ones deliver.
    Flaky { drops: u32 },
    /// Connect, then report a server-side error.
    ServerError(String),
    /// Connect and never say anything.
    Silent,
}

/// Scripted lifecycle of one job.
#[derive(Debug, Clone)]
pub struct JobPlan {
    /// Time from creation until the job reaches `outcome`; `None` never resolves.
    pub resolve_after: Option<Duration>,
    pub outcome: Status,
    pub push: PushBehavior,
}

impl JobPlan {
    pub fn resolves(after: Duration, outcome: Status) -> Self {
        Self {
            resolve_after: Some(after),
            outcome,
            push: PushBehavior::Deliver,
        }
    }

    pub fn never() -> Self {
        Self {
            resolve_after: None,
            outcome: Status::Pending,
            push: PushBehavior::Deliver,
        }
    }

    pub fn with_push(mut self, push: PushBehavior) -> Self {
        self.push = push;
        self
    }
}

impl Default for JobPlan {
    fn default() -> Self {
        Self::resolves(Duration::from_secs(5), Status::Completed)
    }
}

#[derive(Debug)]
struct MockJob {
    resolves_at: Option<Instant>,
    outcome: Status,
    push: PushBehavior,
    connections: u32,
}

impl MockJob {
    fn status_at(&self, now: Instant) -> Status {
        match self.resolves_at {
            Some(at) if now >= at => self.outcome,
            _ => Status::Pending,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    jobs: Mutex<HashMap<JobId, MockJob>>,
    default_plan: Mutex<JobPlan>,
    fail_queries: AtomicBool,
    queries: AtomicUsize,
    subscriptions: AtomicUsize,
    live_subscriptions: AtomicUsize,
}

/// Cheaply cloneable handle to one in-memory job service.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    inner: Arc<Inner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose [`StatusSource::create_job`] uses `plan`.
    pub fn with_default_plan(plan: JobPlan) -> Self {
        let backend = Self::new();
        *lock(&backend.inner.default_plan) = plan;
        backend
    }

    /// Register a job under a caller-chosen id. The plan's clock starts now.
    pub fn insert_job(&self, job_id: impl Into<JobId>, plan: JobPlan) -> JobId {
        let job_id = job_id.into();
        let job = MockJob {
            resolves_at: plan.resolve_after.map(|after| Instant::now() + after),
            outcome: plan.outcome,
            push: plan.push,
            connections: 0,
        };
        lock(&self.inner.jobs).insert(job_id.clone(), job);
        job_id
    }

    /// Make every subsequent query fail with a transport error (or stop doing so).
    pub fn fail_queries(&self, fail: bool) {
        self.inner.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.inner.queries.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.load(Ordering::SeqCst)
    }

    /// Subscriptions opened and not yet released.
    pub fn live_subscriptions(&self) -> usize {
        self.inner.live_subscriptions.load(Ordering::SeqCst)
    }
}

impl StatusSource for MockBackend {
    async fn create_job(&self) -> Result<JobId, StatusError> {
        let plan = lock(&self.inner.default_plan).clone();
        Ok(self.insert_job(Uuid::new_v4().to_string(), plan))
    }

    async fn query_once(&self, job_id: &JobId) -> Result<Status, StatusError> {
        self.inner.queries.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_queries.load(Ordering::SeqCst) {
            return Err(StatusError::Transport("connection refused".into()));
        }
        let jobs = lock(&self.inner.jobs);
        let job = jobs
            .get(job_id)
            .ok_or_else(|| StatusError::NotFound(job_id.clone()))?;
        Ok(job.status_at(Instant::now()))
    }

    fn subscribe(&self, job_id: &JobId) -> Subscription {
        self.inner.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.inner.live_subscriptions.fetch_add(1, Ordering::SeqCst);

        let script = {
            let mut jobs = lock(&self.inner.jobs);
            jobs.get_mut(job_id).map(|job| {
                job.connections += 1;
                Script {
                    push: job.push.clone(),
                    connection: job.connections,
                    resolves_at: job.resolves_at,
                    outcome: job.outcome,
                }
            })
        };

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let emitter = tokio::spawn(emit(job_id.clone(), script, tx));
        let inner = self.inner.clone();
        Subscription::new(rx, move || {
            emitter.abort();
            inner.live_subscriptions.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

struct Script {
    push: PushBehavior,
    connection: u32,
    resolves_at: Option<Instant>,
    outcome: Status,
}

async fn emit(job_id: JobId, script: Option<Script>, tx: mpsc::Sender<SourceEvent>) {
    let Some(script) = script else {
        let _ = tx
            .send(SourceEvent::ServerError(format!("unknown job {job_id}")))
            .await;
        return;
    };

    match script.push {
        PushBehavior::Refuse => {
            let _ = tx
                .send(SourceEvent::ConnectionError("connection refused".into()))
                .await;
            return;
        }
        PushBehavior::Flaky { drops } if script.connection <= drops => {
            let _ = tx.send(SourceEvent::Connected).await;
            let _ = tx
                .send(SourceEvent::ConnectionError("connection reset".into()))
                .await;
            return;
        }
        PushBehavior::ServerError(message) => {
            let _ = tx.send(SourceEvent::Connected).await;
            let _ = tx.send(SourceEvent::ServerError(message)).await;
        }
        PushBehavior::Silent => {
            let _ = tx.send(SourceEvent::Connected).await;
        }
        PushBehavior::Deliver | PushBehavior::Flaky { .. } => {
            let status_event = |status| {
                SourceEvent::Status(StatusEvent {
                    job_id: job_id.clone(),
                    status,
                })
            };
            let current = match script.resolves_at {
                Some(at) if Instant::now() >= at => script.outcome,
                _ => Status::Pending,
            };
            if tx.send(SourceEvent::Connected).await.is_err()
                || tx.send(status_event(current)).await.is_err()
            {
                return;
            }
            if let Some(at) = script.resolves_at
                && !current.is_terminal()
            {
                tokio::time::sleep_until(at).await;
                if tx.send(status_event(script.outcome)).await.is_err() {
                    return;
                }
            }
        }
    }

    // Keep the channel open until the subscriber releases it.
    std::future::pending::<()>().await;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
