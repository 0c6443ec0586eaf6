//! Per-job resolution: snapshot, push with reconnection, fallback to polling,
//! all inside one absolute deadline.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep, timeout_at};

use crate::config::WaitOptions;
use crate::error::StatusError;
use crate::poller::{BackoffPoller, PollStart};
use crate::reconnect::{
    ConnectionState, Directive, DowngradeReason, Mode, ReconnectionController, TransportSignal,
};
use crate::source::{SourceEvent, StatusSource};
use crate::status::{JobId, Status};

/// States a single wait passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolverState {
    Init,
    CheckingSnapshot,
    Resolved,
    AttemptingPush,
    ResolvedViaPush,
    Downgrading,
    Polling,
    ResolvedViaPoll,
    TimedOut,
}

impl fmt::Display for ResolverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverState::Init => write!(f, "INIT"),
            ResolverState::CheckingSnapshot => write!(f, "CHECKING_SNAPSHOT"),
            ResolverState::Resolved => write!(f, "RESOLVED"),
            ResolverState::AttemptingPush => write!(f, "ATTEMPTING_PUSH"),
            ResolverState::ResolvedViaPush => write!(f, "RESOLVED_VIA_PUSH"),
            ResolverState::Downgrading => write!(f, "DOWNGRADING"),
            ResolverState::Polling => write!(f, "POLLING"),
            ResolverState::ResolvedViaPoll => write!(f, "RESOLVED_VIA_POLL"),
            ResolverState::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// Which channel produced the terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionPath {
    Snapshot,
    Push,
    Poll,
}

/// Record of a wait that ended with a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub job_id: JobId,
    pub status: Status,
    pub path: ResolutionPath,
    pub transitions: Vec<ResolverState>,
    pub mode: Mode,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

enum PushOutcome {
    Resolved(Status),
    Downgraded(DowngradeReason),
}

/// Walks one job through the resolver states.
pub struct JobResolver<S> {
    source: Arc<S>,
    options: WaitOptions,
    controller: ReconnectionController,
    poller: BackoffPoller,
}

/// Mutable bookkeeping of one wait.
struct Progress {
    transitions: Vec<ResolverState>,
    connection: ConnectionState,
}

impl Progress {
    fn enter(&mut self, job_id: &JobId, state: ResolverState) {
        tracing::debug!(job_id = %job_id, state = %state, "resolver transition");
        self.transitions.push(state);
    }
}

impl<S: StatusSource> JobResolver<S> {
    pub fn new(source: Arc<S>, options: WaitOptions) -> Self {
        Self {
            controller: ReconnectionController::new(options.retry_policy()),
            poller: BackoffPoller::new(options.poll_interval, options.max_poll_interval),
            source,
            options,
        }
    }

    pub fn options(&self) -> &WaitOptions {
        &self.options
    }

    /// Wait for the job's terminal status, giving up at `timeout` from now.
    pub async fn resolve(&self, job_id: &JobId) -> Result<Resolution, StatusError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = started + self.options.timeout;

        let mut progress = Progress {
            transitions: vec![ResolverState::Init],
            connection: ConnectionState::new(self.options.use_polling),
        };

        let outcome = match timeout_at(deadline, self.run(job_id, deadline, &mut progress)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StatusError::Timeout(job_id.clone())),
        };

        match outcome {
            Ok((status, path)) => {
                let elapsed = started.elapsed();
                tracing::info!(
                    job_id = %job_id,
                    status = %status,
                    path = ?path,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "job resolved"
                );
                Ok(Resolution {
                    job_id: job_id.clone(),
                    status,
                    path,
                    transitions: progress.transitions,
                    mode: progress.connection.mode,
                    retry_count: progress.connection.retry_count,
                    started_at,
                    resolved_at: Utc::now(),
                    elapsed_ms: elapsed.as_millis() as u64,
                })
            }
            Err(err) => {
                if matches!(err, StatusError::Timeout(_)) {
                    progress.enter(job_id, ResolverState::TimedOut);
                    tracing::warn!(job_id = %job_id, timeout_ms = self.options.timeout.as_millis() as u64, "gave up waiting for job");
                } else {
                    tracing::warn!(job_id = %job_id, error = %err, "job status could not be resolved");
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        job_id: &JobId,
        deadline: Instant,
        progress: &mut Progress,
    ) -> Result<(Status, ResolutionPath), StatusError> {
        progress.enter(job_id, ResolverState::CheckingSnapshot);
        let snapshot = self.source.query_once(job_id).await?;
        if snapshot.is_terminal() {
            progress.enter(job_id, ResolverState::Resolved);
            return Ok((snapshot, ResolutionPath::Snapshot));
        }

        let start = if progress.connection.mode == Mode::Push {
            progress.enter(job_id, ResolverState::AttemptingPush);
            match self.watch_push(job_id, &mut progress.connection).await {
                PushOutcome::Resolved(status) => {
                    progress.enter(job_id, ResolverState::ResolvedViaPush);
                    return Ok((status, ResolutionPath::Push));
                }
                PushOutcome::Downgraded(reason) => {
                    tracing::info!(job_id = %job_id, %reason, "falling back to polling");
                    progress.enter(job_id, ResolverState::Downgrading);
                    PollStart::Immediate
                }
            }
        } else {
            PollStart::AfterInterval
        };

        progress.enter(job_id, ResolverState::Polling);
        let status = self
            .poller
            .poll_until_terminal(self.source.as_ref(), job_id, deadline, start)
            .await?;
        progress.enter(job_id, ResolverState::ResolvedViaPoll);
        Ok((status, ResolutionPath::Poll))
    }

    /// Hold a push channel open until a terminal status arrives or the
    /// controller abandons push. At most one subscription is live at a time.
    async fn watch_push(&self, job_id: &JobId, connection: &mut ConnectionState) -> PushOutcome {
        loop {
            self.controller.begin_attempt(connection);
            let mut subscription = self.source.subscribe(job_id);

            let retry = loop {
                let signal = match subscription.next_event().await {
                    Some(SourceEvent::Status(event)) => {
                        if event.job_id == *job_id && event.status.is_terminal() {
                            subscription.close();
                            return PushOutcome::Resolved(event.status);
                        }
                        continue;
                    }
                    Some(SourceEvent::Connected) => TransportSignal::Connected,
                    Some(SourceEvent::ConnectionError(msg)) => TransportSignal::ConnectionLost(msg),
                    Some(SourceEvent::ServerError(msg)) => TransportSignal::ChannelError(msg),
                    Some(SourceEvent::ProtocolError(msg)) => TransportSignal::ProtocolViolation(msg),
                    None => TransportSignal::ConnectionLost("push channel closed".into()),
                };

                match self.controller.next(connection, signal) {
                    Directive::Continue | Directive::Ignore => {}
                    Directive::Retry(delay) => break Ok(delay),
                    Directive::Downgrade(reason) => break Err(reason),
                }
            };
            subscription.close();

            let delay = match retry {
                Ok(delay) => delay,
                Err(reason) => return PushOutcome::Downgraded(reason),
            };
            tracing::debug!(
                job_id = %job_id,
                attempt = connection.retry_count,
                max_retries = self.controller.policy().max_retries,
                delay_ms = delay.as_millis() as u64,
                "push connection lost, retrying"
            );
            sleep(delay).await;
        }
    }
}
