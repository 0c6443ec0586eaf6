use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout_at};

use crate::error::StatusError;
use crate::source::StatusSource;
use crate::status::{JobId, Status};

const BACKOFF_FACTOR: f64 = 1.5;

/// Capped exponential wait sequence: `initial`, ×1.5 each step, never above `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    /// The wait to use now; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(BACKOFF_FACTOR).min(self.max);
        delay
    }
}

/// Whether the first query happens right away or after one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStart {
    /// Query first. The last observation may be stale.
    Immediate,
    /// Wait first. The caller has just seen `Pending`.
    AfterInterval,
}

/// Repeats one-shot queries until the job is terminal or the deadline passes.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPoller {
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
}

impl Default for BackoffPoller {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_poll_interval: Duration::from_millis(5000),
        }
    }
}

impl BackoffPoller {
    pub fn new(poll_interval: Duration, max_poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            max_poll_interval,
        }
    }

    /// Poll `job_id` until it is terminal.
    ///
    /// Query errors are returned as-is on first occurrence; only `Pending`
    /// leads to another wait. `deadline` is absolute and no wait runs past it.
    pub async fn poll_until_terminal<S: StatusSource>(
        &self,
        source: &S,
        job_id: &JobId,
        deadline: Instant,
        start: PollStart,
    ) -> Result<Status, StatusError> {
        let polling = async {
            let mut backoff = Backoff::new(self.poll_interval, self.max_poll_interval);
            let mut query_now = start == PollStart::Immediate;
            loop {
                if query_now {
                    let status = source.query_once(job_id).await?;
                    if status.is_terminal() {
                        return Ok(status);
                    }
                }
                query_now = true;

                let delay = backoff.next_delay();
                let wake = Instant::now() + delay;
                if wake >= deadline {
                    // The next query would land past the deadline.
                    sleep_until(deadline).await;
                    return Err(StatusError::Timeout(job_id.clone()));
                }
                tracing::debug!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "job still pending, backing off");
                sleep_until(wake).await;
            }
        };

        timeout_at(deadline, polling)
            .await
            .unwrap_or_else(|_| Err(StatusError::Timeout(job_id.clone())))
    }
}
