//! Adapters over the backend's two I/O primitives.
//!
//! A [`StatusSource`] answers one-shot status queries and opens push
//! subscriptions. It holds no retry or backoff policy; that lives in
//! [`crate::reconnect`] and [`crate::poller`].

pub mod http;
pub mod mock;
pub mod sse;

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::StatusError;
use crate::status::{JobId, Status, StatusEvent};

pub use http::HttpStatusSource;
pub use mock::{JobPlan, MockBackend, PushBehavior};

/// Buffered events per subscription before the producer waits on the consumer.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 32;

/// Something delivered on a push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// The channel is established.
    Connected,
    /// A status update for some job.
    Status(StatusEvent),
    /// Connecting failed, or an established channel was lost.
    ConnectionError(String),
    /// The server reported an error on the channel.
    ServerError(String),
    /// A payload could not be understood.
    ProtocolError(String),
}

/// Uniform access to the backend job service.
pub trait StatusSource: Send + Sync + 'static {
    /// Ask the backend to start a new job.
    fn create_job(&self) -> impl Future<Output = Result<JobId, StatusError>> + Send;

    /// One request/response round trip for the job's current status. No retry.
    fn query_once(&self, job_id: &JobId)
    -> impl Future<Output = Result<Status, StatusError>> + Send;

    /// Open a push channel for the job. Connection progress and failures are
    /// reported as events on the returned subscription.
    fn subscribe(&self, job_id: &JobId) -> Subscription;
}

type Closer = Box<dyn FnOnce() + Send>;

/// A live push channel. Released on [`Subscription::close`] or on drop,
/// whichever comes first.
pub struct Subscription {
    events: mpsc::Receiver<SourceEvent>,
    closer: Option<Closer>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<SourceEvent>, closer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            events,
            closer: Some(Box::new(closer)),
        }
    }

    /// Wait for the next event. `None` once the producer has gone away or the
    /// subscription was closed.
    pub async fn next_event(&mut self) -> Option<SourceEvent> {
        if self.closer.is_none() {
            return None;
        }
        self.events.recv().await
    }

    /// Release the channel. Calling this more than once does nothing.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            self.events.close();
            closer();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_subscription() -> (mpsc::Sender<SourceEvent>, Subscription, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::channel(4);
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        let sub = Subscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (tx, sub, closes)
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_tx, mut sub, closes) = counting_subscription();
        sub.close();
        sub.close();
        drop(sub);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drop_releases_channel() {
        let (_tx, sub, closes) = counting_subscription();
        drop(sub);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_subscription_yields_nothing() {
        let (tx, mut sub, _closes) = counting_subscription();
        tx.send(SourceEvent::Connected).await.unwrap();
        assert_eq!(sub.next_event().await, Some(SourceEvent::Connected));
        sub.close();
        assert!(tx.send(SourceEvent::Connected).await.is_err());
        assert_eq!(sub.next_event().await, None);
    }
}
