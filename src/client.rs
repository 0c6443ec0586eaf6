use std::sync::Arc;

use crate::config::{ClientConfig, WaitOptions};
use crate::error::StatusError;
use crate::registry::{JobRegistry, ResolverHandle};
use crate::resolver::{JobResolver, Resolution};
use crate::source::{HttpStatusSource, StatusSource};
use crate::status::{JobId, Status};

/// Entry point for callers: create jobs, read snapshots, wait for terminal
/// status across many jobs at once.
///
/// A job whose translation failed resolves successfully with
/// [`Status::Error`]; only connectivity, protocol, timeout and cancellation
/// problems are returned as [`StatusError`].
pub struct StatusClient<S> {
    source: Arc<S>,
    config: ClientConfig,
    registry: Arc<JobRegistry>,
}

impl StatusClient<HttpStatusSource> {
    /// Client talking HTTP to `config.server_url`.
    pub fn connect(config: ClientConfig) -> Result<Self, StatusError> {
        let source = HttpStatusSource::new(config.server_url.clone(), config.request_timeout())?;
        Ok(Self::new(source, config))
    }
}

impl<S: StatusSource> StatusClient<S> {
    pub fn new(source: S, config: ClientConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
            registry: JobRegistry::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn create_job(&self) -> Result<JobId, StatusError> {
        let job_id = self.source.create_job().await?;
        tracing::info!(job_id = %job_id, "job created");
        Ok(job_id)
    }

    /// Single status read, outside the wait machinery.
    pub async fn get_current_status(&self, job_id: &JobId) -> Result<Status, StatusError> {
        self.source.query_once(job_id).await
    }

    /// Start (or join) tracking of `job_id`. A caller joining an operation
    /// already in flight shares its options and deadline.
    pub fn track(&self, job_id: &JobId, options: Option<WaitOptions>) -> ResolverHandle {
        let options = options.unwrap_or_else(|| self.config.wait_options());
        let source = Arc::clone(&self.source);
        let job = job_id.clone();
        self.registry.track(job_id, move || async move {
            JobResolver::new(source, options).resolve(&job).await
        })
    }

    /// Wait until the job is terminal and return its status.
    pub async fn wait_for_status(
        &self,
        job_id: &JobId,
        options: Option<WaitOptions>,
    ) -> Result<Status, StatusError> {
        self.track(job_id, options).status().await
    }

    /// Like [`Self::wait_for_status`] but returns the full resolution record.
    pub async fn wait_for_resolution(
        &self,
        job_id: &JobId,
        options: Option<WaitOptions>,
    ) -> Result<Resolution, StatusError> {
        self.track(job_id, options).resolution().await
    }

    /// Cancel tracking of one job. Safe to call repeatedly or after resolution.
    pub fn close_job(&self, job_id: &JobId) -> bool {
        self.registry.close(job_id)
    }

    /// Cancel tracking of every job. Returns how many were still tracked.
    pub fn close_all(&self) -> usize {
        self.registry.close_all()
    }

    /// Number of jobs with a wait in flight.
    pub fn tracked_jobs(&self) -> usize {
        self.registry.len()
    }
}

impl<S> Drop for StatusClient<S> {
    fn drop(&mut self) {
        self.registry.close_all();
    }
}
