//! Built-in walkthrough against the in-memory backend: one job, three
//! concurrent jobs, and pull-only tracking.

use std::time::Duration;

use futures::future::join_all;

use crate::client::StatusClient;
use crate::config::ClientConfig;
use crate::error::StatusError;
use crate::source::{JobPlan, MockBackend};
use crate::status::Status;

/// Outcome of one demo scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Run every scenario in order. `job_delay` is how long each job takes.
pub async fn run_demo(config: &ClientConfig, job_delay: Duration) -> Vec<ScenarioResult> {
    vec![
        single_job(config, job_delay).await,
        concurrent_jobs(config, job_delay).await,
        polling_only(config, job_delay).await,
    ]
}

async fn single_job(config: &ClientConfig, job_delay: Duration) -> ScenarioResult {
    let backend = MockBackend::with_default_plan(JobPlan::resolves(job_delay, Status::Completed));
    let client = StatusClient::new(backend, config.clone());

    let result = async {
        let job_id = client.create_job().await?;
        let initial = client.get_current_status(&job_id).await?;
        let resolution = client.wait_for_resolution(&job_id, None).await?;
        Ok::<_, StatusError>(format!(
            "job {job_id}: {initial} -> {} via {:?}",
            resolution.status, resolution.path
        ))
    }
    .await;

    scenario("single job", result)
}

async fn concurrent_jobs(config: &ClientConfig, job_delay: Duration) -> ScenarioResult {
    let backend = MockBackend::new();
    let outcomes = [Status::Completed, Status::Error, Status::Completed];
    let job_ids: Vec<_> = outcomes
        .iter()
        .enumerate()
        .map(|(i, outcome)| {
            let delay = job_delay + Duration::from_millis(500 * i as u64);
            backend.insert_job(format!("demo-{}", i + 1), JobPlan::resolves(delay, *outcome))
        })
        .collect();
    let client = StatusClient::new(backend, config.clone());

    let results = join_all(job_ids.iter().map(|id| client.wait_for_status(id, None))).await;

    let mut completed = Vec::new();
    let mut failed = Vec::new();
    let mut errors = Vec::new();
    for (id, result) in job_ids.iter().zip(results) {
        match result {
            Ok(Status::Completed) => completed.push(id.to_string()),
            Ok(_) => failed.push(id.to_string()),
            Err(e) => errors.push(e),
        }
    }

    let result = match errors.first() {
        Some(err) => Err(err.clone()),
        None => Ok(format!("completed: {completed:?}, failed: {failed:?}")),
    };
    scenario("concurrent jobs", result)
}

async fn polling_only(config: &ClientConfig, job_delay: Duration) -> ScenarioResult {
    let backend = MockBackend::with_default_plan(JobPlan::resolves(job_delay, Status::Completed));
    let client = StatusClient::new(backend, config.clone());
    let options = config.wait_options().with_polling(true);

    let result = async {
        let job_id = client.create_job().await?;
        let resolution = client.wait_for_resolution(&job_id, Some(options)).await?;
        if client.source().subscription_count() > 0 {
            return Err(StatusError::Protocol("push channel opened in pull-only mode".into()));
        }
        Ok::<_, StatusError>(format!(
            "job {job_id}: {} via {:?}",
            resolution.status, resolution.path
        ))
    }
    .await;

    scenario("polling only", result)
}

fn scenario(name: &'static str, result: Result<String, StatusError>) -> ScenarioResult {
    match result {
        Ok(detail) => ScenarioResult {
            name,
            passed: true,
            detail,
        },
        Err(err) => ScenarioResult {
            name,
            passed: false,
            detail: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn all_scenarios_pass() {
        let results = run_demo(&ClientConfig::default(), Duration::from_secs(2)).await;
        assert_eq!(results.len(), 3);
        for result in &results {
            assert!(result.passed, "{}: {}", result.name, result.detail);
        }
        assert!(results[1].detail.contains("demo-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn short_timeout_fails_scenarios() {
        let config = ClientConfig {
            timeout_ms: 500,
            ..ClientConfig::default()
        };
        let results = run_demo(&config, Duration::from_secs(2)).await;
        assert!(results.iter().all(|r| !r.passed));
        assert!(results[0].detail.contains("timed out"));
    }
}
