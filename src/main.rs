use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobwatch::cli::{Cli, Command};
use jobwatch::demo::run_demo;
use jobwatch::ui::WaitProgress;
use jobwatch::{ClientConfig, JobId, StatusClient};

const DEMO_JOB_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = ClientConfig::load()?;
    cli.apply(&mut config);

    match cli.command {
        Command::Create => {
            let client = StatusClient::connect(config)?;
            let job_id = client.create_job().await?;
            println!("{job_id}");
        }
        Command::Status { job_id } => {
            let client = StatusClient::connect(config)?;
            let status = client.get_current_status(&JobId::from(job_id)).await?;
            println!("{status}");
        }
        Command::Wait { job_id } => {
            let client = StatusClient::connect(config)?;
            return wait(&client, JobId::from(job_id)).await;
        }
        Command::Run => {
            let client = StatusClient::connect(config)?;
            let job_id = client.create_job().await?;
            println!("Created job {job_id}");
            return wait(&client, job_id).await;
        }
        Command::Demo => {
            let results = run_demo(&config, DEMO_JOB_DELAY).await;
            let mut all_passed = true;
            for result in &results {
                let mark = if result.passed { "PASS" } else { "FAIL" };
                println!("[{mark}] {}: {}", result.name, result.detail);
                all_passed &= result.passed;
            }
            if !all_passed {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn wait(client: &StatusClient<jobwatch::HttpStatusSource>, job_id: JobId) -> Result<ExitCode> {
    let progress = WaitProgress::start(&job_id);
    let outcome = client.wait_for_resolution(&job_id, None).await;
    progress.finish(&outcome);
    let resolution = outcome?;
    progress.print_resolution(&resolution);
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "jobwatch=debug" } else { "jobwatch=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
