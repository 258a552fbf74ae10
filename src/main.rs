// Command-line runner: analyzes each media file given on the command line and
// prints one JSON record per file to stdout. Logs go to stderr.

use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::{Context, bail};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strobe_guard::{CoordinatorConfig, CoordinatorError, JobCoordinator, JobId, JobResult, MediaJob, MediaStore};

#[derive(Serialize)]
struct Report {
    file: PathBuf,
    job_id: JobId,
    #[serde(flatten)]
    result: JobResult,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strobe_guard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let files: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if files.is_empty() {
        bail!("usage: strobe_guard <media-file>...");
    }

    let config = CoordinatorConfig::from_env().context("invalid configuration")?;
    let store = MediaStore::new();
    let coordinator = JobCoordinator::new(config, store.clone())?;

    let mut outstanding: VecDeque<(PathBuf, JobId)> = VecDeque::new();
    let mut reports = Vec::with_capacity(files.len());

    for file in files {
        let bytes = tokio::fs::read(&file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?;
        let handle = file.display().to_string();
        store.insert(handle.clone(), bytes).await;

        let job = MediaJob::new(handle);
        loop {
            match coordinator.submit(job.clone()).await {
                Ok(job_id) => {
                    outstanding.push_back((file, job_id));
                    break;
                }
                Err(CoordinatorError::QueueFull { .. }) => {
                    // Make room by settling the oldest job before retrying.
                    let Some((done, job_id)) = outstanding.pop_front() else {
                        bail!("job queue rejected a submission with nothing outstanding");
                    };
                    reports.push(collect(&coordinator, &store, done, job_id).await?);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    while let Some((file, job_id)) = outstanding.pop_front() {
        reports.push(collect(&coordinator, &store, file, job_id).await?);
    }
    coordinator.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

async fn collect(
    coordinator: &JobCoordinator<MediaStore>,
    store: &MediaStore,
    file: PathBuf,
    job_id: JobId,
) -> anyhow::Result<Report> {
    let result = coordinator.wait(job_id).await?;
    coordinator.forget(job_id).await?;
    store.remove(&file.display().to_string().into()).await;
    Ok(Report { file, job_id, result })
}
