//! Running independent jobs concurrently.
//!
//! Each job gets its own tokio task and reports back over a channel when it finishes.
//! No locking happens between jobs: callers must not run two jobs that change the
//! same target at the same time.

use std::sync::Arc;

use crate::engine::{Engine, JobReport};
use crate::job::{Job, JobControl};

/// Message sent from a job task to the scheduler when the job finishes a pass.
#[derive(Debug)]
pub struct JobCompletion {
    pub job_id: u64,
    pub report: JobReport,
}

/// Spawns an async task to run a job from step `start`.
pub fn spawn_job(
    engine: Arc<Engine>,
    job: Job,
    control: JobControl,
    start: usize,
    completion_tx: flume::Sender<JobCompletion>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let span = tracing::info_span!("job", job_id = job.id);
        let report = engine.run_from(&job, &control, start, span).await;

        // The receiver may have gone away if the scheduler is shutting down.
        let _ = completion_tx.send(JobCompletion {
            job_id: job.id,
            report,
        });
    })
}

/// Run every job concurrently and collect their reports in completion order.
pub async fn run_jobs(engine: Arc<Engine>, jobs: Vec<(Job, JobControl, usize)>) -> Vec<JobReport> {
    let (completion_tx, completion_rx) = flume::unbounded::<JobCompletion>();
    let tasks: Vec<_> = jobs
        .into_iter()
        .map(|(job, control, start)| {
            spawn_job(
                Arc::clone(&engine),
                job,
                control,
                start,
                completion_tx.clone(),
            )
        })
        .collect();
    drop(completion_tx);

    let mut reports = Vec::with_capacity(tasks.len());
    while let Ok(completion) = completion_rx.recv_async().await {
        tracing::debug!(job_id = completion.job_id, "job finished");
        reports.push(completion.report);
    }
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            tracing::error!("job task panicked: {}", e);
        }
    }
    reports
}
