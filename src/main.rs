use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lustre_jobs::{
    run_jobs, validate_job_file, Config, Engine, FileError, Inventory, Job, JobControl,
    JobState, LockedFile, MemoryStore, Mode, SshExecutor,
};

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_validate(cli: &Config) -> bool {
    let mut ok = true;
    for path in &cli.job_files {
        match validate_job_file(path) {
            Ok(steps) => println!("{}: {} steps", path, steps),
            Err(e) => {
                println!("{}: {}", path, e);
                ok = false;
            }
        }
    }
    ok
}

async fn run_run(cli: &Config) -> Result<bool, FileError> {
    let jobs = cli
        .job_files
        .iter()
        .map(|path| Job::load(path))
        .collect::<Result<Vec<_>, _>>()?;

    // Hold the inventory for the whole run; steps read and write it throughout.
    let inventory = LockedFile::acquire(&cli.inventory).await?;
    let store = Arc::new(MemoryStore::new(Inventory::load(inventory.path())?));
    let engine = Arc::new(Engine::new(
        Arc::new(SshExecutor::new(cli.gateway())),
        store.clone(),
        &cli.agent,
    ));

    let runs = jobs
        .into_iter()
        .map(|job| (job, JobControl::new(), cli.resume_from))
        .collect();
    let reports = run_jobs(engine, runs).await;

    // Persist whatever the steps committed, including partial progress of failed jobs.
    store.snapshot().save(inventory.path())?;

    let mut ok = true;
    for report in &reports {
        match serde_yaml::to_string(report) {
            Ok(yaml) => println!("{}", yaml),
            Err(e) => tracing::error!(job_id = report.job_id, "failed to render report: {}", e),
        }
        if report.state != JobState::Complete {
            ok = false;
        }
    }
    Ok(ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Config::parse();
    init_logging();

    let ok = match cli.mode {
        Mode::Validate => run_validate(&cli),
        Mode::Run => match run_run(&cli).await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::error!("{}", e);
                false
            }
        },
    };

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
