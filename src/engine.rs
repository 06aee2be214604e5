//! Sequential job execution.
//!
//! Steps of one job run strictly in order, each only after its predecessor reached a
//! terminal outcome. Pause and abort are checked before every step. The first outcome
//! other than success halts the pass.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{Instrument, Span};

use crate::job::{Job, JobControl, StateTransition};
use crate::session::RemoteExecutor;
use crate::step::{CommandRecord, StepContext, StepOutcome};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Every step succeeded.
    Complete,
    /// Paused before `next_step` ran. Resume with `Engine::run_from`.
    Paused { next_step: usize },
    /// Aborted before the remaining steps ran.
    Aborted,
    /// `failed_step` did not succeed; its outcome says whether a retry is safe.
    Errored { failed_step: usize },
    /// Nothing was run: the job has no steps, or the pass started past its last step.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub name: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Result of one pass over a job, for the scheduler and the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: u64,
    #[serde(flatten)]
    pub state: JobState,
    /// Steps from where this pass started, in order.
    pub steps: Vec<StepRecord>,
    /// Set only when the final step succeeded.
    pub committed: Option<StateTransition>,
    pub last_command: Option<CommandRecord>,
}

impl JobReport {
    pub fn outcome(&self, index: usize) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|r| r.index == index)
            .map(|r| &r.outcome)
    }

    /// The outcome that halted the job, if it errored.
    pub fn failure(&self) -> Option<&StepOutcome> {
        match self.state {
            JobState::Errored { failed_step } => self.outcome(failed_step),
            _ => None,
        }
    }
}

pub struct Engine {
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<dyn Store>,
    agent: String,
}

impl Engine {
    pub fn new(executor: Arc<dyn RemoteExecutor>, store: Arc<dyn Store>, agent: &str) -> Self {
        Self {
            executor,
            store,
            agent: agent.to_string(),
        }
    }

    /// Run a job from its first step. All logging happens inside `span`.
    pub async fn run(&self, job: &Job, control: &JobControl, span: Span) -> JobReport {
        self.run_from(job, control, 0, span).await
    }

    /// Run a job starting at step `start`, e.g. to resume after a pause.
    pub async fn run_from(
        &self,
        job: &Job,
        control: &JobControl,
        start: usize,
        span: Span,
    ) -> JobReport {
        self.run_steps(job, control, start).instrument(span).await
    }

    async fn run_steps(&self, job: &Job, control: &JobControl, start: usize) -> JobReport {
        if start >= job.steps.len() {
            let reason = format!(
                "cannot start at step {} of a job with {} steps",
                start,
                job.steps.len()
            );
            tracing::error!(job_id = job.id, "{}", reason);
            return JobReport {
                job_id: job.id,
                state: JobState::Rejected { reason },
                steps: Vec::new(),
                committed: None,
                last_command: None,
            };
        }

        let last_command = Mutex::new(None);
        let mut records: Vec<StepRecord> = job
            .steps
            .iter()
            .enumerate()
            .skip(start)
            .map(|(index, step)| StepRecord {
                index,
                name: step.name().to_string(),
                outcome: StepOutcome::NotRun,
            })
            .collect();
        let mut state = JobState::Complete;
        let mut committed = None;

        tracing::info!(job_id = job.id, description = %job.description, start, "running job");
        for record in 0..records.len() {
            let index = records[record].index;
            if control.is_aborted().await {
                tracing::warn!(job_id = job.id, index, "job aborted, skipping remaining steps");
                for skipped in &mut records[record..] {
                    skipped.outcome = StepOutcome::Aborted;
                }
                state = JobState::Aborted;
                break;
            }
            if control.is_paused().await {
                tracing::info!(job_id = job.id, index, "job paused");
                for skipped in &mut records[record..] {
                    skipped.outcome = StepOutcome::Paused;
                }
                state = JobState::Paused { next_step: index };
                break;
            }

            let step = &job.steps[index];
            let ctx = StepContext::new(
                self.store.as_ref(),
                self.executor.as_ref(),
                &self.agent,
                step,
                &last_command,
            );
            let span = tracing::info_span!("step", index, name = step.name());
            tracing::info!(parent: &span, "running {}", step);
            match step.execute(&ctx).instrument(span.clone()).await {
                Ok(()) => {
                    records[record].outcome = StepOutcome::Succeeded;
                    if step.is_final() {
                        committed = job.transition.clone();
                        if let Some(transition) = &committed {
                            tracing::info!(parent: &span, %transition, "state transition committed");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(parent: &span, "{}", e);
                    records[record].outcome = StepOutcome::from(e);
                    state = JobState::Errored { failed_step: index };
                    break;
                }
            }
        }

        let last_command = last_command
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        JobReport {
            job_id: job.id,
            state,
            steps: records,
            committed,
            last_command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HostId;
    use crate::session::{GatewayConfig, SshExecutor};
    use crate::store::MemoryStore;

    fn record(index: usize, outcome: StepOutcome) -> StepRecord {
        StepRecord {
            index,
            name: "mount".to_string(),
            outcome,
        }
    }

    #[test]
    fn test_failure_points_at_failed_step() {
        let report = JobReport {
            job_id: 1,
            state: JobState::Errored { failed_step: 3 },
            steps: vec![
                record(2, StepOutcome::Succeeded),
                record(
                    3,
                    StepOutcome::DirtyFailed {
                        reason: "lost".to_string(),
                    },
                ),
            ],
            committed: None,
            last_command: None,
        };
        assert!(matches!(
            report.failure(),
            Some(StepOutcome::DirtyFailed { .. })
        ));
        assert_eq!(report.outcome(2), Some(&StepOutcome::Succeeded));
        assert_eq!(report.outcome(0), None);
    }

    #[tokio::test]
    async fn test_nothing_to_run_is_rejected() {
        let engine = Engine::new(
            Arc::new(SshExecutor::new(GatewayConfig::default())),
            Arc::new(MemoryStore::default()),
            "hydra-agent",
        );
        let control = JobControl::new();

        let empty = Job::new(1, "Empty", None, vec![]);
        let report = engine.run(&empty, &control, Span::none()).await;
        assert!(matches!(report.state, JobState::Rejected { .. }));
        assert!(report.steps.is_empty());

        let job = crate::job::start_lnet(2, HostId(1));
        let report = engine.run_from(&job, &control, 1, Span::none()).await;
        assert!(matches!(report.state, JobState::Rejected { .. }));
        assert!(report.committed.is_none());
        assert!(report.last_command.is_none());
    }

    #[test]
    fn test_report_serializes_flat() {
        let report = JobReport {
            job_id: 7,
            state: JobState::Paused { next_step: 1 },
            steps: vec![record(1, StepOutcome::Paused)],
            committed: None,
            last_command: None,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["state"], "paused");
        assert_eq!(value["next_step"], 1);
        assert_eq!(value["steps"][0]["outcome"], "paused");
        assert!(report.failure().is_none());
    }
}
