//! Jobs: ordered steps that move a stateful entity from one state to another.

use std::fmt;
use std::fs::File;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::FileError;
use crate::model::{ConfParamId, HostId, TargetId, TargetMountId};
use crate::step::{Step, StepKind};

/// The kind of record a job changes the state of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Host,
    Target,
    TargetMount,
}

/// Which entity a job moves, and between which states. Fixed when the job is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub entity: EntityKind,
    pub entity_id: u32,
    pub old_state: String,
    pub new_state: String,
}

impl StateTransition {
    pub fn new(entity: EntityKind, entity_id: u32, old_state: &str, new_state: &str) -> Self {
        Self {
            entity,
            entity_id,
            old_state: old_state.to_string(),
            new_state: new_state.to_string(),
        }
    }
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} {}: {} -> {}",
            self.entity, self.entity_id, self.old_state, self.new_state
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub transition: Option<StateTransition>,
    pub steps: Vec<Step>,
}

impl Job {
    /// Build a job whose last step is final.
    pub fn new(
        id: u64,
        description: &str,
        transition: Option<StateTransition>,
        kinds: Vec<StepKind>,
    ) -> Self {
        let mut steps: Vec<Step> = kinds.into_iter().map(Step::new).collect();
        if let Some(last) = steps.last_mut() {
            last.mark_final();
        }
        Self {
            id,
            description: description.to_string(),
            transition,
            steps,
        }
    }

    /// Read a job from a YAML file. When no step is marked final, the last one is.
    pub fn load(path: &str) -> Result<Self, FileError> {
        let file = File::open(path).map_err(|source| FileError::Io {
            path: path.to_string(),
            source,
        })?;
        let mut job: Job = serde_yaml::from_reader(file).map_err(|source| FileError::Yaml {
            path: path.to_string(),
            source,
        })?;
        if !job.steps.iter().any(Step::is_final) {
            if let Some(last) = job.steps.last_mut() {
                last.mark_final();
            }
        }
        job.validate().map_err(|reason| FileError::Invalid {
            path: path.to_string(),
            reason,
        })?;
        Ok(job)
    }

    /// A job needs at least one step, and only its last step may be final.
    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err(format!("job {} has no steps", self.id));
        }
        let last = self.steps.len() - 1;
        for (i, step) in self.steps.iter().enumerate() {
            if step.is_final() && i != last {
                return Err(format!(
                    "step {} ({}) is marked final but is not the last step",
                    i, step
                ));
            }
        }
        Ok(())
    }
}

/// Validates that a job file is properly parsable.
/// Returns Ok(step_count) if valid.
pub fn validate_job_file(path: &str) -> Result<usize, FileError> {
    Job::load(path).map(|job| job.steps.len())
}

/// Pause and abort flags, checked by the engine before every step.
///
/// Clones share the same flags, so the scheduler keeps one and hands one to the engine.
#[derive(Debug, Clone, Default)]
pub struct JobControl {
    paused: Arc<Mutex<bool>>,
    aborted: Arc<Mutex<bool>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pause(&self) {
        *self.paused.lock().await = true;
    }

    pub async fn unpause(&self) {
        *self.paused.lock().await = false;
    }

    pub async fn abort(&self) {
        *self.aborted.lock().await = true;
    }

    pub async fn is_paused(&self) -> bool {
        *self.paused.lock().await
    }

    pub async fn is_aborted(&self) -> bool {
        *self.aborted.lock().await
    }
}

// Job catalogue. State names follow the lifecycle of each entity kind.

pub fn format_target(id: u64, target: TargetId) -> Job {
    Job::new(
        id,
        "Format target",
        Some(StateTransition::new(
            EntityKind::Target,
            target.0,
            "unformatted",
            "formatted",
        )),
        vec![StepKind::Mkfs { target }],
    )
}

/// Registration runs on the target's primary mount.
pub fn register_target(id: u64, target: TargetId, primary_mount: TargetMountId) -> Job {
    Job::new(
        id,
        "Register target",
        Some(StateTransition::new(
            EntityKind::Target,
            target.0,
            "formatted",
            "registered",
        )),
        vec![StepKind::RegisterTarget {
            target_mount: primary_mount,
        }],
    )
}

pub fn configure_target_mount(id: u64, target_mount: TargetMountId) -> Job {
    Job::new(
        id,
        "Configure target mount",
        Some(StateTransition::new(
            EntityKind::TargetMount,
            target_mount.0,
            "unconfigured",
            "configured",
        )),
        vec![
            StepKind::FindDevice { target_mount },
            StepKind::ConfigurePacemaker { target_mount },
        ],
    )
}

pub fn start_target(id: u64, target: TargetId) -> Job {
    Job::new(
        id,
        "Start target",
        Some(StateTransition::new(
            EntityKind::Target,
            target.0,
            "unmounted",
            "mounted",
        )),
        vec![StepKind::Mount { target }],
    )
}

pub fn stop_target(id: u64, target: TargetId) -> Job {
    Job::new(
        id,
        "Stop target",
        Some(StateTransition::new(
            EntityKind::Target,
            target.0,
            "mounted",
            "unmounted",
        )),
        vec![StepKind::Unmount { target }],
    )
}

fn lnet_job(id: u64, host: HostId, description: &str, from: &str, to: &str, step: StepKind) -> Job {
    Job::new(
        id,
        description,
        Some(StateTransition::new(EntityKind::Host, host.0, from, to)),
        vec![step],
    )
}

pub fn load_lnet(id: u64, host: HostId) -> Job {
    lnet_job(id, host, "Load LNet", "lnet_unloaded", "lnet_down", StepKind::LoadLnet { host })
}

pub fn start_lnet(id: u64, host: HostId) -> Job {
    lnet_job(id, host, "Start LNet", "lnet_down", "lnet_up", StepKind::StartLnet { host })
}

pub fn stop_lnet(id: u64, host: HostId) -> Job {
    lnet_job(id, host, "Stop LNet", "lnet_up", "lnet_down", StepKind::StopLnet { host })
}

pub fn unload_lnet(id: u64, host: HostId) -> Job {
    lnet_job(id, host, "Unload LNet", "lnet_down", "lnet_unloaded", StepKind::UnloadLnet { host })
}

/// Apply each parameter in order, then record `version` as applied on the MGS.
pub fn apply_conf_params(id: u64, mgs: TargetId, params: &[ConfParamId], version: u64) -> Job {
    let mut kinds: Vec<StepKind> = params
        .iter()
        .map(|&conf_param| StepKind::ConfParam { conf_param })
        .collect();
    kinds.push(StepKind::ConfParamVersion { mgs, version });
    Job::new(id, "Apply configuration parameters", None, kinds)
}
