//! Steps: the atomic units of work a job is made of.
//!
//! The set of step kinds is closed. A step is persisted by the scheduler as its name
//! plus arguments; serde's tagging of `StepKind` is the registration table that maps
//! one back to the other.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::command::{AgentCommand, LnetAction};
use crate::error::StepError;
use crate::model::{ConfParamId, Host, HostId, TargetId, TargetMountId};
use crate::session::{CommandOutput, RemoteExecutor};
use crate::steps;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", content = "args", rename_all = "snake_case")]
pub enum StepKind {
    /// Does nothing. For jobs that only commit a state transition.
    #[serde(rename = "null_step")]
    Null,
    FindDevice { target_mount: TargetMountId },
    Mkfs { target: TargetId },
    Mount { target: TargetId },
    Unmount { target: TargetId },
    RegisterTarget { target_mount: TargetMountId },
    ConfigurePacemaker { target_mount: TargetMountId },
    StartLnet { host: HostId },
    StopLnet { host: HostId },
    LoadLnet { host: HostId },
    UnloadLnet { host: HostId },
    ConfParam { conf_param: ConfParamId },
    ConfParamVersion { mgs: TargetId, version: u64 },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Null => "null_step",
            StepKind::FindDevice { .. } => "find_device",
            StepKind::Mkfs { .. } => "mkfs",
            StepKind::Mount { .. } => "mount",
            StepKind::Unmount { .. } => "unmount",
            StepKind::RegisterTarget { .. } => "register_target",
            StepKind::ConfigurePacemaker { .. } => "configure_pacemaker",
            StepKind::StartLnet { .. } => "start_lnet",
            StepKind::StopLnet { .. } => "stop_lnet",
            StepKind::LoadLnet { .. } => "load_lnet",
            StepKind::UnloadLnet { .. } => "unload_lnet",
            StepKind::ConfParam { .. } => "conf_param",
            StepKind::ConfParamVersion { .. } => "conf_param_version",
        }
    }

    /// Whether running the step again from the same starting state is harmless.
    ///
    /// An external retry orchestrator relies on this, so it must be accurate.
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, StepKind::Mkfs { .. } | StepKind::ConfParam { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub kind: StepKind,
    /// Completing this step commits the job's state transition.
    #[serde(default, rename = "final")]
    pub is_final: bool,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            is_final: false,
        }
    }

    pub fn mark_final(&mut self) {
        self.is_final = true;
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_idempotent(&self) -> bool {
        self.kind.is_idempotent()
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub async fn execute(&self, ctx: &StepContext<'_>) -> Result<(), StepError> {
        match &self.kind {
            StepKind::Null => Ok(()),
            StepKind::FindDevice { target_mount } => {
                steps::device::find_device(ctx, *target_mount).await
            }
            StepKind::Mkfs { target } => steps::mkfs::mkfs(ctx, *target).await,
            StepKind::Mount { target } => steps::target_mount::mount(ctx, *target).await,
            StepKind::Unmount { target } => steps::target_mount::unmount(ctx, *target).await,
            StepKind::RegisterTarget { target_mount } => {
                steps::register::register_target(ctx, *target_mount).await
            }
            StepKind::ConfigurePacemaker { target_mount } => {
                steps::register::configure_pacemaker(ctx, *target_mount).await
            }
            StepKind::StartLnet { host } => steps::lnet::lnet(ctx, *host, LnetAction::Start).await,
            StepKind::StopLnet { host } => steps::lnet::lnet(ctx, *host, LnetAction::Stop).await,
            StepKind::LoadLnet { host } => steps::lnet::lnet(ctx, *host, LnetAction::Load).await,
            StepKind::UnloadLnet { host } => {
                steps::lnet::lnet(ctx, *host, LnetAction::Unload).await
            }
            StepKind::ConfParam { conf_param } => {
                steps::conf_param::apply_conf_param(ctx, *conf_param).await
            }
            StepKind::ConfParamVersion { mgs, version } => {
                steps::conf_param::record_version(ctx, *mgs, *version).await
            }
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match serde_json::to_value(&self.kind) {
            Ok(value) => match value.get("args") {
                Some(args) => write!(f, "{}({})", self.name(), args),
                None => write!(f, "{}", self.name()),
            },
            Err(_) => write!(f, "{}", self.name()),
        }
    }
}

/// What happened to one step in one pass over a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    NotRun,
    Succeeded,
    /// The job was paused before the step ran. Nothing happened; resumable.
    Paused,
    /// The job was aborted before the step ran. Nothing happened.
    Aborted,
    CleanFailed { reason: String },
    DirtyFailed { reason: String },
    Failed { error: String },
}

impl StepOutcome {
    /// Whether the job may carry on with the next step.
    pub fn allows_next(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }
}

impl From<StepError> for StepOutcome {
    fn from(e: StepError) -> Self {
        match e {
            StepError::Clean { reason } => StepOutcome::CleanFailed { reason },
            StepError::Dirty { reason } => StepOutcome::DirtyFailed { reason },
            StepError::Failed(cause) => StepOutcome::Failed {
                error: cause.to_string(),
            },
        }
    }
}

/// The last remote command a job attempted, as surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub host: String,
    pub command: String,
    /// `None` when the command did not produce an exit status (transport error).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Collaborators handed to a running step.
pub struct StepContext<'a> {
    pub store: &'a dyn Store,
    executor: &'a dyn RemoteExecutor,
    agent: &'a str,
    idempotent: bool,
    last_command: &'a Mutex<Option<CommandRecord>>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        store: &'a dyn Store,
        executor: &'a dyn RemoteExecutor,
        agent: &'a str,
        step: &Step,
        last_command: &'a Mutex<Option<CommandRecord>>,
    ) -> Self {
        Self {
            store,
            executor,
            agent,
            idempotent: step.is_idempotent(),
            last_command,
        }
    }

    /// Path of the agent executable on servers.
    pub fn agent(&self) -> &str {
        self.agent
    }

    /// Run a command, recording it. Transport failures are classified for this step;
    /// a non-zero exit is returned as-is for the step to judge.
    pub async fn run(&self, host: &Host, command: &str) -> Result<CommandOutput, StepError> {
        let result = self.executor.run(host, command).await;
        let record = match &result {
            Ok(output) => CommandRecord {
                host: host.to_string(),
                command: command.to_string(),
                exit_code: Some(output.exit_code),
                stdout: output.stdout.clone(),
                stderr: output.stderr.clone(),
            },
            Err(e) => CommandRecord {
                host: host.to_string(),
                command: command.to_string(),
                exit_code: None,
                stdout: String::new(),
                stderr: e.to_string(),
            },
        };
        *self
            .last_command
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(record);
        result.map_err(|e| StepError::from_exec(e, self.idempotent))
    }

    pub async fn run_agent(
        &self,
        host: &Host,
        command: &AgentCommand,
    ) -> Result<CommandOutput, StepError> {
        self.run(host, &command.command_line(self.agent)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureCause;

    #[test]
    fn test_only_mkfs_and_conf_param_are_not_idempotent() {
        let kinds = [
            StepKind::Null,
            StepKind::FindDevice {
                target_mount: TargetMountId(1),
            },
            StepKind::Mount { target: TargetId(1) },
            StepKind::Unmount { target: TargetId(1) },
            StepKind::RegisterTarget {
                target_mount: TargetMountId(1),
            },
            StepKind::ConfigurePacemaker {
                target_mount: TargetMountId(1),
            },
            StepKind::StartLnet { host: HostId(1) },
            StepKind::StopLnet { host: HostId(1) },
            StepKind::LoadLnet { host: HostId(1) },
            StepKind::UnloadLnet { host: HostId(1) },
            StepKind::ConfParamVersion {
                mgs: TargetId(1),
                version: 2,
            },
        ];
        assert!(kinds.iter().all(StepKind::is_idempotent));
        assert!(!StepKind::Mkfs { target: TargetId(1) }.is_idempotent());
        assert!(!StepKind::ConfParam {
            conf_param: ConfParamId(1)
        }
        .is_idempotent());
    }

    #[test]
    fn test_registration_table() {
        let step: Step = serde_yaml::from_str(
            r#"
step: conf_param_version
args:
  mgs: 2
  version: 7
final: true
"#,
        )
        .unwrap();
        assert_eq!(
            step.kind,
            StepKind::ConfParamVersion {
                mgs: TargetId(2),
                version: 7
            }
        );
        assert!(step.is_final());
        assert_eq!(step.to_string(), r#"conf_param_version({"mgs":2,"version":7})"#);

        let null: Step = serde_yaml::from_str("step: null_step").unwrap();
        assert_eq!(null, Step::new(StepKind::Null));
        assert_eq!(null.to_string(), "null_step");
        assert!(serde_json::from_str::<Step>(r#"{"step":"reformat_everything"}"#).is_err());
    }

    #[test]
    fn test_outcome_from_error() {
        assert_eq!(
            StepOutcome::from(StepError::clean("no route")),
            StepOutcome::CleanFailed {
                reason: "no route".to_string()
            }
        );
        assert!(matches!(
            StepOutcome::from(StepError::Failed(FailureCause::Inconsistent("x".to_string()))),
            StepOutcome::Failed { .. }
        ));
        assert!(StepOutcome::Succeeded.allows_next());
        assert!(!StepOutcome::Paused.allows_next());
    }
}
