//! lustre-jobs: Step/Job execution engine for multi-host Lustre configuration changes.

// Serde helper module.
mod serde;
// Command line arguments and configuration.
pub mod config;
// Records read and written by steps.
pub mod model;
// Persistence collaborator.
pub mod store;
// Agent command lines and response payloads.
pub mod command;
// Remote execution gateway.
pub mod session;
// Choosing which host runs a fleet command.
pub mod selection;
// Orchestration algorithms.
pub mod steps;
// The unit of work.
pub mod step;
// Ordered steps and state transitions.
pub mod job;
// Sequential job execution.
pub mod engine;
// Running jobs concurrently.
pub mod scheduler;
// Synchronization primitives.
pub mod sync;
// Error handling.
pub mod error;

pub use config::{Config, Mode};
pub use engine::{Engine, JobReport, JobState, StepRecord};
pub use error::{ExecError, FailureCause, FileError, StepError, StoreError};
pub use job::{validate_job_file, EntityKind, Job, JobControl, StateTransition};
pub use scheduler::{run_jobs, spawn_job, JobCompletion};
pub use session::{CommandOutput, GatewayConfig, RemoteExecutor, SshExecutor};
pub use step::{CommandRecord, Step, StepContext, StepKind, StepOutcome};
pub use store::{Inventory, MemoryStore, Store};
pub use sync::LockedFile;
