use thiserror::Error;

/// Failure to run a command through the remote execution gateway.
///
/// The gateway never judges exit codes; these are transport-level failures only.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: openssh::Error,
    },
    #[error("Timed out connecting to {host} after {secs}s")]
    ConnectTimeout { host: String, secs: u64 },
    #[error("Command on {host} did not complete within {secs}s")]
    Timeout { host: String, secs: u64 },
    #[error("SSH session to {host} failed while running a command: {source}")]
    Session {
        host: String,
        #[source]
        source: openssh::Error,
    },
}

impl ExecError {
    /// Whether the remote command may have started before the failure.
    pub fn command_started(&self) -> bool {
        !matches!(
            self,
            ExecError::Connect { .. } | ExecError::ConnectTimeout { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {id} does not exist")]
    NotFound { kind: &'static str, id: String },
    #[error("Conflicting record: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// The underlying cause of a `StepError::Failed`.
#[derive(Error, Debug)]
pub enum FailureCause {
    #[error("Malformed agent response: {0}")]
    Response(#[from] serde_json::Error),
    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),
    #[error("Inconsistent state: {0}")]
    Inconsistent(String),
}

/// How a step that attempted its action went wrong.
#[derive(Error, Debug)]
pub enum StepError {
    /// Nothing was committed, locally or remotely. Retry at will.
    #[error("Step failed cleanly: {reason}")]
    Clean { reason: String },
    /// A remote side effect may have been partially applied. Needs an operator.
    #[error("Step failed leaving the system in an unknown state: {reason}")]
    Dirty { reason: String },
    #[error("Step raised an error: {0}")]
    Failed(#[source] FailureCause),
}

impl StepError {
    pub fn clean(reason: impl Into<String>) -> Self {
        StepError::Clean {
            reason: reason.into(),
        }
    }

    pub fn dirty(reason: impl Into<String>) -> Self {
        StepError::Dirty {
            reason: reason.into(),
        }
    }

    pub fn inconsistent(reason: impl Into<String>) -> Self {
        StepError::Failed(FailureCause::Inconsistent(reason.into()))
    }

    /// Classify a gateway failure for a step with the given idempotency.
    pub fn from_exec(error: ExecError, idempotent: bool) -> Self {
        if !error.command_started() || idempotent {
            StepError::clean(error.to_string())
        } else {
            StepError::dirty(error.to_string())
        }
    }
}

impl From<StoreError> for StepError {
    fn from(e: StoreError) -> Self {
        StepError::Failed(FailureCause::Store(e))
    }
}

impl From<serde_json::Error> for StepError {
    fn from(e: serde_json::Error) -> Self {
        StepError::Failed(FailureCause::Response(e))
    }
}

/// Failure to load or save an inventory or job file.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("Failed to read or write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid {path}: {reason}")]
    Invalid { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_timeout_is_always_clean() {
        let err = ExecError::ConnectTimeout {
            host: "oss01".to_string(),
            secs: 3600,
        };
        assert!(!err.command_started());
        assert!(matches!(
            StepError::from_exec(err, false),
            StepError::Clean { .. }
        ));
    }

    #[test]
    fn test_read_timeout_depends_on_idempotency() {
        let timeout = || ExecError::Timeout {
            host: "oss01".to_string(),
            secs: 3600,
        };
        assert!(matches!(
            StepError::from_exec(timeout(), true),
            StepError::Clean { .. }
        ));
        assert!(matches!(
            StepError::from_exec(timeout(), false),
            StepError::Dirty { .. }
        ));
    }
}
