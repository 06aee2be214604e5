//! Remote execution gateway.
//!
//! One SSH session is opened per command and always closed before returning, whatever
//! happened in between. The gateway reports what the command did; deciding whether a
//! non-zero exit is a clean or dirty failure is up to the calling step.

use std::time::Duration;

use async_trait::async_trait;
use openssh::{KnownHosts, Session as SSHSession, SessionBuilder};
use tokio::time::timeout;

use crate::error::ExecError;
use crate::model::Host;

/// Exit code reported when the remote process was killed by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// Everything a remote command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one command against one host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, host: &Host, command: &str) -> Result<CommandOutput, ExecError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long it may take to establish the connection.
    pub connect_timeout: Duration,
    /// How long the command may take to complete once started.
    pub read_timeout: Duration,
    /// Login used when the host record does not name one.
    pub user: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3600),
            read_timeout: Duration::from_secs(3600),
            user: None,
        }
    }
}

/// `RemoteExecutor` backed by OpenSSH multiplexed sessions.
pub struct SshExecutor {
    config: GatewayConfig,
}

impl SshExecutor {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    async fn connect(&self, host: &Host) -> Result<SSHSession, ExecError> {
        let mut builder = SessionBuilder::default();
        builder
            .known_hosts_check(KnownHosts::Add)
            .connect_timeout(self.config.connect_timeout);
        if let Some(user) = host.user.as_ref().or(self.config.user.as_ref()) {
            builder.user(user.clone());
        }
        if let Some(port) = host.port {
            builder.port(port);
        }

        match timeout(
            self.config.connect_timeout,
            builder.connect_mux(&host.address),
        )
        .await
        {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(source)) => Err(ExecError::Connect {
                host: host.to_string(),
                source,
            }),
            Err(_) => Err(ExecError::ConnectTimeout {
                host: host.to_string(),
                secs: self.config.connect_timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &Host, command: &str) -> Result<CommandOutput, ExecError> {
        let session = self.connect(host).await?;
        tracing::debug!(%host, command, "connected");

        let result = timeout(
            self.config.read_timeout,
            session.raw_command(command).output(),
        )
        .await;

        // Close on every path; a failed close does not change what the command did.
        if let Err(e) = session.close().await {
            tracing::warn!(%host, "error while terminating connection: {}", e);
        }

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ExecError::Session {
                    host: host.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(ExecError::Timeout {
                    host: host.to_string(),
                    secs: self.config.read_timeout.as_secs(),
                })
            }
        };

        let output = CommandOutput {
            exit_code: output.status.code().unwrap_or(SIGNALLED_EXIT_CODE),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(%host, exit_code = output.exit_code, command, "command finished");
        if !output.success() {
            tracing::error!(
                %host,
                exit_code = output.exit_code,
                command,
                stdout = %output.stdout,
                stderr = %output.stderr,
                "command exited non-zero"
            );
        }
        Ok(output)
    }
}
