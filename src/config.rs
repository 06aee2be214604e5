//! Configuration for lustre-jobs.
//!
//! Currently holds clap structs for command line arguments and flags.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::command::DEFAULT_AGENT;
use crate::session::GatewayConfig;

#[derive(Parser)]
#[command(version, author)]
pub struct Config {
    /// Run (r) the job files, or only Validate (v) them
    #[arg(value_enum)]
    pub mode: Mode,

    /// Job files to run. Jobs run concurrently; steps within a job run in order.
    #[arg(default_value = "job.yaml")]
    pub job_files: Vec<String>,

    /// Inventory file holding hosts, targets, devices and conf params
    #[arg(long, default_value = "inventory.yaml")]
    pub inventory: String,

    /// Seconds allowed for establishing an SSH connection
    #[arg(long, default_value = "3600")]
    pub connect_timeout: u64,

    /// Seconds allowed for a remote command to complete
    #[arg(long, default_value = "3600")]
    pub read_timeout: u64,

    /// SSH login for hosts that don't name one in the inventory
    #[arg(long)]
    pub ssh_user: Option<String>,

    /// Agent executable on the storage servers
    #[arg(long, default_value = DEFAULT_AGENT)]
    pub agent: String,

    /// Step index to resume from (for a job that was paused)
    #[arg(long, default_value = "0")]
    pub resume_from: usize,
}

impl Config {
    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            read_timeout: Duration::from_secs(self.read_timeout),
            user: self.ssh_user.clone(),
        }
    }
}

#[derive(PartialEq, Clone, ValueEnum)]
pub enum Mode {
    #[value(name = "r")]
    Run,
    #[value(name = "v")]
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["lustre-jobs", "r"]);
        assert!(config.mode == Mode::Run);
        assert_eq!(config.job_files, vec!["job.yaml".to_string()]);
        assert_eq!(config.agent, DEFAULT_AGENT);
        assert_eq!(config.gateway().read_timeout, Duration::from_secs(3600));
        assert!(config.gateway().user.is_none());
    }

    #[test]
    fn test_multiple_job_files() {
        let config = Config::parse_from([
            "lustre-jobs",
            "v",
            "a.yaml",
            "b.yaml",
            "--ssh-user",
            "root",
        ]);
        assert!(config.mode == Mode::Validate);
        assert_eq!(config.job_files.len(), 2);
        assert_eq!(config.gateway().user.as_deref(), Some("root"));
    }
}
