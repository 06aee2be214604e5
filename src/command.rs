//! Command lines sent to hosts and the payloads that come back.
//!
//! Every storage-node operation goes through the agent executable installed on the
//! server; LNet control and configuration parameters use the stock Lustre tools.

use serde::{Deserialize, Serialize};

use crate::serde::bool_or_integer;

/// Default agent executable on managed servers.
pub const DEFAULT_AGENT: &str = "hydra-agent";

/// One invocation of the storage agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    LocateDevice {
        uuid: String,
    },
    FormatTarget {
        args: String,
    },
    StartTarget {
        label: String,
    },
    StopTarget {
        label: String,
    },
    RegisterTarget {
        device: String,
        mount_point: String,
    },
    ConfigureHa {
        device: String,
        label: String,
        primary: bool,
        mount_point: String,
    },
}

impl AgentCommand {
    pub fn format_target(args: &FormatArgs) -> Result<Self, serde_json::Error> {
        Ok(AgentCommand::FormatTarget {
            args: serde_json::to_string(args)?,
        })
    }

    /// Render the full shell command line for the given agent executable.
    pub fn command_line(&self, agent: &str) -> String {
        let mut words = vec![agent.to_string()];
        match self {
            AgentCommand::LocateDevice { uuid } => {
                words.extend(["locate-device".into(), "--uuid".into(), shell_quote(uuid)]);
            }
            AgentCommand::FormatTarget { args } => {
                words.extend(["format-target".into(), "--args".into(), shell_quote(args)]);
            }
            AgentCommand::StartTarget { label } => {
                words.extend(["start-target".into(), "--label".into(), shell_quote(label)]);
            }
            AgentCommand::StopTarget { label } => {
                words.extend(["stop-target".into(), "--label".into(), shell_quote(label)]);
            }
            AgentCommand::RegisterTarget {
                device,
                mount_point,
            } => {
                words.extend([
                    "register-target".into(),
                    "--device".into(),
                    shell_quote(device),
                    "--mountpoint".into(),
                    shell_quote(mount_point),
                ]);
            }
            AgentCommand::ConfigureHa {
                device,
                label,
                primary,
                mount_point,
            } => {
                words.extend([
                    "configure-ha".into(),
                    "--device".into(),
                    shell_quote(device),
                    "--label".into(),
                    shell_quote(label),
                ]);
                if *primary {
                    words.push("--primary".into());
                }
                words.extend(["--mountpoint".into(), shell_quote(mount_point)]);
            }
        }
        words.join(" ")
    }
}

/// Transport layer actions. Each maps to one fixed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LnetAction {
    Start,
    Stop,
    Load,
    Unload,
}

impl LnetAction {
    pub fn command_line(&self) -> &'static str {
        match self {
            LnetAction::Start => "lctl network up",
            LnetAction::Stop => "lctl network down",
            LnetAction::Load => "modprobe lnet",
            LnetAction::Unload => "lustre_rmmod",
        }
    }
}

/// Build the lctl directive that sets `key` to `value`, or deletes it when `value` is `None`.
pub fn conf_param_command(key: &str, value: Option<&str>) -> String {
    match value {
        Some(value) => format!("lctl conf_param {}", shell_quote(&format!("{}={}", key, value))),
        None => format!("lctl conf_param -d {}", shell_quote(key)),
    }
}

/// Quote a word for a POSIX shell. Words made only of safe characters are left alone.
pub fn shell_quote(word: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "_-./=@:,+%".contains(c);
    if !word.is_empty() && word.chars().all(safe) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Arguments of format-target, sent as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatArgs {
    pub target_types: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fsname: Option<String>,
    /// NIDs of each MGS server, primary first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mgsnode: Option<Vec<Vec<String>>>,
    pub reformat: bool,
    /// NIDs of each failover server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failnode: Option<Vec<Vec<String>>>,
    pub device: String,
}

/// Where locate-device found a filesystem uuid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceLocation {
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, deserialize_with = "bool_or_integer")]
    pub used: bool,
}

/// Parse locate-device output. An empty, `null` or `{}` response means "not found".
pub fn parse_device_location(stdout: &str) -> Result<Option<DeviceLocation>, serde_json::Error> {
    if stdout.trim().is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(stdout)?;
    match &value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) if map.is_empty() => Ok(None),
        _ => serde_json::from_value(value).map(Some),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormatResult {
    pub uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResult {
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conf_param_set_and_delete() {
        assert_eq!(
            conf_param_command("testfs-OST0000.ost.sync_on_lock_cancel", Some("1048576")),
            "lctl conf_param testfs-OST0000.ost.sync_on_lock_cancel=1048576"
        );
        assert_eq!(
            conf_param_command("testfs-OST0000.ost.sync_on_lock_cancel", None),
            "lctl conf_param -d testfs-OST0000.ost.sync_on_lock_cancel"
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/dev/sdb"), "/dev/sdb");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(r#"{"a":1}"#), r#"'{"a":1}'"#);
    }

    #[test]
    fn test_configure_ha_primary_flag() {
        let mut cmd = AgentCommand::ConfigureHa {
            device: "/dev/sdb".to_string(),
            label: "testfs-MDT0000".to_string(),
            primary: true,
            mount_point: "/mnt/testfs/mdt0".to_string(),
        };
        assert_eq!(
            cmd.command_line("hydra-agent"),
            "hydra-agent configure-ha --device /dev/sdb --label testfs-MDT0000 --primary --mountpoint /mnt/testfs/mdt0"
        );
        if let AgentCommand::ConfigureHa { primary, .. } = &mut cmd {
            *primary = false;
        }
        assert!(!cmd.command_line("hydra-agent").contains("--primary"));
    }

    #[test]
    fn test_format_args_omit_absent_fields() {
        let args = FormatArgs {
            target_types: "mgs".to_string(),
            fsname: None,
            mgsnode: None,
            reformat: true,
            failnode: None,
            device: "/dev/sda".to_string(),
        };
        let json = serde_json::to_string(&args).unwrap();
        assert_eq!(
            json,
            r#"{"target_types":"mgs","reformat":true,"device":"/dev/sda"}"#
        );
        let line = AgentCommand::format_target(&args)
            .unwrap()
            .command_line("hydra-agent");
        assert_eq!(
            line,
            format!("hydra-agent format-target --args '{}'", json)
        );
    }

    #[test]
    fn test_parse_device_location() {
        let found = parse_device_location(r#"{"path":"/dev/sdc","size":1000,"used":0}"#)
            .unwrap()
            .unwrap();
        assert_eq!(found.path, "/dev/sdc");
        assert_eq!(found.size, 1000);
        assert!(!found.used);
        assert!(parse_device_location("").unwrap().is_none());
        assert!(parse_device_location("null\n").unwrap().is_none());
        assert!(parse_device_location("{}").unwrap().is_none());
        assert!(parse_device_location(r#"{"size":1}"#).is_err());
    }
}
