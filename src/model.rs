//! Records read and written by steps.
//!
//! These are owned by the persistence collaborator (see `store`). Steps fetch a
//! fresh copy, modify it through the `Store` API and never hold one across a
//! step boundary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! record_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub u32);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

record_id!(
    HostId,
    TargetId,
    TargetMountId,
    LunId,
    LunNodeId,
    FilesystemId,
    ConfParamId
);

/// State of the LNet transport layer on a host, as last observed by monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LnetState {
    #[default]
    Unloaded,
    Down,
    Up,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    /// SSH hostname to connect to.
    pub address: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub lnet_state: LnetState,
    /// Last successful contact by the monitoring subsystem.
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    /// LNet network identifiers, e.g. `192.168.0.1@tcp0`.
    #[serde(default)]
    pub nids: Vec<String>,
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "[{}:{}]", self.address, port),
            None => write!(f, "[{}]", self.address),
        }
    }
}

/// The concrete kind of a Lustre target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    Mgs,
    Mdt { filesystem: FilesystemId },
    Ost { filesystem: FilesystemId },
}

impl TargetKind {
    /// Tag understood by the agent's format-target command.
    pub fn type_tag(&self) -> &'static str {
        match self {
            TargetKind::Mgs => "mgs",
            TargetKind::Mdt { .. } => "mdt",
            TargetKind::Ost { .. } => "ost",
        }
    }

    /// The filesystem this target is a member of, if any. An MGS may serve many.
    pub fn filesystem(&self) -> Option<FilesystemId> {
        match self {
            TargetKind::Mgs => None,
            TargetKind::Mdt { filesystem } | TargetKind::Ost { filesystem } => Some(*filesystem),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    #[serde(flatten)]
    pub kind: TargetKind,
    /// Assigned by registration, e.g. `testfs-OST0000`.
    #[serde(default)]
    pub name: Option<String>,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}#{}", self.kind.type_tag(), self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMountState {
    #[default]
    Unconfigured,
    Configured,
}

/// Binds a target to one of the hosts that can serve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetMount {
    pub id: TargetMountId,
    pub target: TargetId,
    pub host: HostId,
    pub primary: bool,
    #[serde(default)]
    pub state: TargetMountState,
    pub mount_point: String,
    /// Resolved device on `host`, set at provisioning (primary) or by device discovery.
    #[serde(default)]
    pub block_device: Option<LunNodeId>,
}

/// A logical volume, identified by filesystem uuid once formatted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lun {
    pub id: LunId,
    #[serde(default)]
    pub fs_uuid: Option<String>,
}

/// A device path on a specific host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LunNode {
    pub id: LunNodeId,
    pub host: HostId,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub used_hint: bool,
    #[serde(default)]
    pub lun: Option<LunId>,
}

/// Attributes of a device discovered on a host that monitoring has not reported yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLunNode {
    pub host: HostId,
    pub path: String,
    pub size: u64,
    pub used_hint: bool,
    pub lun: LunId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filesystem {
    pub id: FilesystemId,
    pub name: String,
    pub mgs: TargetId,
}

/// Configuration parameter bookkeeping for a management target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mgs {
    pub target: TargetId,
    #[serde(default)]
    pub conf_param_version_applied: u64,
}

/// What a configuration parameter applies to. Determines the full lctl key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ConfParamScope {
    /// Filesystem-wide, keyed as `<fsname>.<key>`.
    Filesystem { filesystem: FilesystemId },
    /// One registered target, keyed as `<label>.<key>`.
    Target { target: TargetId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfParam {
    pub id: ConfParamId,
    pub mgs: TargetId,
    #[serde(flatten)]
    pub scope: ConfParamScope,
    pub key: String,
    /// `None` deletes the parameter.
    #[serde(default)]
    pub value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags() {
        let fs = FilesystemId(1);
        assert_eq!(TargetKind::Mgs.type_tag(), "mgs");
        assert_eq!(TargetKind::Mdt { filesystem: fs }.type_tag(), "mdt");
        assert_eq!(TargetKind::Ost { filesystem: fs }.type_tag(), "ost");
        assert_eq!(TargetKind::Mgs.filesystem(), None);
        assert_eq!(TargetKind::Ost { filesystem: fs }.filesystem(), Some(fs));
    }

    #[test]
    fn test_target_parses_flattened_kind() {
        let target: Target = serde_yaml::from_str(
            r#"
id: 3
kind: ost
filesystem: 1
"#,
        )
        .unwrap();
        assert_eq!(
            target.kind,
            TargetKind::Ost {
                filesystem: FilesystemId(1)
            }
        );
        assert!(target.name.is_none());
        assert_eq!(target.to_string(), "ost#3");
    }
}
