//! Device discovery for secondary mounts.
//!
//! Once a target is formatted its filesystem uuid identifies the volume on every
//! server that can see it. A secondary mount is bound to its local device path by
//! asking its host where that uuid lives.

use crate::command::{parse_device_location, AgentCommand};
use crate::error::StepError;
use crate::model::{Lun, NewLunNode, TargetId, TargetMountId};
use crate::step::StepContext;

use super::primary_mount;

pub async fn find_device(ctx: &StepContext<'_>, id: TargetMountId) -> Result<(), StepError> {
    let target_mount = ctx.store.target_mount(id).await?;

    if target_mount.primary {
        // Primaries get their device at provisioning time.
        if target_mount.block_device.is_none() {
            return Err(StepError::inconsistent(format!(
                "primary target mount {} has no block device",
                id
            )));
        }
        tracing::debug!(target_mount = %id, "primary mount, skipping");
        return Ok(());
    }

    if target_mount.block_device.is_some() {
        tracing::debug!(target_mount = %id, "block device already set");
        return Ok(());
    }

    let lun = formatted_lun(ctx, target_mount.target).await?;
    let fs_uuid = match lun.fs_uuid {
        Some(uuid) => uuid,
        None => {
            return Err(StepError::inconsistent(format!(
                "target {} has not been formatted",
                target_mount.target
            )))
        }
    };

    let host = ctx.store.host(target_mount.host).await?;
    let output = ctx
        .run_agent(
            &host,
            &AgentCommand::LocateDevice {
                uuid: fs_uuid.clone(),
            },
        )
        .await?;
    if !output.success() {
        return Err(StepError::clean(format!(
            "locate-device exited {} on {}",
            output.exit_code, host
        )));
    }

    let location = match parse_device_location(&output.stdout)? {
        Some(location) => location,
        None => {
            return Err(StepError::inconsistent(format!(
                "cannot locate target {} device on {} by uuid {}",
                target_mount.target, host, fs_uuid
            )))
        }
    };

    let lun_node = match ctx.store.find_lun_node(host.id, &location.path).await? {
        Some(node) => {
            ctx.store.attach_lun(node.id, lun.id).await?;
            node
        }
        None => {
            // The device may show up here before monitoring has reported it.
            tracing::info!(%host, path = %location.path, "creating lun node for unseen device");
            ctx.store
                .create_lun_node(NewLunNode {
                    host: host.id,
                    path: location.path,
                    size: location.size,
                    used_hint: location.used,
                    lun: lun.id,
                })
                .await?
        }
    };

    ctx.store.set_block_device(id, lun_node.id).await?;
    tracing::debug!(target_mount = %id, lun_node = %lun_node.id, "block device resolved");
    Ok(())
}

/// Go up to the target, then down to its primary mount's volume.
async fn formatted_lun(ctx: &StepContext<'_>, target: TargetId) -> Result<Lun, StepError> {
    let mounts = ctx.store.target_mounts(target).await?;
    let primary = primary_mount(&mounts, target)?;
    let node_id = primary.block_device.ok_or_else(|| {
        StepError::inconsistent(format!("primary mount of target {} has no block device", target))
    })?;
    let node = ctx.store.lun_node(node_id).await?;
    match node.lun {
        Some(lun) => Ok(ctx.store.lun(lun).await?),
        None => Err(StepError::inconsistent(format!(
            "target {} has not been formatted",
            target
        ))),
    }
}
