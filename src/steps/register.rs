//! Registering a target with its MGS and enrolling its mounts into the HA resource manager.

use crate::command::{AgentCommand, RegisterResult};
use crate::error::StepError;
use crate::model::TargetMountId;
use crate::step::StepContext;

pub async fn register_target(ctx: &StepContext<'_>, id: TargetMountId) -> Result<(), StepError> {
    let target_mount = ctx.store.target_mount(id).await?;
    let node = match target_mount.block_device {
        Some(node) => ctx.store.lun_node(node).await?,
        None => {
            return Err(StepError::clean(format!(
                "target mount {} has no block device",
                id
            )))
        }
    };
    let host = ctx.store.host(target_mount.host).await?;

    let output = ctx
        .run_agent(
            &host,
            &AgentCommand::RegisterTarget {
                device: node.path,
                mount_point: target_mount.mount_point.clone(),
            },
        )
        .await?;
    if !output.success() {
        return Err(StepError::clean(format!(
            "register-target exited {} on {}",
            output.exit_code, host
        )));
    }

    let RegisterResult { label } = serde_json::from_str(&output.stdout)?;
    tracing::debug!(target_id = %target_mount.target, %label, "registration complete");
    ctx.store.set_target_name(target_mount.target, &label).await?;
    Ok(())
}

pub async fn configure_pacemaker(
    ctx: &StepContext<'_>,
    id: TargetMountId,
) -> Result<(), StepError> {
    let target_mount = ctx.store.target_mount(id).await?;
    let target = ctx.store.target(target_mount.target).await?;

    // Filled in by device discovery and registration respectively.
    let (node, label) = match (target_mount.block_device, target.name) {
        (Some(node), Some(label)) => (node, label),
        (None, _) => {
            return Err(StepError::clean(format!(
                "target mount {} has no block device",
                id
            )))
        }
        (_, None) => {
            return Err(StepError::clean(format!(
                "target {} has not been registered",
                target.id
            )))
        }
    };
    let node = ctx.store.lun_node(node).await?;
    let host = ctx.store.host(target_mount.host).await?;

    let output = ctx
        .run_agent(
            &host,
            &AgentCommand::ConfigureHa {
                device: node.path,
                label,
                primary: target_mount.primary,
                mount_point: target_mount.mount_point,
            },
        )
        .await?;
    if !output.success() {
        return Err(StepError::clean(format!(
            "configure-ha exited {} on {}",
            output.exit_code, host
        )));
    }
    Ok(())
}
