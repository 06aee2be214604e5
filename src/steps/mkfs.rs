//! Formatting a target's primary device.
//!
//! Never idempotent and never a clean failure: a format that stops partway may have
//! left the device in any state.

use crate::command::{AgentCommand, FormatArgs, FormatResult};
use crate::error::StepError;
use crate::model::{LunNode, Target, TargetId, TargetMount};
use crate::step::StepContext;

use super::{mgs_nids, primary_mount};

pub async fn mkfs(ctx: &StepContext<'_>, id: TargetId) -> Result<(), StepError> {
    let target = ctx.store.target(id).await?;
    let mounts = ctx.store.target_mounts(id).await?;
    let primary = primary_mount(&mounts, id)?;
    let lun_node = match primary.block_device {
        Some(node) => ctx.store.lun_node(node).await?,
        None => {
            return Err(StepError::inconsistent(format!(
                "primary mount of target {} has no block device",
                target
            )))
        }
    };
    let host = ctx.store.host(primary.host).await?;

    let args = format_args(ctx, &target, &mounts, &lun_node).await?;
    let output = ctx
        .run_agent(&host, &AgentCommand::format_target(&args)?)
        .await?;
    if !output.success() {
        return Err(StepError::dirty(format!(
            "format-target exited {} on {}",
            output.exit_code, host
        )));
    }

    let FormatResult { uuid } = serde_json::from_str(&output.stdout)?;
    match lun_node.lun {
        Some(lun) => {
            tracing::debug!(target_id = %target.id, %uuid, "updating lun after formatting");
            ctx.store.set_lun_uuid(lun, &uuid).await?;
        }
        None => {
            tracing::debug!(target_id = %target.id, %uuid, "creating lun after formatting");
            let lun = ctx.store.create_lun(&uuid).await?;
            ctx.store.attach_lun(lun_node.id, lun.id).await?;
        }
    }
    Ok(())
}

/// Build format-target arguments for `target` on `device`.
pub async fn format_args(
    ctx: &StepContext<'_>,
    target: &Target,
    mounts: &[TargetMount],
    device: &LunNode,
) -> Result<FormatArgs, StepError> {
    let (fsname, mgsnode) = match target.kind.filesystem() {
        Some(fs) => {
            let fs = ctx.store.filesystem(fs).await?;
            let nids = mgs_nids(ctx, fs.mgs).await?;
            (Some(fs.name), Some(nids))
        }
        None => (None, None),
    };

    let mut failnode = Vec::new();
    for secondary in mounts.iter().filter(|tm| !tm.primary) {
        let host = ctx.store.host(secondary.host).await?;
        if !host.nids.is_empty() {
            failnode.push(host.nids);
        }
    }

    Ok(FormatArgs {
        target_types: target.kind.type_tag().to_string(),
        fsname,
        mgsnode,
        reformat: true,
        failnode: if failnode.is_empty() {
            None
        } else {
            Some(failnode)
        },
        device: device.path.clone(),
    })
}
