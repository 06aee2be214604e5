//! One module per orchestration algorithm, plus the lookups they share.

pub mod conf_param;
pub mod device;
pub mod lnet;
pub mod mkfs;
pub mod register;
pub mod target_mount;

use crate::error::StepError;
use crate::model::{Host, TargetId, TargetMount};
use crate::step::StepContext;

/// The primary mount among a target's mounts.
fn primary_mount(mounts: &[TargetMount], target: TargetId) -> Result<&TargetMount, StepError> {
    mounts
        .iter()
        .find(|tm| tm.primary)
        .ok_or_else(|| StepError::inconsistent(format!("target {} has no primary mount", target)))
}

/// The server currently designated to host the target: its primary mount's host.
async fn primary_server(ctx: &StepContext<'_>, target: TargetId) -> Result<Host, StepError> {
    let mounts = ctx.store.target_mounts(target).await?;
    let primary = primary_mount(&mounts, target)?;
    Ok(ctx.store.host(primary.host).await?)
}

/// NIDs of every server of an MGS, primary first. Servers without NIDs are left out.
async fn mgs_nids(ctx: &StepContext<'_>, mgs: TargetId) -> Result<Vec<Vec<String>>, StepError> {
    let mut mounts = ctx.store.target_mounts(mgs).await?;
    mounts.sort_by_key(|tm| !tm.primary);
    let mut nids = Vec::with_capacity(mounts.len());
    for tm in mounts {
        let host = ctx.store.host(tm.host).await?;
        if !host.nids.is_empty() {
            nids.push(host.nids);
        }
    }
    Ok(nids)
}
