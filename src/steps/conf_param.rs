//! Applying configuration parameters through the MGS and recording the applied version.

use crate::command::conf_param_command;
use crate::error::StepError;
use crate::model::{ConfParam, ConfParamId, ConfParamScope, TargetId};
use crate::step::StepContext;

use super::primary_server;

pub async fn apply_conf_param(ctx: &StepContext<'_>, id: ConfParamId) -> Result<(), StepError> {
    let param = ctx.store.conf_param(id).await?;
    let key = full_key(ctx, &param).await?;
    // An empty value deletes the parameter, same as an absent one.
    let value = param.value.as_deref().filter(|v| !v.is_empty());
    let command = conf_param_command(&key, value);

    let server = primary_server(ctx, param.mgs).await?;
    let output = ctx.run(&server, &command).await?;
    if !output.success() {
        // The directive may have been partially applied before failing.
        return Err(StepError::dirty(format!(
            "'{}' exited {} on {}",
            command, output.exit_code, server
        )));
    }
    Ok(())
}

/// The lctl key of a parameter, qualified by what it applies to.
pub async fn full_key(ctx: &StepContext<'_>, param: &ConfParam) -> Result<String, StepError> {
    match &param.scope {
        ConfParamScope::Filesystem { filesystem } => {
            let fs = ctx.store.filesystem(*filesystem).await?;
            Ok(format!("{}.{}", fs.name, param.key))
        }
        ConfParamScope::Target { target } => match ctx.store.target(*target).await?.name {
            Some(label) => Ok(format!("{}.{}", label, param.key)),
            None => Err(StepError::inconsistent(format!(
                "conf param {} applies to unregistered target {}",
                param.id, target
            ))),
        },
    }
}

/// Record that conf params up to `version` are applied. The recorded version never goes down.
pub async fn record_version(
    ctx: &StepContext<'_>,
    mgs: TargetId,
    version: u64,
) -> Result<(), StepError> {
    let current = ctx.store.mgs(mgs).await?.conf_param_version_applied;
    if version < current {
        tracing::warn!(%mgs, version, current, "ignoring older conf param version");
        return Ok(());
    }
    ctx.store.set_conf_param_version_applied(mgs, version).await?;
    Ok(())
}
