//! Starting and stopping a target from whichever of its servers will answer.

use crate::command::AgentCommand;
use crate::error::StepError;
use crate::model::{Target, TargetId};
use crate::selection::candidates;
use crate::step::StepContext;

pub async fn mount(ctx: &StepContext<'_>, id: TargetId) -> Result<(), StepError> {
    let target = ctx.store.target(id).await?;
    let label = registered_label(&target)?;
    run_on_any_mount(ctx, &target, &AgentCommand::StartTarget { label }).await
}

pub async fn unmount(ctx: &StepContext<'_>, id: TargetId) -> Result<(), StepError> {
    let target = ctx.store.target(id).await?;
    let label = registered_label(&target)?;
    run_on_any_mount(ctx, &target, &AgentCommand::StopTarget { label }).await
}

fn registered_label(target: &Target) -> Result<String, StepError> {
    target
        .name
        .clone()
        .ok_or_else(|| StepError::clean(format!("target {} has not been registered", target)))
}

/// Try `command` on each candidate mount's host, freshest first, until one succeeds.
///
/// Every candidate failing is a clean failure: start and stop are safe to repeat.
pub async fn run_on_any_mount(
    ctx: &StepContext<'_>,
    target: &Target,
    command: &AgentCommand,
) -> Result<(), StepError> {
    let mounts = ctx.store.target_mounts(target.id).await?;
    let mut pairs = Vec::with_capacity(mounts.len());
    for tm in mounts {
        let host = ctx.store.host(tm.host).await?;
        pairs.push((tm, host));
    }

    let command = command.command_line(ctx.agent());
    for (tm, host) in candidates(pairs) {
        tracing::debug!(target_id = %target.id, target_mount = %tm.id, %host, command = %command, "trying target mount");
        match ctx.run(&host, &command).await {
            Ok(output) if output.success() => return Ok(()),
            Ok(output) => tracing::warn!(
                %host,
                exit_code = output.exit_code,
                stdout = %output.stdout,
                stderr = %output.stderr,
                "cannot run '{}'",
                command
            ),
            Err(e) => tracing::warn!(%host, "cannot run '{}': {}", command, e),
        }
    }

    tracing::error!(target_id = %target.id, "no target mounts could run '{}'", command);
    Err(StepError::clean(format!(
        "no target mounts of {} could run '{}'",
        target, command
    )))
}
