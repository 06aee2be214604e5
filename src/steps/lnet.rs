use crate::command::LnetAction;
use crate::error::StepError;
use crate::model::HostId;
use crate::step::StepContext;

/// Run one LNet control command. The host's observed LNet state is refreshed by
/// monitoring, not here.
pub async fn lnet(ctx: &StepContext<'_>, id: HostId, action: LnetAction) -> Result<(), StepError> {
    let host = ctx.store.host(id).await?;
    let output = ctx.run(&host, action.command_line()).await?;
    if !output.success() {
        return Err(StepError::clean(format!(
            "'{}' exited {} on {}",
            action.command_line(),
            output.exit_code,
            host
        )));
    }
    Ok(())
}
