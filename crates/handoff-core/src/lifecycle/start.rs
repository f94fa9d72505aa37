//! Start work on a plan: validate it, provision its workspace, mark it
//! `coding` and refresh its backup.

use std::path::PathBuf;

use tracing::info;

use super::{LifecycleError, load_plan, rewrite_status};
use crate::context::RepoContext;
use crate::plan::PlanStatus;

/// Result of [`start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub plan_id: String,
    pub workspace: PathBuf,
    pub status: PlanStatus,
    /// Commit id of the refreshed active backup.
    pub backup: String,
    /// Whether the status was moved to `coding` by this call.
    pub promoted: bool,
}

/// Hand the plan off to its workspace.
///
/// Safe to re-run: an existing, consistent workspace is reused and a plan
/// already in `coding` is left as is.
pub fn start(ctx: &RepoContext, plan_id: &str) -> Result<StartOutcome, LifecycleError> {
    let metadata = load_plan(ctx, plan_id)?;
    if metadata.status.is_terminal() {
        return Err(LifecycleError::TerminalStatus {
            plan_id: metadata.plan_id,
            status: metadata.status,
        });
    }

    let workspace = ctx.workspaces().ensure(&metadata)?;

    let promoted = matches!(metadata.status, PlanStatus::Draft | PlanStatus::Ready);
    if promoted {
        rewrite_status(&metadata, PlanStatus::Coding)?;
    }

    let backup = ctx.backups().create(plan_id)?;
    info!(plan_id, workspace = %workspace.display(), promoted, "plan started");

    Ok(StartOutcome {
        plan_id: metadata.plan_id,
        workspace,
        status: PlanStatus::Coding,
        backup,
        promoted,
    })
}
