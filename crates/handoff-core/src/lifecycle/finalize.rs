//! Finalize a plan whose work is done: integrate the workspace changes into
//! the main branch, then reclaim the workspace, branch and backup.
//!
//! Nothing is removed until the plan branch is verified to be merged. The
//! worktree goes before the branch because git refuses to delete a branch
//! that is still checked out.

use std::path::Path;

use tracing::{info, warn};

use super::{LifecycleError, load_plan, rewrite_status};
use crate::context::RepoContext;
use crate::plan::{PlanMetadata, PlanStatus};

/// Turns the uncommitted work in a plan's workspace into history on the
/// main branch.
///
/// Implementations typically commit inside `workspace` and merge the plan
/// branch into `main_branch`. Finalize only checks the result: afterwards
/// the plan branch tip must be an ancestor of the main branch tip.
pub trait Integrator {
    fn integrate(
        &self,
        plan: &PlanMetadata,
        workspace: &Path,
        main_branch: &str,
    ) -> anyhow::Result<()>;
}

impl<F> Integrator for F
where
    F: Fn(&PlanMetadata, &Path, &str) -> anyhow::Result<()>,
{
    fn integrate(
        &self,
        plan: &PlanMetadata,
        workspace: &Path,
        main_branch: &str,
    ) -> anyhow::Result<()> {
        self(plan, workspace, main_branch)
    }
}

/// Result of [`finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub plan_id: String,
    /// Tip of the plan branch when it was verified and deleted, or `None`
    /// if an earlier run already deleted it.
    pub merged_tip: Option<String>,
    /// Whether integration was skipped because an earlier run had already
    /// merged the plan.
    pub resumed: bool,
    /// Whether this run removed the workspace.
    pub workspace_removed: bool,
    /// Whether an active backup was deleted.
    pub backup_removed: bool,
    /// Non-fatal problems encountered after the merge was verified.
    pub warnings: Vec<String>,
}

/// Integrate the plan's workspace and reclaim its resources.
///
/// A run that fails after the merge was verified can be repeated: when the
/// workspace holds no uncommitted changes and the plan is already
/// `implemented`, or its branch has moved past `git_sha` and is merged,
/// integration is skipped and only the remaining cleanup runs.
pub fn finalize(
    ctx: &RepoContext,
    plan_id: &str,
    integrator: &dyn Integrator,
) -> Result<FinalizeOutcome, LifecycleError> {
    let metadata = load_plan(ctx, plan_id)?;
    let workspaces = ctx.workspaces();

    let workspace = workspaces.find(plan_id)?;
    let dirty = match &workspace {
        Some(wt) => workspaces.has_uncommitted_changes(&wt.path)?,
        None => false,
    };
    let resumed = !dirty && already_integrated(ctx, &metadata)?;

    let merged_tip = if resumed {
        info!(plan_id, "plan already merged, resuming cleanup");
        match workspaces.branch_tip(plan_id)? {
            Some(_) => Some(verify_merged(ctx, plan_id)?),
            None => None,
        }
    } else {
        let workspace = workspace.ok_or_else(|| LifecycleError::NoWorkspace {
            plan_id: plan_id.to_string(),
        })?;
        if !dirty {
            return Err(LifecycleError::NothingToFinalize {
                plan_id: plan_id.to_string(),
            });
        }

        info!(plan_id, workspace = %workspace.path.display(), "integrating plan");
        integrator
            .integrate(&metadata, &workspace.path, ctx.main_branch())
            .map_err(|e| LifecycleError::Integration {
                plan_id: plan_id.to_string(),
                message: format!("{e:#}"),
            })?;
        Some(verify_merged(ctx, plan_id)?)
    };

    // Status before any removal: a rerun resumes from it.
    if metadata.status != PlanStatus::Implemented {
        rewrite_status(&metadata, PlanStatus::Implemented)?;
    }

    let workspace_removed = workspaces.remove(plan_id, false)?;
    if merged_tip.is_some() {
        ctx.vcs().delete_branch(plan_id, true)?;
    }
    info!(plan_id, tip = ?merged_tip, workspace_removed, "removed workspace and branch");

    let mut warnings = Vec::new();
    let backup_removed = match ctx.backups().cleanup(plan_id) {
        Ok(removed) => removed,
        Err(e) => {
            warn!(plan_id, error = %e, "failed to delete backup");
            warnings.push(format!("failed to delete backup: {e}"));
            false
        }
    };

    Ok(FinalizeOutcome {
        plan_id: plan_id.to_string(),
        merged_tip,
        resumed,
        workspace_removed,
        backup_removed,
        warnings,
    })
}

/// Whether an earlier finalize already got past the merge check.
fn already_integrated(
    ctx: &RepoContext,
    metadata: &PlanMetadata,
) -> Result<bool, LifecycleError> {
    if metadata.status == PlanStatus::Implemented {
        return Ok(true);
    }
    let workspaces = ctx.workspaces();
    let Some(tip) = workspaces.branch_tip(&metadata.plan_id)? else {
        return Ok(false);
    };
    if tip == metadata.git_sha {
        return Ok(false);
    }
    let Some(main_tip) = workspaces.branch_tip(ctx.main_branch())? else {
        return Ok(false);
    };
    Ok(ctx.vcs().is_ancestor(&tip, &main_tip)?)
}

/// Return the plan branch tip if it is an ancestor of the main branch tip.
fn verify_merged(ctx: &RepoContext, plan_id: &str) -> Result<String, LifecycleError> {
    let not_merged = || LifecycleError::NotMerged {
        branch: plan_id.to_string(),
        main_branch: ctx.main_branch().to_string(),
    };

    let workspaces = ctx.workspaces();
    let tip = workspaces.branch_tip(plan_id)?.ok_or_else(not_merged)?;
    let main_tip = workspaces
        .branch_tip(ctx.main_branch())?
        .ok_or_else(not_merged)?;

    if !ctx.vcs().is_ancestor(&tip, &main_tip)? {
        warn!(plan_id, tip = %tip, main_tip = %main_tip, "plan branch is not merged");
        return Err(not_merged());
    }
    Ok(tip)
}
