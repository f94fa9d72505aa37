//! Pin a plan to the commit its workspace will branch from.

use tracing::info;

use super::{LifecycleError, load_plan};
use crate::context::RepoContext;
use crate::plan::{PLACEHOLDER_SHA, PlanDocument, is_full_sha};

/// Result of [`pin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinOutcome {
    pub plan_id: String,
    pub previous: String,
    pub git_sha: String,
    /// Commit id of the refreshed active backup.
    pub backup: String,
}

/// Set `git_sha` of the plan to `sha` and refresh its backup.
///
/// Refused once the plan branch exists, since the branch was created at the
/// old commit. Pinning to the commit already recorded only refreshes the
/// backup.
pub fn pin(ctx: &RepoContext, plan_id: &str, sha: &str) -> Result<PinOutcome, LifecycleError> {
    let metadata = load_plan(ctx, plan_id)?;
    if metadata.status.is_terminal() {
        return Err(LifecycleError::TerminalStatus {
            plan_id: metadata.plan_id,
            status: metadata.status,
        });
    }
    if ctx.workspaces().branch_tip(plan_id)?.is_some() {
        return Err(LifecycleError::AlreadyStarted {
            plan_id: plan_id.to_string(),
        });
    }
    if sha == PLACEHOLDER_SHA
        || !is_full_sha(sha)
        || ctx.vcs().object_type(sha)?.as_deref() != Some("commit")
    {
        return Err(LifecycleError::NotACommit {
            sha: sha.to_string(),
        });
    }

    if metadata.git_sha != sha {
        let mut doc = PlanDocument::read(&metadata.path)?;
        doc.set_git_sha(sha);
        doc.write(&metadata.path)?;
        info!(plan_id, from = %metadata.git_sha, to = sha, "pinned plan");
    }

    let backup = ctx.backups().create(plan_id)?;
    Ok(PinOutcome {
        plan_id: metadata.plan_id,
        previous: metadata.git_sha,
        git_sha: sha.to_string(),
        backup,
    })
}
