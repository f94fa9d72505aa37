//! Plan lifecycle workflows: pin, start, abandon, recover and finalize.
//!
//! Each workflow composes [`PlanValidator`](crate::plan::PlanValidator),
//! [`WorkspaceManager`](crate::worktree::WorkspaceManager) and
//! [`BackupStore`](crate::backup::BackupStore) through a [`RepoContext`].
//! Every workflow checks current state before acting so that re-running it
//! after an interruption picks up where the previous run stopped.

pub mod abandon;
pub mod finalize;
pub mod pin;
pub mod recover;
pub mod start;
pub mod steps;

use std::path::PathBuf;

use thiserror::Error;

use crate::backup::BackupError;
use crate::context::RepoContext;
use crate::git::GitError;
use crate::layout::LayoutError;
use crate::plan::{PlanDocument, PlanMetadata, PlanStatus, ValidationError};
use crate::worktree::WorkspaceError;

pub use abandon::{AbandonArtifacts, AbandonOutcome, abandon, detect_artifacts};
pub use finalize::{FinalizeOutcome, Integrator, finalize};
pub use pin::{PinOutcome, pin};
pub use recover::{RecoverOutcome, recover};
pub use start::{StartOutcome, start};
pub use steps::{StepReport, StepRunner, StepStatus};

/// Errors from lifecycle workflows.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("{} declares plan_id {found:?}, expected {expected:?}", path.display())]
    PlanIdMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("plan {plan_id} is already {status}")]
    TerminalStatus { plan_id: String, status: PlanStatus },

    #[error("plan {plan_id} already has a branch at its pinned commit")]
    AlreadyStarted { plan_id: String },

    #[error("{sha} is not a commit in this repository")]
    NotACommit { sha: String },

    #[error("no workspace for plan {plan_id}")]
    NoWorkspace { plan_id: String },

    #[error("nothing to finalize: workspace for plan {plan_id} has no uncommitted changes")]
    NothingToFinalize { plan_id: String },

    #[error("branch {branch} is not merged into {main_branch}; leaving workspace and branch in place")]
    NotMerged { branch: String, main_branch: String },

    #[error("integration of plan {plan_id} failed: {message}")]
    Integration { plan_id: String, message: String },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Validate the plan stored under `<ns>/tasks/<plan_id>.md` and make sure
/// it declares the id it is filed under.
pub fn load_plan(ctx: &RepoContext, plan_id: &str) -> Result<PlanMetadata, LifecycleError> {
    let path = ctx.layout().plan_path(plan_id)?;
    let metadata = ctx.validator().validate(&path)?;
    if metadata.plan_id != plan_id {
        return Err(LifecycleError::PlanIdMismatch {
            path,
            expected: plan_id.to_string(),
            found: metadata.plan_id,
        });
    }
    Ok(metadata)
}

/// Rewrite the `status` header of the plan at `metadata.path`, leaving the
/// body untouched.
pub(crate) fn rewrite_status(
    metadata: &PlanMetadata,
    status: PlanStatus,
) -> Result<(), LifecycleError> {
    let mut doc = PlanDocument::read(&metadata.path)?;
    doc.set_status(status);
    doc.write(&metadata.path)?;
    tracing::info!(
        plan_id = %metadata.plan_id,
        from = %metadata.status,
        to = %status,
        "updated plan status"
    );
    Ok(())
}
