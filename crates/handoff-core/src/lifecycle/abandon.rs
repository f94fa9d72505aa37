//! Abandon a plan: tear down its workspace and branch, delete the plan file
//! and park its backup in the abandoned namespace.
//!
//! Callers first inspect what exists with [`detect_artifacts`] (to show the
//! user and ask for confirmation) and then call [`abandon`]. Teardown runs
//! through a [`StepRunner`]: every step is attempted even when an earlier
//! one failed, and the outcome carries one report per step.

use std::io::Write;

use chrono::{DateTime, Utc};
use tracing::info;

use super::LifecycleError;
use super::steps::{StepReport, StepRunner, all_succeeded};
use crate::backup::Namespace;
use crate::context::RepoContext;

/// Which of a plan's resources currently exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbandonArtifacts {
    /// A registered worktree or a leftover directory at the worktree path.
    pub workspace: bool,
    pub branch: bool,
    pub plan_file: bool,
    /// An active backup ref.
    pub backup: bool,
}

impl AbandonArtifacts {
    pub fn is_empty(&self) -> bool {
        !(self.workspace || self.branch || self.plan_file || self.backup)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonOutcome {
    /// Nothing existed; no destructive operation ran.
    NothingToDo,
    Completed {
        artifacts: AbandonArtifacts,
        steps: Vec<StepReport>,
    },
}

impl AbandonOutcome {
    /// False if any step failed.
    pub fn succeeded(&self) -> bool {
        match self {
            Self::NothingToDo => true,
            Self::Completed { steps, .. } => all_succeeded(steps),
        }
    }
}

/// Look at what exists for `plan_id` without changing anything.
pub fn detect_artifacts(
    ctx: &RepoContext,
    plan_id: &str,
) -> Result<AbandonArtifacts, LifecycleError> {
    let workspaces = ctx.workspaces();
    let workspace =
        workspaces.find(plan_id)?.is_some() || workspaces.worktree_path(plan_id)?.exists();
    let branch = workspaces.branch_tip(plan_id)?.is_some();
    let plan_file = ctx.layout().plan_path(plan_id)?.exists();
    let backup = ctx.backups().lookup(plan_id, Namespace::Active)?.is_some();

    Ok(AbandonArtifacts {
        workspace,
        branch,
        plan_file,
        backup,
    })
}

/// Abandon `plan_id`, recording `reason` in the abandon log when given.
///
/// If the plan file exists without an active backup, it is backed up first
/// so the abandoned namespace always ends up holding its content; a failure
/// there aborts before anything is deleted.
pub fn abandon(
    ctx: &RepoContext,
    plan_id: &str,
    reason: Option<&str>,
) -> Result<AbandonOutcome, LifecycleError> {
    let artifacts = detect_artifacts(ctx, plan_id)?;
    if artifacts.is_empty() {
        info!(plan_id, "nothing to abandon");
        return Ok(AbandonOutcome::NothingToDo);
    }

    let backups = ctx.backups();
    if artifacts.plan_file && !artifacts.backup {
        let commit = backups.create(plan_id)?;
        info!(plan_id, commit = %commit, "snapshotted plan before abandoning");
    }

    let workspaces = ctx.workspaces();
    let layout = ctx.layout();
    let vcs = ctx.vcs();

    let mut runner = StepRunner::new()
        .step("remove workspace", || workspaces.remove(plan_id, true))
        .step("delete branch", || -> Result<bool, LifecycleError> {
            if workspaces.branch_tip(plan_id)?.is_none() {
                return Ok(false);
            }
            vcs.delete_branch(plan_id, true)?;
            Ok(true)
        })
        .step("delete plan file", || -> Result<bool, LifecycleError> {
            let path = layout.plan_path(plan_id)?;
            if !path.exists() {
                return Ok(false);
            }
            std::fs::remove_file(&path).map_err(|e| LifecycleError::Io { path, source: e })?;
            Ok(true)
        })
        .step("move backup to abandoned", || -> Result<bool, LifecycleError> {
            if backups.lookup(plan_id, Namespace::Active)?.is_none() {
                return Ok(false);
            }
            backups.move_namespace(plan_id, Namespace::Active, Namespace::Abandoned)?;
            Ok(true)
        });

    if let Some(reason) = reason {
        runner = runner.step("record reason", move || {
            append_reason(ctx, plan_id, reason, Utc::now()).map(|()| true)
        });
    }

    let steps = runner.run();
    info!(
        plan_id,
        failed = steps.iter().filter(|s| s.failed()).count(),
        "abandon finished"
    );
    Ok(AbandonOutcome::Completed { artifacts, steps })
}

/// Append `[YYYY-MM-DD HH:MM:SS UTC] <plan_id>: <reason>` to the abandon log.
///
/// Whitespace in `reason`, line breaks included, collapses to single
/// spaces so each entry stays on one line.
pub fn append_reason(
    ctx: &RepoContext,
    plan_id: &str,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    let path = ctx.layout().abandon_log_path();
    let io_err = |source| LifecycleError::Io {
        path: path.clone(),
        source,
    };

    std::fs::create_dir_all(ctx.layout().namespace_dir()).map_err(io_err)?;
    let line = format!(
        "[{}] {plan_id}: {}\n",
        at.format("%Y-%m-%d %H:%M:%S UTC"),
        reason.split_whitespace().collect::<Vec<_>>().join(" ")
    );
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io_err)?;
    file.write_all(line.as_bytes()).map_err(io_err)?;
    Ok(())
}
