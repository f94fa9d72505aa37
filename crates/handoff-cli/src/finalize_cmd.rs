//! `handoff finalize <plan-id>`: commit the workspace, merge it into the
//! main branch and reclaim the plan's resources.

use std::path::Path;

use anyhow::{Context, Result, bail};

use handoff_core::RepoContext;
use handoff_core::git::{GitCli, Vcs};
use handoff_core::lifecycle::{self, Integrator};
use handoff_core::plan::PlanMetadata;

/// Commits everything in the workspace on the plan branch, then merges the
/// plan branch into the main branch checked out at the repository root.
pub struct GitMergeIntegrator {
    git: GitCli,
    message: Option<String>,
}

impl GitMergeIntegrator {
    pub fn new(git: GitCli, message: Option<String>) -> Self {
        Self { git, message }
    }
}

impl Integrator for GitMergeIntegrator {
    fn integrate(&self, plan: &PlanMetadata, workspace: &Path, main_branch: &str) -> Result<()> {
        let plan_id = plan.plan_id.as_str();
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("Implement plan {plan_id}"));

        self.git
            .run_in(workspace, &["add", "--all"])
            .context("failed to stage workspace changes")?;
        self.git
            .run_in(workspace, &["commit", "--quiet", "-m", &message])
            .context("failed to commit workspace changes")?;

        let root = self.git.repo_root();
        let current = self
            .git
            .run_in(root, &["rev-parse", "--abbrev-ref", "HEAD"])
            .context("failed to read the current branch")?;
        if current != main_branch {
            bail!(
                "{} has {current} checked out; check out {main_branch} and run finalize again",
                root.display()
            );
        }

        let merge_message = format!("Merge plan {plan_id}");
        let branch_ref = format!("refs/heads/{plan_id}");
        if let Err(e) = self.git.run_in(
            root,
            &["merge", "--no-ff", "--quiet", "-m", &merge_message, &branch_ref],
        ) {
            if self.git.run_in(root, &["merge", "--abort"]).is_err() {
                tracing::warn!(plan_id, "could not abort failed merge");
            }
            return Err(e).with_context(|| format!("failed to merge {plan_id} into {main_branch}"));
        }
        Ok(())
    }
}

pub fn run_finalize(
    ctx: &RepoContext,
    git: GitCli,
    plan_id: &str,
    message: Option<String>,
) -> Result<()> {
    let integrator = GitMergeIntegrator::new(git, message);
    let outcome = lifecycle::finalize(ctx, plan_id, &integrator)
        .with_context(|| format!("failed to finalize plan {plan_id}"))?;

    if outcome.resumed {
        println!(
            "Plan {plan_id} was already merged into {}; finishing cleanup.",
            ctx.main_branch()
        );
    } else {
        println!("Merged {plan_id} into {}.", ctx.main_branch());
    }
    if outcome.workspace_removed {
        println!("  workspace removed");
    }
    if let Some(tip) = &outcome.merged_tip {
        println!("  branch {plan_id} deleted (was {tip})");
    }
    println!("  plan marked implemented");
    if outcome.backup_removed {
        println!("  backup removed");
    }
    for warning in &outcome.warnings {
        eprintln!("  Warning: {warning}");
    }
    println!("\nPlan {plan_id} finalized.");
    Ok(())
}
