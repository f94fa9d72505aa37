//! `handoff new`, `handoff pin`, `handoff validate` and `handoff start`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;

use handoff_core::RepoContext;
use handoff_core::lifecycle;
use handoff_core::plan::{is_valid_plan_id, scaffold_plan};

/// Scaffold a draft plan under `<ns>/tasks/` and back it up.
///
/// `sha` is any revision git can resolve to a commit; without it the plan
/// gets the placeholder and must be pinned before `start`.
pub fn run_new(ctx: &RepoContext, plan_id: &str, sha: Option<&str>) -> Result<()> {
    if !is_valid_plan_id(plan_id) {
        bail!("invalid plan_id {plan_id:?}: expected 3-100 characters from [A-Za-z0-9._-]");
    }
    let layout = ctx.layout();
    let path = layout.plan_path(plan_id)?;
    if path.exists() {
        bail!("plan already exists at {}", path.display());
    }

    let git_sha = match sha {
        Some(rev) => Some(resolve_commit(ctx, rev)?),
        None => None,
    };

    let tasks_dir = layout.tasks_dir();
    std::fs::create_dir_all(&tasks_dir)
        .with_context(|| format!("failed to create {}", tasks_dir.display()))?;
    ensure_gitignore(&layout.gitignore_path())?;

    let text = scaffold_plan(plan_id, git_sha.as_deref(), Utc::now())?;
    std::fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    let backup = ctx.backups().create(plan_id)?;

    println!("Created {}", path.display());
    println!("  status = draft");
    match git_sha {
        Some(sha) => println!("  git_sha = {sha}"),
        None => println!(
            "  git_sha = (placeholder; run `handoff pin {plan_id}` before `handoff start`)"
        ),
    }
    println!("  backup = {backup}");
    Ok(())
}

/// Point the plan at the commit `rev` resolves to (default `HEAD`).
pub fn run_pin(ctx: &RepoContext, plan_id: &str, rev: Option<&str>) -> Result<()> {
    let sha = resolve_commit(ctx, rev.unwrap_or("HEAD"))?;
    let outcome = lifecycle::pin(ctx, plan_id, &sha)
        .with_context(|| format!("failed to pin plan {plan_id}"))?;

    if outcome.previous == outcome.git_sha {
        println!("Plan {plan_id} already pinned to {}.", outcome.git_sha);
    } else {
        println!("Pinned plan {plan_id} to {}.", outcome.git_sha);
    }
    println!("  backup = {}", outcome.backup);
    Ok(())
}

fn resolve_commit(ctx: &RepoContext, rev: &str) -> Result<String> {
    let vcs = ctx.vcs();
    let sha = vcs
        .resolve_ref(&format!("{rev}^{{commit}}"))?
        .with_context(|| format!("cannot resolve {rev:?} to a commit"))?;
    if vcs.object_type(&sha)?.as_deref() != Some("commit") {
        bail!("{rev:?} does not name a commit");
    }
    Ok(sha)
}

/// Keep worktrees out of `git status` in the main checkout.
fn ensure_gitignore(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    std::fs::write(path, "worktrees/\n")
        .with_context(|| format!("failed to write {}", path.display()))
}

pub fn run_validate(ctx: &RepoContext, path: &Path) -> Result<()> {
    let metadata = ctx
        .validator()
        .validate(path)
        .with_context(|| format!("{} is not a valid plan", path.display()))?;

    println!("{} is valid", metadata.path.display());
    println!("  plan_id = {}", metadata.plan_id);
    println!("  status = {}", metadata.status);
    println!("  git_sha = {}", metadata.git_sha);
    println!("  evaluation_notes = {}", metadata.evaluation_notes.len());
    for (key, value) in [
        ("issue_id", &metadata.issue_id),
        ("author", &metadata.author),
        ("created_at", &metadata.created_at),
    ] {
        if let Some(value) = value {
            println!("  {key} = {value}");
        }
    }
    Ok(())
}

pub fn run_start(ctx: &RepoContext, plan_id: &str) -> Result<()> {
    let outcome = lifecycle::start(ctx, plan_id)
        .with_context(|| format!("failed to start plan {plan_id}"))?;

    if outcome.promoted {
        println!("Plan {plan_id} is now {}.", outcome.status);
    } else {
        println!("Plan {plan_id} already {}; reusing workspace.", outcome.status);
    }
    println!("{}", outcome.workspace.display());
    Ok(())
}
