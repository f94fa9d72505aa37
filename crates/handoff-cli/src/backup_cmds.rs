//! `handoff backup`, `handoff backups`, `handoff backups-prune` and
//! `handoff recover`.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};

use handoff_core::RepoContext;
use handoff_core::backup::Namespace;
use handoff_core::lifecycle;

pub fn run_backup(ctx: &RepoContext, plan_id: &str) -> Result<()> {
    let commit = ctx
        .backups()
        .create(plan_id)
        .with_context(|| format!("failed to back up plan {plan_id}"))?;
    println!("Backed up {plan_id} to {}{plan_id} ({commit})", Namespace::Active.ref_prefix());
    Ok(())
}

pub fn run_list(ctx: &RepoContext, abandoned: bool, json: bool) -> Result<()> {
    let namespace = if abandoned {
        Namespace::Abandoned
    } else {
        Namespace::Active
    };
    let entries = ctx.backups().list(namespace)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No {namespace} backups.");
        return Ok(());
    }

    println!("{:<40} {:<12} {:<20} PLAN FILE", "PLAN", "COMMIT", "BACKED UP");
    for entry in &entries {
        println!(
            "{:<40} {:<12} {:<20} {}",
            entry.plan_id,
            &entry.commit[..entry.commit.len().min(12)],
            entry.committed_at.format("%Y-%m-%d %H:%M:%S"),
            if entry.plan_exists { "present" } else { "missing" },
        );
    }
    println!("\n{} {namespace} backup(s).", entries.len());
    Ok(())
}

/// Delete abandoned backups older than `days` whose plan file is gone.
pub fn run_prune(ctx: &RepoContext, days: u32) -> Result<()> {
    let cutoff = Utc::now() - Duration::days(i64::from(days));
    let pruned = ctx.backups().prune(Namespace::Abandoned, cutoff)?;

    for plan_id in &pruned {
        println!("  Pruned: {plan_id}");
    }
    println!("\nPrune complete: {} abandoned backup(s) removed.", pruned.len());
    Ok(())
}

pub fn run_recover(ctx: &RepoContext, plan_id: &str, abandoned: bool, force: bool) -> Result<()> {
    let outcome = lifecycle::recover(ctx, plan_id, abandoned, force)
        .with_context(|| format!("failed to recover plan {plan_id}"))?;

    println!(
        "Recovered {plan_id} from {} backup to {}",
        outcome.namespace,
        outcome.path.display()
    );
    if outcome.reactivated {
        println!("  backup moved back to {}{plan_id}", Namespace::Active.ref_prefix());
    }
    Ok(())
}
