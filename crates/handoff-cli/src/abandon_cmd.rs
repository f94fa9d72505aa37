//! `handoff abandon <plan-id>`: tear a plan down after confirmation.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};

use handoff_core::RepoContext;
use handoff_core::lifecycle::{self, AbandonArtifacts, AbandonOutcome, StepStatus};

use crate::exit_codes;

/// Run the abandon command and return the process exit code.
pub fn run_abandon(
    ctx: &RepoContext,
    plan_id: &str,
    yes: bool,
    reason: Option<&str>,
) -> Result<i32> {
    let artifacts = lifecycle::detect_artifacts(ctx, plan_id)
        .with_context(|| format!("failed to inspect plan {plan_id}"))?;
    if artifacts.is_empty() {
        println!("Nothing to clean up for plan {plan_id}.");
        return Ok(exit_codes::OK);
    }

    println!("Abandoning plan {plan_id} will:");
    for line in describe(&artifacts) {
        println!("  - {line}");
    }

    if !yes && !confirm("Proceed?")? {
        println!("Aborted; nothing was changed.");
        return Ok(exit_codes::FAILURE);
    }

    let outcome = lifecycle::abandon(ctx, plan_id, reason)
        .with_context(|| format!("failed to abandon plan {plan_id}"))?;

    let AbandonOutcome::Completed { steps, .. } = &outcome else {
        println!("Nothing to clean up for plan {plan_id}.");
        return Ok(exit_codes::OK);
    };

    let mut failed = 0;
    for step in steps {
        match &step.status {
            StepStatus::Done => println!("  {}", step.name),
            StepStatus::Skipped => println!("  {} (nothing to do)", step.name),
            StepStatus::Failed(msg) => {
                failed += 1;
                eprintln!("  Warning: {} failed: {msg}", step.name);
            }
        }
    }

    if outcome.succeeded() {
        println!("\nPlan {plan_id} abandoned cleanly.");
        Ok(exit_codes::OK)
    } else {
        println!("\nPlan {plan_id} abandoned with errors: {failed} step(s) failed.");
        Ok(exit_codes::FAILURE)
    }
}

fn describe(artifacts: &AbandonArtifacts) -> Vec<&'static str> {
    let mut lines = Vec::new();
    if artifacts.workspace {
        lines.push("force-remove the workspace (uncommitted work is lost)");
    }
    if artifacts.branch {
        lines.push("force-delete the plan branch");
    }
    if artifacts.plan_file {
        lines.push("delete the plan file");
    }
    if artifacts.plan_file || artifacts.backup {
        lines.push("move the plan backup to the abandoned namespace");
    }
    lines
}

/// Ask a yes/no question on stdin. Anything but `y`/`yes` (including EOF)
/// is a no.
fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush().context("failed to flush stdout")?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
