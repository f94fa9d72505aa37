mod abandon_cmd;
mod backup_cmds;
mod config;
mod exit_codes;
mod finalize_cmd;
mod logging;
mod plan_cmds;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use handoff_core::RepoContext;
use handoff_core::git::GitCli;

use config::HandoffConfig;

#[derive(Parser)]
#[command(
    name = "handoff",
    version,
    about = "Hand off plans to isolated, recoverable git worktrees"
)]
struct Cli {
    /// Repository to operate on (defaults to the current directory)
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Namespace directory relative to the repository root (overrides HANDOFF_NAMESPACE_DIR)
    #[arg(long, global = true)]
    namespace_dir: Option<String>,

    /// Branch that finalized plans merge into (overrides HANDOFF_MAIN_BRANCH)
    #[arg(long, global = true)]
    main_branch: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a handoff config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Scaffold a new draft plan and back it up
    New {
        /// Plan ID (3-100 characters from [A-Za-z0-9._-])
        plan_id: String,
        /// Commit the plan starts from (any revision, e.g. HEAD)
        #[arg(long)]
        sha: Option<String>,
    },
    /// Pin a plan to the commit its workspace branches from
    Pin {
        /// Plan ID to pin
        plan_id: String,
        /// Revision to pin to (defaults to HEAD)
        #[arg(long)]
        sha: Option<String>,
    },
    /// Validate a plan document and print its metadata
    Validate {
        /// Path to the plan markdown file
        path: PathBuf,
    },
    /// Provision the plan's workspace and mark it as coding
    Start {
        /// Plan ID to start
        plan_id: String,
    },
    /// Create or refresh the active backup of a plan
    Backup {
        /// Plan ID to back up
        plan_id: String,
    },
    /// List plan backups
    Backups {
        /// List the abandoned namespace instead of the active one
        #[arg(long)]
        abandoned: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete old abandoned backups whose plan file no longer exists
    BackupsPrune {
        /// Only prune backups older than this many days
        #[arg(long)]
        older_than_days: u32,
    },
    /// Restore a plan file from its backup
    Recover {
        /// Plan ID to recover
        plan_id: String,
        /// Recover from the abandoned namespace
        #[arg(long)]
        abandoned: bool,
        /// Overwrite an existing plan file
        #[arg(long)]
        force: bool,
    },
    /// Remove a plan's workspace, branch and file, keeping an abandoned backup
    Abandon {
        /// Plan ID to abandon
        plan_id: String,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
        /// Reason recorded in the abandon log
        #[arg(long)]
        reason: Option<String>,
    },
    /// Commit and merge a plan's workspace, then clean up after it
    Finalize {
        /// Plan ID to finalize
        plan_id: String,
        /// Commit message for the workspace changes
        #[arg(long, short = 'm')]
        message: Option<String>,
    },
    /// Print shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Open the repository and build the per-invocation context.
fn open_context(cli: &Cli) -> anyhow::Result<(RepoContext, GitCli)> {
    let resolved = HandoffConfig::resolve(cli.namespace_dir.as_deref(), cli.main_branch.as_deref())?;

    let start = match &cli.repo {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let git = GitCli::discover(&start)
        .with_context(|| format!("{} is not inside a git repository", start.display()))?;

    let ctx = RepoContext::new(
        Box::new(git.clone()),
        &resolved.namespace_dir,
        resolved.main_branch,
    );
    tracing::debug!(?ctx, "opened repository");
    Ok((ctx, git))
}

/// Run one command to completion and return its exit code.
fn run(cli: Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Init { force } => {
            config::cmd_init(*force, cli.namespace_dir.as_deref(), cli.main_branch.as_deref())?;
            return Ok(exit_codes::OK);
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "handoff", &mut std::io::stdout());
            return Ok(exit_codes::OK);
        }
        _ => {}
    }

    let (ctx, git) = open_context(&cli)?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => {}
        Commands::New { plan_id, sha } => {
            plan_cmds::run_new(&ctx, &plan_id, sha.as_deref())?;
        }
        Commands::Pin { plan_id, sha } => {
            plan_cmds::run_pin(&ctx, &plan_id, sha.as_deref())?;
        }
        Commands::Validate { path } => {
            plan_cmds::run_validate(&ctx, &path)?;
        }
        Commands::Start { plan_id } => {
            plan_cmds::run_start(&ctx, &plan_id)?;
        }
        Commands::Backup { plan_id } => {
            backup_cmds::run_backup(&ctx, &plan_id)?;
        }
        Commands::Backups { abandoned, json } => {
            backup_cmds::run_list(&ctx, abandoned, json)?;
        }
        Commands::BackupsPrune { older_than_days } => {
            backup_cmds::run_prune(&ctx, older_than_days)?;
        }
        Commands::Recover {
            plan_id,
            abandoned,
            force,
        } => {
            backup_cmds::run_recover(&ctx, &plan_id, abandoned, force)?;
        }
        Commands::Abandon {
            plan_id,
            yes,
            reason,
        } => {
            return abandon_cmd::run_abandon(&ctx, &plan_id, yes, reason.as_deref());
        }
        Commands::Finalize { plan_id, message } => {
            finalize_cmd::run_finalize(&ctx, git, &plan_id, message)?;
        }
    }

    Ok(exit_codes::OK)
}

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();

    // Commands are synchronous; run them off the runtime so Ctrl-C is seen
    // even while one blocks on git or on a confirmation prompt.
    let command = tokio::task::spawn_blocking(move || run(cli));

    let code = tokio::select! {
        joined = command => match joined {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                eprintln!("Error: {e:#}");
                exit_codes::FAILURE
            }
            Err(e) => {
                eprintln!("Error: command panicked: {e}");
                exit_codes::FAILURE
            }
        },
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted.");
            exit_codes::INTERRUPTED
        }
    };

    std::process::exit(code);
}
