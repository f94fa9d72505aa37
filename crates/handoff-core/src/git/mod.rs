//! Narrow capability interface over git.
//!
//! Everything above this module (plans, worktrees, backups, lifecycle
//! workflows) talks to the repository only through the [`Vcs`] trait. The one
//! implementation that actually spawns `git` lives in [`cli`].

pub mod cli;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use cli::GitCli;

/// Errors raised by git plumbing operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The path does not exist or is not inside a git repository.
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    /// The git binary could not be spawned or fed input.
    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A git command exited with a non-zero status.
    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Output from git could not be interpreted.
    #[error("failed to parse git output: {0}")]
    ParseError(String),
}

/// Information about a single registered worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Absolute path to the worktree directory.
    pub path: PathBuf,
    /// Branch checked out in this worktree, if any.
    pub branch: Option<String>,
    /// HEAD commit SHA.
    pub head_commit: String,
}

/// One entry for `git mktree`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: &'static str,
    pub kind: &'static str,
    pub oid: String,
    pub name: String,
}

impl TreeEntry {
    /// A regular (non-executable) file.
    pub fn blob(oid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: "100644",
            kind: "blob",
            oid: oid.into(),
            name: name.into(),
        }
    }

    /// A subdirectory.
    pub fn tree(oid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: "040000",
            kind: "tree",
            oid: oid.into(),
            name: name.into(),
        }
    }
}

/// A ref returned by [`Vcs::for_each_ref`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    /// Full ref name, e.g. `refs/plan-backups/foo`.
    pub name: String,
    /// Object the ref points at.
    pub oid: String,
    /// Committer timestamp of the pointed-to commit.
    pub committed_at: DateTime<Utc>,
}

/// The git operations the rest of the crate is allowed to use.
///
/// Implementations must be side-effect free for the query methods
/// (`object_type`, `resolve_ref`, `list_worktrees`, `status_porcelain`,
/// `for_each_ref`, `read_blob`, `is_ancestor`).
pub trait Vcs: Send + Sync {
    /// Top-level directory of the main worktree.
    fn repo_root(&self) -> &Path;

    /// Object type (`commit`, `tree`, `blob`, `tag`) of `rev`, or `None` if
    /// the object does not exist.
    fn object_type(&self, rev: &str) -> Result<Option<String>, GitError>;

    /// Resolve a fully-qualified ref to an object id, or `None` if absent.
    fn resolve_ref(&self, refname: &str) -> Result<Option<String>, GitError>;

    /// Create a branch pointing at `start`. Fails if it already exists.
    fn create_branch(&self, name: &str, start: &str) -> Result<(), GitError>;

    /// Delete a local branch (`-D` when `force`, `-d` otherwise).
    fn delete_branch(&self, name: &str, force: bool) -> Result<(), GitError>;

    /// All worktrees registered with the repository, main worktree included.
    fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitError>;

    /// Add a worktree at `path` with the existing `branch` checked out.
    fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), GitError>;

    /// Unregister and delete the worktree at `path`.
    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), GitError>;

    /// Drop registrations whose directories no longer exist.
    fn prune_worktrees(&self) -> Result<(), GitError>;

    /// Porcelain status lines for the worktree at `workdir` (untracked
    /// files included). Empty means clean.
    fn status_porcelain(&self, workdir: &Path) -> Result<Vec<String>, GitError>;

    /// Write `content` to the object store as a blob.
    fn write_blob(&self, content: &[u8]) -> Result<String, GitError>;

    /// Write a tree object from the given entries.
    fn make_tree(&self, entries: &[TreeEntry]) -> Result<String, GitError>;

    /// Create a commit with no parents.
    fn commit_tree(&self, tree: &str, message: &str) -> Result<String, GitError>;

    /// Point `refname` at `oid`, overwriting any previous value.
    fn update_ref(&self, refname: &str, oid: &str) -> Result<(), GitError>;

    /// Delete `refname`.
    fn delete_ref(&self, refname: &str) -> Result<(), GitError>;

    /// All refs under `prefix` (e.g. `refs/plan-backups/`).
    fn for_each_ref(&self, prefix: &str) -> Result<Vec<RefEntry>, GitError>;

    /// Contents of the blob at `path` inside `commit`, without checkout.
    fn read_blob(&self, commit: &str, path: &str) -> Result<Vec<u8>, GitError>;

    /// Whether `ancestor` is reachable from `descendant`.
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, GitError>;
}

/// Parse the porcelain output of `git worktree list --porcelain`.
///
/// The format consists of blocks separated by blank lines. Each block has:
///
/// ```text
/// worktree <path>
/// HEAD <sha>
/// branch refs/heads/<name>
/// ```
///
/// The main worktree may show `bare` instead of `branch`, and detached
/// worktrees show `detached` instead of `branch`.
pub(crate) fn parse_porcelain_output(output: &str) -> Result<Vec<WorktreeInfo>, GitError> {
    let mut worktrees = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_head: Option<String> = None;
    let mut current_branch: Option<String> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let (Some(path), Some(head)) = (current_path.take(), current_head.take()) {
                worktrees.push(WorktreeInfo {
                    path,
                    branch: current_branch.take(),
                    head_commit: head,
                });
            } else {
                current_path = None;
                current_head = None;
                current_branch = None;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            let branch = rest.strip_prefix("refs/heads/").unwrap_or(rest).to_string();
            current_branch = Some(branch);
        } else if line.starts_with("worktree") {
            return Err(GitError::ParseError(format!("malformed worktree line: {line:?}")));
        }
        // `bare`, `detached`, `locked`, `prunable` carry nothing we need.
    }

    if let (Some(path), Some(head)) = (current_path, current_head) {
        worktrees.push(WorktreeInfo {
            path,
            branch: current_branch,
            head_commit: head,
        });
    }

    Ok(worktrees)
}

/// Parse `for-each-ref` lines of the form `<refname>\t<oid>\t<unix-seconds>`.
pub(crate) fn parse_ref_lines(output: &str) -> Result<Vec<RefEntry>, GitError> {
    let mut entries = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut parts = line.split('\t');
        let (Some(name), Some(oid), Some(ts)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GitError::ParseError(format!("unexpected ref line: {line:?}")));
        };
        let seconds: i64 = ts
            .trim()
            .parse()
            .map_err(|_| GitError::ParseError(format!("bad commit timestamp {ts:?} for {name}")))?;
        let committed_at = DateTime::<Utc>::from_timestamp(seconds, 0)
            .ok_or_else(|| GitError::ParseError(format!("timestamp out of range for {name}")))?;
        entries.push(RefEntry {
            name: name.to_string(),
            oid: oid.to_string(),
            committed_at,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_porcelain_output() {
        let input = "\
worktree /home/user/project
HEAD abc123def456
branch refs/heads/main

worktree /home/user/project/.handoff/worktrees/feature
HEAD 789abc012def
branch refs/heads/feature

worktree /home/user/worktrees/detached
HEAD 111222333444
detached

";
        let result = parse_porcelain_output(input).unwrap();
        assert_eq!(result.len(), 3);

        assert_eq!(result[0].path, PathBuf::from("/home/user/project"));
        assert_eq!(result[0].head_commit, "abc123def456");
        assert_eq!(result[0].branch.as_deref(), Some("main"));

        assert_eq!(result[1].branch.as_deref(), Some("feature"));
        assert_eq!(result[2].branch, None);
    }

    #[test]
    fn test_parse_porcelain_output_no_trailing_newline() {
        let input = "\
worktree /home/user/project
HEAD abc123
branch refs/heads/main";
        let result = parse_porcelain_output(input).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].branch.as_deref(), Some("main"));
    }

    #[test]
    fn test_parse_porcelain_output_empty() {
        assert!(parse_porcelain_output("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_ref_lines() {
        let input = "refs/plan-backups/alpha\taaaa\t1700000000\nrefs/plan-backups/beta\tbbbb\t1700000100\n";
        let refs = parse_ref_lines(input).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "refs/plan-backups/alpha");
        assert_eq!(refs[1].oid, "bbbb");
        assert_eq!(refs[1].committed_at.timestamp(), 1_700_000_100);
    }

    #[test]
    fn test_parse_ref_lines_rejects_garbage() {
        let err = parse_ref_lines("refs/plan-backups/alpha aaaa").unwrap_err();
        assert!(matches!(err, GitError::ParseError(_)));
    }

    #[test]
    fn tree_entry_modes() {
        let blob = TreeEntry::blob("abc", "plan.md");
        assert_eq!(blob.mode, "100644");
        assert_eq!(blob.kind, "blob");
        let tree = TreeEntry::tree("def", "tasks");
        assert_eq!(tree.mode, "040000");
        assert_eq!(tree.kind, "tree");
    }
}
