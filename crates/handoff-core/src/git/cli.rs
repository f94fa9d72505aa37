//! [`Vcs`] implementation that shells out to the `git` binary.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::debug;

use super::{GitError, RefEntry, TreeEntry, Vcs, WorktreeInfo, parse_porcelain_output, parse_ref_lines};

/// Git subprocess driver rooted at the main worktree of a repository.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    /// Locate the repository containing `start` (a file or directory) and
    /// return a driver rooted at its main worktree.
    ///
    /// Works from inside linked worktrees too: the root is derived from the
    /// shared git directory, not from the current checkout.
    pub fn discover(start: &Path) -> Result<Self, GitError> {
        let dir = if start.is_dir() {
            start.to_path_buf()
        } else {
            start
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        };
        if !dir.exists() {
            return Err(GitError::NotAGitRepo(start.to_path_buf()));
        }

        let output = Command::new("git")
            .args(["rev-parse", "--git-common-dir"])
            .current_dir(&dir)
            .output()
            .map_err(|e| GitError::GitCommand {
                message: "failed to run git rev-parse".into(),
                source: e,
            })?;
        if !output.status.success() {
            return Err(GitError::NotAGitRepo(start.to_path_buf()));
        }

        let common = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let common = dir.join(common);
        let common = common.canonicalize().map_err(|e| GitError::GitCommand {
            message: format!("failed to resolve git directory {}", common.display()),
            source: e,
        })?;
        if common.file_name().and_then(|n| n.to_str()) != Some(".git") {
            // Bare repositories have no worktree to hold plans.
            return Err(GitError::NotAGitRepo(start.to_path_buf()));
        }
        let root = common
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::NotAGitRepo(start.to_path_buf()))?;

        Ok(Self { root })
    }

    /// Run `git <args>` in `dir` and return trimmed stdout on success.
    ///
    /// Exposed for collaborators that need porcelain commands (commit,
    /// merge) outside the [`Vcs`] surface.
    pub fn run_in(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.output_in(dir, args)?;
        check(args, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn output_in(&self, dir: &Path, args: &[&str]) -> Result<Output, GitError> {
        debug!(dir = %dir.display(), args = ?args, "running git");
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| GitError::GitCommand {
                message: format!("failed to run git {}", label(args)),
                source: e,
            })
    }

    fn output(&self, args: &[&str]) -> Result<Output, GitError> {
        self.output_in(&self.root, args)
    }

    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        self.run_in(&self.root, args)
    }

    fn run_with_stdin(&self, args: &[&str], input: &[u8]) -> Result<String, GitError> {
        debug!(args = ?args, bytes = input.len(), "running git with stdin");
        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GitError::GitCommand {
                message: format!("failed to run git {}", label(args)),
                source: e,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).map_err(|e| GitError::GitCommand {
                message: format!("failed to write stdin for git {}", label(args)),
                source: e,
            })?;
        }

        let output = child.wait_with_output().map_err(|e| GitError::GitCommand {
            message: format!("failed to wait for git {}", label(args)),
            source: e,
        })?;
        check(args, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn label(args: &[&str]) -> String {
    args.iter().take(2).copied().collect::<Vec<_>>().join(" ")
}

fn check(args: &[&str], output: &Output) -> Result<(), GitError> {
    if output.status.success() {
        return Ok(());
    }
    Err(GitError::GitExit {
        command: label(args),
        code: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

impl Vcs for GitCli {
    fn repo_root(&self) -> &Path {
        &self.root
    }

    fn object_type(&self, rev: &str) -> Result<Option<String>, GitError> {
        let output = self.output(&["cat-file", "-t", rev])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    fn resolve_ref(&self, refname: &str) -> Result<Option<String>, GitError> {
        let output = self.output(&["rev-parse", "--verify", "--quiet", refname])?;
        if !output.status.success() {
            return Ok(None);
        }
        let oid = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(oid))
    }

    fn create_branch(&self, name: &str, start: &str) -> Result<(), GitError> {
        self.run(&["branch", "--", name, start]).map(|_| ())
    }

    fn delete_branch(&self, name: &str, force: bool) -> Result<(), GitError> {
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", flag, "--", name]).map(|_| ())
    }

    fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        let stdout = self.run(&["worktree", "list", "--porcelain"])?;
        parse_porcelain_output(&stdout)
    }

    fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        let path = path.to_string_lossy();
        self.run(&["worktree", "add", "--", path.as_ref(), branch]).map(|_| ())
    }

    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), GitError> {
        let path = path.to_string_lossy();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push("--");
        args.push(path.as_ref());
        self.run(&args).map(|_| ())
    }

    fn prune_worktrees(&self) -> Result<(), GitError> {
        self.run(&["worktree", "prune"]).map(|_| ())
    }

    fn status_porcelain(&self, workdir: &Path) -> Result<Vec<String>, GitError> {
        let stdout = self.run_in(workdir, &["status", "--porcelain=v1", "--untracked-files=all"])?;
        Ok(stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    fn write_blob(&self, content: &[u8]) -> Result<String, GitError> {
        self.run_with_stdin(&["hash-object", "-w", "--stdin"], content)
    }

    fn make_tree(&self, entries: &[TreeEntry]) -> Result<String, GitError> {
        let mut input = String::new();
        for entry in entries {
            input.push_str(&format!(
                "{} {} {}\t{}\n",
                entry.mode, entry.kind, entry.oid, entry.name
            ));
        }
        self.run_with_stdin(&["mktree"], input.as_bytes())
    }

    fn commit_tree(&self, tree: &str, message: &str) -> Result<String, GitError> {
        self.run(&["commit-tree", tree, "-m", message])
    }

    fn update_ref(&self, refname: &str, oid: &str) -> Result<(), GitError> {
        self.run(&["update-ref", refname, oid]).map(|_| ())
    }

    fn delete_ref(&self, refname: &str) -> Result<(), GitError> {
        self.run(&["update-ref", "-d", refname]).map(|_| ())
    }

    fn for_each_ref(&self, prefix: &str) -> Result<Vec<RefEntry>, GitError> {
        let stdout = self.run(&[
            "for-each-ref",
            "--format=%(refname)%09%(objectname)%09%(committerdate:unix)",
            prefix,
        ])?;
        parse_ref_lines(&stdout)
    }

    fn read_blob(&self, commit: &str, path: &str) -> Result<Vec<u8>, GitError> {
        let spec = format!("{commit}:{path}");
        let output = self.output(&["cat-file", "blob", &spec])?;
        check(&["cat-file", "blob"], &output)?;
        Ok(output.stdout)
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, GitError> {
        let args = ["merge-base", "--is-ancestor", ancestor, descendant];
        let output = self.output(&args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => {
                check(&args, &output)?;
                Ok(false)
            }
        }
    }
}
