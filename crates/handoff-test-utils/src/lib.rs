//! Shared test utilities for handoff integration tests.
//!
//! Provides throwaway git repositories with an initial commit on `main`,
//! helpers for writing plan documents, and a [`FaultyVcs`] wrapper that
//! makes selected git operations fail on demand.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use handoff_core::git::{GitCli, GitError, RefEntry, TreeEntry, Vcs, WorktreeInfo};
use tempfile::TempDir;

/// A temporary git repository. The directory is deleted on drop.
pub struct TestRepo {
    _dir: TempDir,
    path: PathBuf,
}

impl TestRepo {
    /// Initialize a repository on branch `main` with one commit.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir
            .path()
            .canonicalize()
            .expect("failed to canonicalize temp dir");

        let repo = Self { _dir: dir, path };
        repo.git(&["init", "--quiet"]);
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        repo.git(&["config", "user.email", "test@handoff.dev"]);
        repo.git(&["config", "user.name", "Handoff Test"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        std::fs::write(repo.path.join(".gitignore"), ".handoff/worktrees/\n")
            .expect("failed to write .gitignore");
        repo.commit_file("README.md", "# Test repo\n", "Initial commit");
        repo
    }

    /// Root of the repository (canonicalized).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A [`GitCli`] rooted at this repository.
    pub fn vcs(&self) -> GitCli {
        GitCli::discover(&self.path).expect("failed to open test repo")
    }

    /// Run git in the repository root and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> String {
        git_in(&self.path, args)
    }

    /// Current `HEAD` commit id.
    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"])
    }

    /// Write `name`, commit it on the current branch, return the new `HEAD`.
    pub fn commit_file(&self, name: &str, content: &str, message: &str) -> String {
        let file = self.path.join(name);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        std::fs::write(&file, content).expect("failed to write file");
        self.git(&["add", name]);
        self.git(&["commit", "--quiet", "-m", message]);
        self.head()
    }

    /// Write `<ns>/tasks/<plan_id>.md` with the given header values.
    pub fn write_plan(&self, ns: &str, plan_id: &str, git_sha: &str, status: &str) -> PathBuf {
        let path = self.path.join(ns).join("tasks").join(format!("{plan_id}.md"));
        std::fs::create_dir_all(path.parent().expect("plan path has parent"))
            .expect("failed to create tasks dir");
        std::fs::write(&path, plan_text(plan_id, git_sha, status)).expect("failed to write plan");
        path
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Run git in `dir`, panicking with stderr on failure.
pub fn git_in(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("git {} failed to start: {e}", args.join(" ")));
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Text of a minimal valid plan document.
pub fn plan_text(plan_id: &str, git_sha: &str, status: &str) -> String {
    format!(
        "---\nplan_id: {plan_id}\ngit_sha: '{git_sha}'\nstatus: {status}\nevaluation_notes: []\nauthor: tester\n---\n\n# {plan_id}\n\nDo the thing.\n"
    )
}

/// [`Vcs`] wrapper that fails the named operations and delegates the rest.
///
/// Operation names match the trait method names, e.g. `"delete_ref"`.
pub struct FaultyVcs {
    inner: GitCli,
    failing: Mutex<HashSet<&'static str>>,
}

impl FaultyVcs {
    pub fn new(inner: GitCli) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make `op` fail from now on.
    pub fn fail(&self, op: &'static str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(op);
    }

    /// Let `op` succeed again.
    pub fn heal(&self, op: &'static str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(op);
    }

    fn check(&self, op: &'static str) -> Result<(), GitError> {
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.contains(op) {
            return Err(GitError::GitExit {
                command: op.to_string(),
                code: 128,
                stderr: format!("injected failure in {op}"),
            });
        }
        Ok(())
    }
}

impl Vcs for FaultyVcs {
    fn repo_root(&self) -> &Path {
        self.inner.repo_root()
    }

    fn object_type(&self, rev: &str) -> Result<Option<String>, GitError> {
        self.check("object_type")?;
        self.inner.object_type(rev)
    }

    fn resolve_ref(&self, refname: &str) -> Result<Option<String>, GitError> {
        self.check("resolve_ref")?;
        self.inner.resolve_ref(refname)
    }

    fn create_branch(&self, name: &str, start: &str) -> Result<(), GitError> {
        self.check("create_branch")?;
        self.inner.create_branch(name, start)
    }

    fn delete_branch(&self, name: &str, force: bool) -> Result<(), GitError> {
        self.check("delete_branch")?;
        self.inner.delete_branch(name, force)
    }

    fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        self.check("list_worktrees")?;
        self.inner.list_worktrees()
    }

    fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        self.check("add_worktree")?;
        self.inner.add_worktree(path, branch)
    }

    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), GitError> {
        self.check("remove_worktree")?;
        self.inner.remove_worktree(path, force)
    }

    fn prune_worktrees(&self) -> Result<(), GitError> {
        self.check("prune_worktrees")?;
        self.inner.prune_worktrees()
    }

    fn status_porcelain(&self, workdir: &Path) -> Result<Vec<String>, GitError> {
        self.check("status_porcelain")?;
        self.inner.status_porcelain(workdir)
    }

    fn write_blob(&self, content: &[u8]) -> Result<String, GitError> {
        self.check("write_blob")?;
        self.inner.write_blob(content)
    }

    fn make_tree(&self, entries: &[TreeEntry]) -> Result<String, GitError> {
        self.check("make_tree")?;
        self.inner.make_tree(entries)
    }

    fn commit_tree(&self, tree: &str, message: &str) -> Result<String, GitError> {
        self.check("commit_tree")?;
        self.inner.commit_tree(tree, message)
    }

    fn update_ref(&self, refname: &str, oid: &str) -> Result<(), GitError> {
        self.check("update_ref")?;
        self.inner.update_ref(refname, oid)
    }

    fn delete_ref(&self, refname: &str) -> Result<(), GitError> {
        self.check("delete_ref")?;
        self.inner.delete_ref(refname)
    }

    fn for_each_ref(&self, prefix: &str) -> Result<Vec<RefEntry>, GitError> {
        self.check("for_each_ref")?;
        self.inner.for_each_ref(prefix)
    }

    fn read_blob(&self, commit: &str, path: &str) -> Result<Vec<u8>, GitError> {
        self.check("read_blob")?;
        self.inner.read_blob(commit, path)
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, GitError> {
        self.check("is_ancestor")?;
        self.inner.is_ancestor(ancestor, descendant)
    }
}
