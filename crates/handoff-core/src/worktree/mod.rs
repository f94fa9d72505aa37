//! Git worktree management for plan isolation.
//!
//! Each plan runs in its own git worktree at `<ns>/worktrees/<plan_id>`,
//! checked out on a branch named after the plan. Worktrees share the object
//! store of the main repository but have independent working directories and
//! index files.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::git::{GitError, Vcs, WorktreeInfo};
use crate::layout::{Layout, LayoutError};
use crate::plan::PlanMetadata;

/// Inconsistent or conflicting workspace state.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The plan id cannot be turned into a contained worktree path.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// The plan is not pinned to a commit yet.
    #[error("plan {plan_id} still has the placeholder git_sha; pin it to a commit first")]
    PlaceholderSha { plan_id: String },

    /// The plan id is a valid plan id but git would not accept it as a
    /// branch name.
    #[error("plan id {plan_id:?} cannot be used as a branch name: {reason}")]
    InvalidBranchName {
        plan_id: String,
        reason: &'static str,
    },

    /// A worktree is registered at the path but its directory is gone and
    /// could not be pruned.
    #[error("worktree {} is registered but its directory is missing", path.display())]
    MissingDirectory { path: PathBuf },

    /// Something that is not a registered worktree occupies the path.
    #[error("{} exists but is not a registered worktree of this repository", path.display())]
    StrayDirectory { path: PathBuf },

    /// The branch is already checked out somewhere else.
    #[error("branch {branch} is already checked out at {}", bound_to.display())]
    BranchConflict { branch: String, bound_to: PathBuf },

    /// The worktree at the expected path has a different branch checked out.
    #[error(
        "worktree path exists but has unexpected branch: expected {expected}, found {found}"
    )]
    BranchMismatch { expected: String, found: String },

    /// The branch tip moved away from the plan's commit.
    #[error("branch {branch} is at {found} but plan expects {expected}")]
    ShaMismatch {
        branch: String,
        expected: String,
        found: String,
    },

    #[error("failed to create {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Git(#[from] GitError),
}

/// Creates, validates and removes plan worktrees.
pub struct WorkspaceManager<'a> {
    vcs: &'a dyn Vcs,
    layout: &'a Layout,
}

impl<'a> WorkspaceManager<'a> {
    pub fn new(vcs: &'a dyn Vcs, layout: &'a Layout) -> Self {
        Self { vcs, layout }
    }

    /// Where the worktree for `plan_id` lives. Does not touch the disk.
    pub fn worktree_path(&self, plan_id: &str) -> Result<PathBuf, WorkspaceError> {
        Ok(self.layout.worktree_path(plan_id)?)
    }

    /// Return a worktree for the plan, creating branch and worktree if needed.
    ///
    /// This operation is **idempotent**: a second call with the same metadata
    /// returns the same path without creating anything. Every inconsistency
    /// (stray directory, branch bound elsewhere, moved branch tip) is an
    /// error. The one exception is a registration whose directory is gone:
    /// it is pruned and the worktree recreated. The worktree is added last,
    /// so a failing call leaves no worktree behind.
    pub fn ensure(&self, metadata: &PlanMetadata) -> Result<PathBuf, WorkspaceError> {
        let plan_id = metadata.plan_id.as_str();
        let path = self.worktree_path(plan_id)?;

        if metadata.has_placeholder_sha() {
            return Err(WorkspaceError::PlaceholderSha {
                plan_id: plan_id.to_string(),
            });
        }
        if let Some(reason) = branch_name_problem(plan_id) {
            return Err(WorkspaceError::InvalidBranchName {
                plan_id: plan_id.to_string(),
                reason,
            });
        }

        let mut worktrees = self.vcs.list_worktrees()?;
        if find_by_path(&worktrees, &path).is_some() && !path.is_dir() {
            tracing::warn!(
                path = %path.display(),
                "worktree registered but directory is missing, pruning"
            );
            self.vcs.prune_worktrees()?;
            worktrees = self.vcs.list_worktrees()?;
            if find_by_path(&worktrees, &path).is_some() {
                return Err(WorkspaceError::MissingDirectory { path });
            }
        }
        let existing = find_by_path(&worktrees, &path);

        if existing.is_none() && path.exists() {
            return Err(WorkspaceError::StrayDirectory { path });
        }

        if let Some(bound) = worktrees
            .iter()
            .find(|wt| wt.branch.as_deref() == Some(plan_id))
        {
            if !same_path(&bound.path, &path) {
                return Err(WorkspaceError::BranchConflict {
                    branch: plan_id.to_string(),
                    bound_to: bound.path.clone(),
                });
            }
        }

        if let Some(existing) = existing {
            match existing.branch.as_deref() {
                Some(branch) if branch == plan_id => {}
                other => {
                    return Err(WorkspaceError::BranchMismatch {
                        expected: plan_id.to_string(),
                        found: other.unwrap_or("(detached HEAD)").to_string(),
                    });
                }
            }
            self.check_tip(plan_id, &metadata.git_sha)?;
            tracing::info!(
                path = %path.display(),
                branch = plan_id,
                "worktree already exists, returning existing"
            );
            return Ok(path);
        }

        let created_branch = if self.branch_tip(plan_id)?.is_some() {
            self.check_tip(plan_id, &metadata.git_sha)?;
            false
        } else {
            self.vcs.create_branch(plan_id, &metadata.git_sha)?;
            tracing::info!(branch = plan_id, sha = %metadata.git_sha, "created plan branch");
            true
        };

        let parent = self.layout.worktrees_dir();
        if let Err(e) = std::fs::create_dir_all(&parent) {
            self.cleanup_partial(&path, created_branch.then_some(plan_id));
            return Err(WorkspaceError::Io {
                path: parent,
                source: e,
            });
        }

        if let Err(e) = self.vcs.add_worktree(&path, plan_id) {
            self.cleanup_partial(&path, created_branch.then_some(plan_id));
            return Err(e.into());
        }

        tracing::info!(path = %path.display(), branch = plan_id, "created worktree");
        Ok(path)
    }

    /// The registered worktree for `plan_id`, if any.
    pub fn find(&self, plan_id: &str) -> Result<Option<WorktreeInfo>, WorkspaceError> {
        let path = self.worktree_path(plan_id)?;
        let worktrees = self.vcs.list_worktrees()?;
        Ok(find_by_path(&worktrees, &path).cloned())
    }

    /// Remove the worktree for `plan_id`.
    ///
    /// Idempotent: returns `Ok(false)` when nothing was registered and no
    /// directory remained. A leftover unregistered directory is deleted only
    /// when `force` is set.
    pub fn remove(&self, plan_id: &str, force: bool) -> Result<bool, WorkspaceError> {
        let path = self.worktree_path(plan_id)?;

        if self.find(plan_id)?.is_none() {
            if path.exists() {
                if !force {
                    return Err(WorkspaceError::StrayDirectory { path });
                }
                tracing::warn!(
                    path = %path.display(),
                    "directory exists but not registered as worktree, removing"
                );
                std::fs::remove_dir_all(&path).map_err(|e| WorkspaceError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                return Ok(true);
            }
            return Ok(false);
        }

        if !path.is_dir() {
            self.vcs.prune_worktrees()?;
            tracing::info!(path = %path.display(), "pruned worktree with missing directory");
            return Ok(true);
        }

        self.vcs.remove_worktree(&path, force)?;
        tracing::info!(path = %path.display(), force, "removed worktree");
        Ok(true)
    }

    /// Whether the worktree at `path` has staged, unstaged or untracked changes.
    pub fn has_uncommitted_changes(&self, path: &Path) -> Result<bool, WorkspaceError> {
        Ok(!self.vcs.status_porcelain(path)?.is_empty())
    }

    /// Tip of `refs/heads/<branch>`, if the branch exists.
    pub fn branch_tip(&self, branch: &str) -> Result<Option<String>, WorkspaceError> {
        Ok(self.vcs.resolve_ref(&format!("refs/heads/{branch}"))?)
    }

    fn check_tip(&self, branch: &str, expected: &str) -> Result<(), WorkspaceError> {
        match self.branch_tip(branch)? {
            Some(found) if found == expected => Ok(()),
            Some(found) => Err(WorkspaceError::ShaMismatch {
                branch: branch.to_string(),
                expected: expected.to_string(),
                found,
            }),
            None => Err(WorkspaceError::ShaMismatch {
                branch: branch.to_string(),
                expected: expected.to_string(),
                found: "(missing branch)".to_string(),
            }),
        }
    }

    /// Best-effort cleanup of a partially created worktree directory, and of
    /// the branch if this call created it.
    fn cleanup_partial(&self, path: &Path, created_branch: Option<&str>) {
        if path.exists() {
            tracing::warn!(
                path = %path.display(),
                "cleaning up partial worktree directory"
            );
            let _ = std::fs::remove_dir_all(path);
        }
        let _ = self.vcs.prune_worktrees();
        if let Some(branch) = created_branch {
            if let Err(e) = self.vcs.delete_branch(branch, true) {
                tracing::warn!(branch, error = %e, "failed to delete branch after failed worktree add");
            }
        }
    }
}

/// Why git would refuse `name` as a branch name, for names made of
/// `[A-Za-z0-9._-]`.
pub fn branch_name_problem(name: &str) -> Option<&'static str> {
    if name.starts_with('-') {
        Some("must not start with '-'")
    } else if name.starts_with('.') {
        Some("must not start with '.'")
    } else if name.ends_with('.') {
        Some("must not end with '.'")
    } else if name.ends_with(".lock") {
        Some("must not end with '.lock'")
    } else if name.contains("..") {
        Some("must not contain '..'")
    } else {
        None
    }
}

fn find_by_path<'w>(worktrees: &'w [WorktreeInfo], path: &Path) -> Option<&'w WorktreeInfo> {
    worktrees.iter().find(|wt| same_path(&wt.path, path))
}

/// Compare paths, canonicalizing where possible.
fn same_path(a: &Path, b: &Path) -> bool {
    let a = a.canonicalize().unwrap_or_else(|_| a.to_path_buf());
    let b = b.canonicalize().unwrap_or_else(|_| b.to_path_buf());
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitCli;
    use crate::layout::DEFAULT_NAMESPACE_DIR;
    use crate::plan::{PLACEHOLDER_SHA, PlanStatus};
    use handoff_test_utils::TestRepo;

    fn metadata(plan_id: &str, sha: &str) -> PlanMetadata {
        PlanMetadata {
            path: PathBuf::from(format!("{plan_id}.md")),
            plan_id: plan_id.to_string(),
            git_sha: sha.to_string(),
            status: PlanStatus::Ready,
            evaluation_notes: Vec::new(),
            issue_id: None,
            author: None,
            created_at: None,
            notes: None,
            body: "body\n".to_string(),
        }
    }

    struct Fixture {
        repo: TestRepo,
        git: GitCli,
        layout: Layout,
    }

    impl Fixture {
        fn new() -> Self {
            let repo = TestRepo::new();
            let git = GitCli::discover(repo.path()).unwrap();
            let layout = Layout::new(repo.path(), DEFAULT_NAMESPACE_DIR);
            Self { repo, git, layout }
        }

        fn manager(&self) -> WorkspaceManager<'_> {
            WorkspaceManager::new(&self.git, &self.layout)
        }
    }

    #[test]
    fn ensure_creates_branch_and_worktree() {
        let fx = Fixture::new();
        let head = fx.repo.head();

        let path = fx.manager().ensure(&metadata("foo", &head)).unwrap();

        assert_eq!(path, fx.repo.path().join(".handoff/worktrees/foo"));
        assert!(path.join("README.md").exists());
        assert_eq!(fx.manager().branch_tip("foo").unwrap(), Some(head));
    }

    #[test]
    fn ensure_is_idempotent() {
        let fx = Fixture::new();
        let meta = metadata("foo", &fx.repo.head());

        let first = fx.manager().ensure(&meta).unwrap();
        let before = fx.git.list_worktrees().unwrap();
        let second = fx.manager().ensure(&meta).unwrap();
        let after = fx.git.list_worktrees().unwrap();

        assert_eq!(first, second);
        assert_eq!(before, after);
    }

    #[test]
    fn ensure_rejects_traversal_before_touching_disk() {
        let fx = Fixture::new();
        let err = fx
            .manager()
            .ensure(&metadata("../../etc", &fx.repo.head()))
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::Layout(_)), "{err}");
        assert!(!fx.layout.worktrees_dir().exists());
    }

    #[test]
    fn ensure_rejects_placeholder() {
        let fx = Fixture::new();
        let err = fx
            .manager()
            .ensure(&metadata("foo", PLACEHOLDER_SHA))
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::PlaceholderSha { .. }));
    }

    #[test]
    fn ensure_rejects_stray_directory() {
        let fx = Fixture::new();
        let stray = fx.layout.worktrees_dir().join("foo");
        std::fs::create_dir_all(&stray).unwrap();

        let err = fx
            .manager()
            .ensure(&metadata("foo", &fx.repo.head()))
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::StrayDirectory { .. }), "{err}");
        assert!(fx.manager().branch_tip("foo").unwrap().is_none());
    }

    #[test]
    fn ensure_rejects_branch_bound_elsewhere() {
        let fx = Fixture::new();
        let head = fx.repo.head();
        fx.repo.git(&["branch", "foo", &head]);
        let elsewhere = tempfile::TempDir::new().unwrap();
        let other = elsewhere.path().join("other");
        fx.repo
            .git(&["worktree", "add", other.to_str().unwrap(), "foo"]);

        let err = fx.manager().ensure(&metadata("foo", &head)).unwrap_err();
        assert!(matches!(err, WorkspaceError::BranchConflict { .. }), "{err}");
        assert!(!fx.layout.worktree_path("foo").unwrap().exists());
    }

    #[test]
    fn ensure_rejects_moved_branch() {
        let fx = Fixture::new();
        let old = fx.repo.head();
        let new = fx.repo.commit_file("x.txt", "x\n", "second");
        fx.repo.git(&["branch", "foo", &new]);

        let err = fx.manager().ensure(&metadata("foo", &old)).unwrap_err();
        match err {
            WorkspaceError::ShaMismatch {
                expected, found, ..
            } => {
                assert_eq!(expected, old);
                assert_eq!(found, new);
            }
            other => panic!("expected ShaMismatch, got {other}"),
        }
        assert!(!fx.layout.worktree_path("foo").unwrap().exists());
    }

    #[test]
    fn ensure_detects_drift_in_existing_worktree() {
        let fx = Fixture::new();
        let head = fx.repo.head();
        let path = fx.manager().ensure(&metadata("foo", &head)).unwrap();

        std::fs::write(path.join("work.txt"), "w\n").unwrap();
        handoff_test_utils::git_in(&path, &["add", "work.txt"]);
        handoff_test_utils::git_in(&path, &["commit", "--quiet", "-m", "work"]);

        let err = fx.manager().ensure(&metadata("foo", &head)).unwrap_err();
        assert!(matches!(err, WorkspaceError::ShaMismatch { .. }), "{err}");
    }

    #[test]
    fn ensure_reuses_existing_branch_at_expected_sha() {
        let fx = Fixture::new();
        let head = fx.repo.head();
        fx.repo.git(&["branch", "foo", &head]);

        let path = fx.manager().ensure(&metadata("foo", &head)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn remove_is_idempotent() {
        let fx = Fixture::new();
        let path = fx.manager().ensure(&metadata("foo", &fx.repo.head())).unwrap();

        assert!(fx.manager().remove("foo", true).unwrap());
        assert!(!path.exists());
        assert!(!fx.manager().remove("foo", true).unwrap());
    }

    #[test]
    fn graceful_remove_refuses_dirty_worktree() {
        let fx = Fixture::new();
        let path = fx.manager().ensure(&metadata("foo", &fx.repo.head())).unwrap();
        std::fs::write(path.join("dirty.txt"), "x").unwrap();

        assert!(fx.manager().has_uncommitted_changes(&path).unwrap());
        assert!(fx.manager().remove("foo", false).is_err());
        assert!(path.exists());
        assert!(fx.manager().remove("foo", true).unwrap());
    }

    #[test]
    fn forced_remove_deletes_stray_directory() {
        let fx = Fixture::new();
        let stray = fx.layout.worktrees_dir().join("foo");
        std::fs::create_dir_all(&stray).unwrap();

        assert!(matches!(
            fx.manager().remove("foo", false),
            Err(WorkspaceError::StrayDirectory { .. })
        ));
        assert!(fx.manager().remove("foo", true).unwrap());
        assert!(!stray.exists());
    }

    #[test]
    fn ensure_recreates_worktree_whose_directory_was_deleted() {
        let fx = Fixture::new();
        let meta = metadata("foo", &fx.repo.head());
        let path = fx.manager().ensure(&meta).unwrap();

        std::fs::remove_dir_all(&path).unwrap();
        assert!(fx.manager().find("foo").unwrap().is_some());

        let again = fx.manager().ensure(&meta).unwrap();
        assert_eq!(again, path);
        assert!(again.join("README.md").exists());
        assert_eq!(fx.git.list_worktrees().unwrap().len(), 2);
    }

    #[test]
    fn remove_prunes_worktree_whose_directory_was_deleted() {
        let fx = Fixture::new();
        let path = fx.manager().ensure(&metadata("foo", &fx.repo.head())).unwrap();
        std::fs::remove_dir_all(&path).unwrap();

        assert!(fx.manager().remove("foo", false).unwrap());
        assert!(fx.manager().find("foo").unwrap().is_none());
        assert!(!fx.manager().remove("foo", false).unwrap());
    }

    #[test]
    fn ensure_rejects_ids_git_cannot_use_as_branches() {
        let fx = Fixture::new();
        let head = fx.repo.head();

        for plan_id in ["--force", "-x-y", ".hidden", "trailing.", "x.lock", "a..b"] {
            let err = fx.manager().ensure(&metadata(plan_id, &head)).unwrap_err();
            assert!(
                matches!(err, WorkspaceError::InvalidBranchName { .. }),
                "{plan_id}: {err}"
            );
        }
        assert_eq!(
            fx.repo
                .git(&["for-each-ref", "--format=%(refname)", "refs/heads/"]),
            "refs/heads/main"
        );
        assert!(!fx.layout.worktrees_dir().exists());
    }

    #[test]
    fn branch_name_problem_accepts_ordinary_ids() {
        for ok in ["foo", "add-auth", "v1.2_fix", "a-b.c"] {
            assert_eq!(branch_name_problem(ok), None, "{ok}");
        }
    }
}
