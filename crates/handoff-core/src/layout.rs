//! On-disk layout of the handoff namespace directory.
//!
//! ```text
//! <repo>/<ns>/tasks/<plan_id>.md        plan documents
//! <repo>/<ns>/worktrees/<plan_id>       per-plan worktrees
//! <repo>/<ns>/abandoned-plans.log       abandonment reasons
//! ```

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Default name of the namespace directory under the repository root.
pub const DEFAULT_NAMESPACE_DIR: &str = ".handoff";

/// Rejected plan identifier or escaping path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("invalid plan id {plan_id:?}: {reason}")]
    InvalidPlanId { plan_id: String, reason: &'static str },

    #[error("path {path} escapes {parent}")]
    Escapes { path: PathBuf, parent: PathBuf },
}

/// Resolved paths for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    repo_root: PathBuf,
    namespace_dir: PathBuf,
}

impl Layout {
    pub fn new(repo_root: impl Into<PathBuf>, namespace_dir: impl AsRef<Path>) -> Self {
        let repo_root = repo_root.into();
        let namespace_dir = repo_root.join(namespace_dir.as_ref());
        Self {
            repo_root,
            namespace_dir,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn namespace_dir(&self) -> &Path {
        &self.namespace_dir
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.namespace_dir.join("tasks")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.namespace_dir.join("worktrees")
    }

    pub fn abandon_log_path(&self) -> PathBuf {
        self.namespace_dir.join("abandoned-plans.log")
    }

    pub fn gitignore_path(&self) -> PathBuf {
        self.namespace_dir.join(".gitignore")
    }

    /// Path of the plan document for `plan_id`.
    pub fn plan_path(&self, plan_id: &str) -> Result<PathBuf, LayoutError> {
        check_plan_id_segment(plan_id)?;
        contained(&self.tasks_dir(), &format!("{plan_id}.md"))
    }

    /// Plan path relative to the repository root, with `/` separators.
    ///
    /// This is the path the plan occupies inside backup trees.
    pub fn plan_repo_path(&self, plan_id: &str) -> Result<String, LayoutError> {
        let absolute = self.plan_path(plan_id)?;
        let relative = absolute
            .strip_prefix(&self.repo_root)
            .map_err(|_| LayoutError::Escapes {
                path: absolute.clone(),
                parent: self.repo_root.clone(),
            })?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(segments.join("/"))
    }

    /// Path of the worktree for `plan_id`. Pure: never touches the disk.
    pub fn worktree_path(&self, plan_id: &str) -> Result<PathBuf, LayoutError> {
        get_worktree_path(&self.worktrees_dir(), plan_id)
    }
}

/// Join `plan_id` onto `worktrees_dir`, refusing anything that could resolve
/// outside of it.
pub fn get_worktree_path(worktrees_dir: &Path, plan_id: &str) -> Result<PathBuf, LayoutError> {
    check_plan_id_segment(plan_id)?;
    contained(worktrees_dir, plan_id)
}

fn check_plan_id_segment(plan_id: &str) -> Result<(), LayoutError> {
    let invalid = |reason| LayoutError::InvalidPlanId {
        plan_id: plan_id.to_string(),
        reason,
    };
    if plan_id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if plan_id.contains('/') || plan_id.contains('\\') {
        return Err(invalid("must not contain path separators"));
    }
    if plan_id == "." || plan_id == ".." {
        return Err(invalid("must not be a relative directory segment"));
    }
    if plan_id.contains('\0') {
        return Err(invalid("must not contain NUL"));
    }
    Ok(())
}

/// Lexically join `child` onto `parent` and check the result stays inside.
fn contained(parent: &Path, child: &str) -> Result<PathBuf, LayoutError> {
    let joined = normalize(&parent.join(child));
    let parent_norm = normalize(parent);
    if joined == parent_norm || !joined.starts_with(&parent_norm) {
        return Err(LayoutError::Escapes {
            path: joined,
            parent: parent_norm,
        });
    }
    Ok(joined)
}

/// Collapse `.` and `..` without consulting the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
