//! Per-invocation context shared by every component.

use std::path::Path;

use crate::backup::BackupStore;
use crate::git::Vcs;
use crate::layout::Layout;
use crate::plan::PlanValidator;
use crate::worktree::WorkspaceManager;

/// Default branch that finished plans are merged into.
pub const DEFAULT_MAIN_BRANCH: &str = "main";

/// Everything a command needs to reach the repository.
///
/// Built once per command invocation and dropped on exit; components borrow
/// from it instead of reaching for process-wide state.
pub struct RepoContext {
    vcs: Box<dyn Vcs>,
    layout: Layout,
    main_branch: String,
}

impl RepoContext {
    pub fn new(vcs: Box<dyn Vcs>, namespace_dir: impl AsRef<Path>, main_branch: impl Into<String>) -> Self {
        let layout = Layout::new(vcs.repo_root(), namespace_dir);
        Self {
            vcs,
            layout,
            main_branch: main_branch.into(),
        }
    }

    pub fn vcs(&self) -> &dyn Vcs {
        self.vcs.as_ref()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn main_branch(&self) -> &str {
        &self.main_branch
    }

    pub fn validator(&self) -> PlanValidator<'_> {
        PlanValidator::new(self.vcs())
    }

    pub fn workspaces(&self) -> WorkspaceManager<'_> {
        WorkspaceManager::new(self.vcs(), &self.layout)
    }

    pub fn backups(&self) -> BackupStore<'_> {
        BackupStore::new(self.vcs(), &self.layout)
    }
}

impl std::fmt::Debug for RepoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoContext")
            .field("repo_root", &self.layout.repo_root())
            .field("namespace_dir", &self.layout.namespace_dir())
            .field("main_branch", &self.main_branch)
            .finish()
    }
}
