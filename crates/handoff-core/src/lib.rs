//! Core of `handoff`: plan documents, plan workspaces (git worktrees),
//! git-backed plan backups, and the lifecycle workflows that keep the three
//! consistent.

pub mod backup;
pub mod context;
pub mod git;
pub mod layout;
pub mod lifecycle;
pub mod plan;
pub mod worktree;

pub use context::RepoContext;
