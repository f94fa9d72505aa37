//! Plan backups stored as parentless commits behind namespaced refs.
//!
//! A backup is a commit whose tree holds exactly one blob: the plan file at
//! its repo-relative path (e.g. `.handoff/tasks/foo.md`). The commit has no
//! parent and is reachable only through one ref:
//!
//! ```text
//! refs/plan-backups/<plan_id>     active
//! refs/plan-abandoned/<plan_id>   abandoned
//! ```
//!
//! Only the latest backup per plan and namespace is kept. Re-creating a
//! backup overwrites the ref, and the previous commit becomes garbage that
//! `git gc` reclaims on its usual schedule.
//!
//! Nothing here touches a working tree or the index.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::git::{GitError, TreeEntry, Vcs};
use crate::layout::{Layout, LayoutError};

/// Which family of refs a backup lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Active,
    Abandoned,
}

impl Namespace {
    /// Ref prefix including the trailing slash.
    pub fn ref_prefix(self) -> &'static str {
        match self {
            Self::Active => "refs/plan-backups/",
            Self::Abandoned => "refs/plan-abandoned/",
        }
    }

    pub fn ref_name(self, plan_id: &str) -> String {
        format!("{}{plan_id}", self.ref_prefix())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Abandoned => "abandoned",
        })
    }
}

impl FromStr for Namespace {
    type Err = NamespaceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(NamespaceParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Namespace`] string.
#[derive(Debug, Clone)]
pub struct NamespaceParseError(pub String);

impl fmt::Display for NamespaceParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid backup namespace: {:?} (expected active or abandoned)",
            self.0
        )
    }
}

impl std::error::Error for NamespaceParseError {}

/// Errors from backup operations.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("no {namespace} backup for plan {plan_id}")]
    NotFound { plan_id: String, namespace: Namespace },

    #[error("{} already exists (use --force to overwrite)", path.display())]
    AlreadyExists { path: PathBuf },

    /// The destination ref was written but the source could not be deleted:
    /// the backup now exists in both namespaces.
    #[error(
        "backup for plan {plan_id} was copied to {to} but could not be removed from {from}: {source}"
    )]
    Duplicated {
        plan_id: String,
        from: Namespace,
        to: Namespace,
        #[source]
        source: GitError,
    },

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Git(#[from] GitError),
}

/// One backup as reported by [`BackupStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub plan_id: String,
    pub commit: String,
    pub committed_at: DateTime<Utc>,
    /// Whether `<ns>/tasks/<plan_id>.md` currently exists on disk.
    pub plan_exists: bool,
}

/// Backup operations for one repository.
pub struct BackupStore<'a> {
    vcs: &'a dyn Vcs,
    layout: &'a Layout,
}

impl<'a> BackupStore<'a> {
    pub fn new(vcs: &'a dyn Vcs, layout: &'a Layout) -> Self {
        Self { vcs, layout }
    }

    /// Snapshot the current plan file into the active namespace.
    ///
    /// Returns the new commit id. Always writes a new commit, even when the
    /// content is unchanged, and force-updates the ref.
    pub fn create(&self, plan_id: &str) -> Result<String, BackupError> {
        let path = self.layout.plan_path(plan_id)?;
        let content = std::fs::read(&path).map_err(|e| BackupError::Io {
            path: path.clone(),
            source: e,
        })?;

        let repo_path = self.layout.plan_repo_path(plan_id)?;
        let blob = self.vcs.write_blob(&content)?;
        let tree = self.build_tree_chain(&repo_path, &blob)?;
        let commit = self
            .vcs
            .commit_tree(&tree, &format!("handoff: backup of plan {plan_id}"))?;

        let refname = Namespace::Active.ref_name(plan_id);
        self.vcs.update_ref(&refname, &commit)?;
        info!(plan_id, commit = %commit, "backed up plan");
        Ok(commit)
    }

    /// Wrap `blob` in one tree per path segment, innermost first.
    fn build_tree_chain(&self, repo_path: &str, blob: &str) -> Result<String, BackupError> {
        let mut segments: Vec<&str> = repo_path.split('/').collect();
        let file_name = segments.pop().unwrap_or(repo_path);

        let mut oid = self.vcs.make_tree(&[TreeEntry::blob(blob, file_name)])?;
        for dir in segments.into_iter().rev() {
            oid = self.vcs.make_tree(&[TreeEntry::tree(&oid, dir)])?;
        }
        Ok(oid)
    }

    /// Delete the active backup. `Ok(false)` if there was none.
    pub fn cleanup(&self, plan_id: &str) -> Result<bool, BackupError> {
        self.delete(plan_id, Namespace::Active)
    }

    fn delete(&self, plan_id: &str, namespace: Namespace) -> Result<bool, BackupError> {
        let refname = namespace.ref_name(plan_id);
        if self.vcs.resolve_ref(&refname)?.is_none() {
            return Ok(false);
        }
        self.vcs.delete_ref(&refname)?;
        info!(plan_id, %namespace, "deleted backup ref");
        Ok(true)
    }

    /// Commit id of the backup in `namespace`, if any.
    pub fn lookup(&self, plan_id: &str, namespace: Namespace) -> Result<Option<String>, BackupError> {
        self.layout.plan_path(plan_id)?;
        Ok(self.vcs.resolve_ref(&namespace.ref_name(plan_id))?)
    }

    /// All backups in `namespace`, sorted by plan id.
    pub fn list(&self, namespace: Namespace) -> Result<Vec<BackupEntry>, BackupError> {
        let prefix = namespace.ref_prefix();
        let mut entries = Vec::new();
        for r in self.vcs.for_each_ref(prefix)? {
            let Some(plan_id) = r.name.strip_prefix(prefix) else {
                continue;
            };
            let plan_exists = match self.layout.plan_path(plan_id) {
                Ok(path) => path.exists(),
                Err(_) => false,
            };
            entries.push(BackupEntry {
                plan_id: plan_id.to_string(),
                commit: r.oid,
                committed_at: r.committed_at,
                plan_exists,
            });
        }
        entries.sort_by(|a, b| a.plan_id.cmp(&b.plan_id));
        Ok(entries)
    }

    /// Write the backed-up content back to the plan path.
    ///
    /// Reads the blob straight out of the backup commit; no checkout.
    pub fn recover(
        &self,
        plan_id: &str,
        namespace: Namespace,
        force: bool,
    ) -> Result<PathBuf, BackupError> {
        let commit = self
            .lookup(plan_id, namespace)?
            .ok_or_else(|| BackupError::NotFound {
                plan_id: plan_id.to_string(),
                namespace,
            })?;

        let path = self.layout.plan_path(plan_id)?;
        if path.exists() && !force {
            return Err(BackupError::AlreadyExists { path });
        }

        let repo_path = self.layout.plan_repo_path(plan_id)?;
        let content = self.vcs.read_blob(&commit, &repo_path)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BackupError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(&path, content).map_err(|e| BackupError::Io {
            path: path.clone(),
            source: e,
        })?;

        info!(plan_id, %namespace, commit = %commit, "recovered plan from backup");
        Ok(path)
    }

    /// Move the backup pointer from one namespace to another.
    ///
    /// Writes the destination before deleting the source, so a failure in
    /// between leaves the backup in both namespaces rather than in neither.
    pub fn move_namespace(
        &self,
        plan_id: &str,
        from: Namespace,
        to: Namespace,
    ) -> Result<String, BackupError> {
        let commit = self
            .lookup(plan_id, from)?
            .ok_or_else(|| BackupError::NotFound {
                plan_id: plan_id.to_string(),
                namespace: from,
            })?;
        if from == to {
            return Ok(commit);
        }

        self.vcs.update_ref(&to.ref_name(plan_id), &commit)?;
        if let Err(source) = self.vcs.delete_ref(&from.ref_name(plan_id)) {
            warn!(plan_id, %from, %to, error = %source, "backup duplicated across namespaces");
            return Err(BackupError::Duplicated {
                plan_id: plan_id.to_string(),
                from,
                to,
                source,
            });
        }

        info!(plan_id, %from, %to, commit = %commit, "moved backup");
        Ok(commit)
    }

    /// Delete backups in `namespace` older than `cutoff` whose plan file is
    /// gone from disk. Returns the pruned plan ids.
    pub fn prune(
        &self,
        namespace: Namespace,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, BackupError> {
        let mut pruned = Vec::new();
        for entry in self.list(namespace)? {
            if entry.plan_exists || entry.committed_at >= cutoff {
                continue;
            }
            if self.delete(&entry.plan_id, namespace)? {
                pruned.push(entry.plan_id);
            }
        }
        Ok(pruned)
    }
}
