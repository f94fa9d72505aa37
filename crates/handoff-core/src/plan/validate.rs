//! Plan document validation against the owning repository.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::document::PlanDocument;
use super::metadata::PlanMetadata;
use crate::git::{GitError, Vcs};

/// A malformed or inconsistent plan document.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("plan must start with a '---' header line")]
    MissingOpeningDelimiter,

    #[error("plan header is not closed by a '---' line")]
    MissingClosingDelimiter,

    #[error("invalid YAML in plan header: {0}")]
    Yaml(#[source] serde_yaml::Error),

    #[error("plan header must be a YAML mapping")]
    NotAMapping,

    #[error("plan header keys must be strings (found {0})")]
    NonStringKey(String),

    #[error("plan header keys do not match: missing [{}], unexpected [{}]", missing.join(", "), unexpected.join(", "))]
    KeySet {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("plan body is empty")]
    EmptyBody,

    #[error("plan {} is outside repository {}", path.display(), root.display())]
    OutsideRepo { path: PathBuf, root: PathBuf },

    #[error("invalid git_sha: {sha} is not a commit in this repository")]
    UnknownCommit { sha: String },

    #[error("duplicate plan_id {plan_id:?}: also used by {}", other.display())]
    DuplicatePlanId { plan_id: String, other: PathBuf },

    #[error(transparent)]
    Git(#[from] GitError),
}

impl ValidationError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Validates plan documents for one repository.
pub struct PlanValidator<'a> {
    vcs: &'a dyn Vcs,
}

impl<'a> PlanValidator<'a> {
    pub fn new(vcs: &'a dyn Vcs) -> Self {
        Self { vcs }
    }

    /// Parse and validate the plan at `path`.
    ///
    /// Checks, in order: the file lives inside the repository, the header
    /// splits and parses, the key set and field shapes, the referenced
    /// commit exists, and no sibling plan claims the same `plan_id`.
    pub fn validate(&self, path: &Path) -> Result<PlanMetadata, ValidationError> {
        let canonical = path.canonicalize().map_err(|e| ValidationError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let root = self.vcs.repo_root();
        if !canonical.starts_with(root) {
            return Err(ValidationError::OutsideRepo {
                path: canonical,
                root: root.to_path_buf(),
            });
        }

        let doc = PlanDocument::read(&canonical)?;
        let metadata = PlanMetadata::from_header(doc.header(), doc.body(), &canonical)?;

        if !metadata.has_placeholder_sha() {
            match self.vcs.object_type(&metadata.git_sha)?.as_deref() {
                Some("commit") => {}
                _ => {
                    return Err(ValidationError::UnknownCommit {
                        sha: metadata.git_sha.clone(),
                    });
                }
            }
        }

        if let Some(other) = find_duplicate(&canonical, &metadata.plan_id)? {
            return Err(ValidationError::DuplicatePlanId {
                plan_id: metadata.plan_id,
                other,
            });
        }

        debug!(plan_id = %metadata.plan_id, status = %metadata.status, "plan validated");
        Ok(metadata)
    }
}

/// Look for another `*.md` next to `path` declaring the same `plan_id`.
///
/// Siblings that fail to read or parse are skipped.
fn find_duplicate(path: &Path, plan_id: &str) -> Result<Option<PathBuf>, ValidationError> {
    let Some(dir) = path.parent() else {
        return Ok(None);
    };
    let entries = std::fs::read_dir(dir).map_err(|e| ValidationError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut siblings: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
        .filter(|p| p.as_path() != path)
        .collect();
    siblings.sort();

    for sibling in siblings {
        let Ok(doc) = PlanDocument::read(&sibling) else {
            debug!(path = %sibling.display(), "skipping unparseable sibling plan");
            continue;
        };
        if doc.plan_id() == Some(plan_id) {
            return Ok(Some(sibling));
        }
    }
    Ok(None)
}
