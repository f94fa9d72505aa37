//! Typed plan metadata and the header key allow-list.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use super::validate::ValidationError;

/// Keys every plan header must carry.
pub const REQUIRED_KEYS: &[&str] = &["plan_id", "git_sha", "status", "evaluation_notes"];

/// Keys a plan header may carry in addition to [`REQUIRED_KEYS`].
pub const OPTIONAL_KEYS: &[&str] = &["issue_id", "author", "created_at", "notes"];

/// `git_sha` value used before a plan is pinned to a commit.
pub const PLACEHOLDER_SHA: &str = "0000000000000000000000000000000000000000";

static PLAN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]{3,100}$").expect("plan id regex"));

static SHA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{40}$").expect("sha regex"));

/// Status of a plan.
///
/// ```text
/// draft -> ready -> coding -> implemented | done
///   \________\________\_____> abandoned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Ready,
    Coding,
    Implemented,
    Done,
    Abandoned,
}

impl PlanStatus {
    /// No further lifecycle transitions are allowed from a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Implemented | Self::Done | Self::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::Coding => "coding",
            Self::Implemented => "implemented",
            Self::Done => "done",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = PlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "ready" => Ok(Self::Ready),
            "coding" => Ok(Self::Coding),
            "implemented" => Ok(Self::Implemented),
            "done" => Ok(Self::Done),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(PlanStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanStatus`] string.
#[derive(Debug, Clone)]
pub struct PlanStatusParseError(pub String);

impl fmt::Display for PlanStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid plan status: {:?} (expected draft, ready, coding, implemented, done, or abandoned)",
            self.0
        )
    }
}

impl std::error::Error for PlanStatusParseError {}

/// A validated plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanMetadata {
    /// Path the plan was read from.
    pub path: PathBuf,
    pub plan_id: String,
    pub git_sha: String,
    pub status: PlanStatus,
    pub evaluation_notes: Vec<String>,
    pub issue_id: Option<String>,
    pub author: Option<String>,
    pub created_at: Option<String>,
    pub notes: Option<String>,
    /// Free-text body following the header, verbatim.
    pub body: String,
}

impl PlanMetadata {
    pub fn has_placeholder_sha(&self) -> bool {
        self.git_sha == PLACEHOLDER_SHA
    }

    /// Build metadata from a parsed header, checking keys and field shapes.
    ///
    /// Repository-dependent checks (commit existence, sibling uniqueness,
    /// containment) are left to [`super::PlanValidator`].
    pub fn from_header(
        header: &Mapping,
        body: &str,
        path: impl Into<PathBuf>,
    ) -> Result<Self, ValidationError> {
        check_keys(header)?;

        let plan_id = required_string(header, "plan_id")?;
        if !PLAN_ID_RE.is_match(&plan_id) {
            return Err(ValidationError::invalid(
                "plan_id",
                format!("{plan_id:?} must match [A-Za-z0-9._-]{{3,100}}"),
            ));
        }

        let git_sha = required_string(header, "git_sha")?;
        if !SHA_RE.is_match(&git_sha) {
            return Err(ValidationError::invalid(
                "git_sha",
                format!("{git_sha:?} must be 40 lowercase hex characters"),
            ));
        }

        let status_raw = required_string(header, "status")?;
        let status: PlanStatus = status_raw
            .parse()
            .map_err(|e: PlanStatusParseError| ValidationError::invalid("status", e.to_string()))?;

        if git_sha == PLACEHOLDER_SHA && status != PlanStatus::Draft {
            return Err(ValidationError::invalid(
                "git_sha",
                format!("placeholder sha is only allowed while status is draft (status is {status})"),
            ));
        }

        let evaluation_notes = string_list(header, "evaluation_notes")?;

        if body.trim().is_empty() {
            return Err(ValidationError::EmptyBody);
        }

        Ok(Self {
            path: path.into(),
            plan_id,
            git_sha,
            status,
            evaluation_notes,
            issue_id: optional_scalar(header, "issue_id")?,
            author: optional_scalar(header, "author")?,
            created_at: optional_scalar(header, "created_at")?,
            notes: optional_scalar(header, "notes")?,
            body: body.to_string(),
        })
    }
}

fn check_keys(header: &Mapping) -> Result<(), ValidationError> {
    let mut present = Vec::new();
    for key in header.keys() {
        match key {
            Value::String(k) => present.push(k.as_str()),
            other => {
                return Err(ValidationError::NonStringKey(format!("{other:?}")));
            }
        }
    }

    let missing: Vec<String> = REQUIRED_KEYS
        .iter()
        .filter(|k| !present.contains(k))
        .map(|k| k.to_string())
        .collect();
    let unexpected: Vec<String> = present
        .iter()
        .filter(|k| !REQUIRED_KEYS.contains(k) && !OPTIONAL_KEYS.contains(k))
        .map(|k| k.to_string())
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        return Ok(());
    }
    Err(ValidationError::KeySet {
        missing,
        unexpected,
    })
}

fn required_string(header: &Mapping, key: &str) -> Result<String, ValidationError> {
    match header.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            Err(ValidationError::invalid(key, "must not be empty"))
        }
        Some(Value::Number(_)) | Some(Value::Bool(_)) => Err(ValidationError::invalid(
            key,
            "is ambiguous: YAML reads it as a number or boolean, quote it",
        )),
        Some(_) => Err(ValidationError::invalid(key, "must be a string")),
    }
}

fn optional_scalar(header: &Mapping, key: &str) -> Result<Option<String>, ValidationError> {
    match header.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(ValidationError::invalid(key, "must be a scalar value")),
    }
}

fn string_list(header: &Mapping, key: &str) -> Result<Vec<String>, ValidationError> {
    match header.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
                _ => Err(ValidationError::invalid(
                    key,
                    format!("entry {i} must be a non-empty string"),
                )),
            })
            .collect(),
        Some(_) => Err(ValidationError::invalid(key, "must be a list of strings")),
    }
}

/// Whether `plan_id` has the allowed shape.
pub fn is_valid_plan_id(plan_id: &str) -> bool {
    PLAN_ID_RE.is_match(plan_id)
}

/// Whether `sha` is a full lowercase hex object id.
pub fn is_full_sha(sha: &str) -> bool {
    SHA_RE.is_match(sha)
}
