//! Splitting, editing and rendering plan documents.
//!
//! A plan is a markdown file whose first line is `---`, followed by a YAML
//! mapping, a closing `---` line, and a free-text body:
//!
//! ```text
//! ---
//! plan_id: add-auth
//! git_sha: '0123…'
//! status: ready
//! evaluation_notes: []
//! ---
//!
//! # Add authentication
//! ...
//! ```

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_yaml::{Mapping, Value};

use super::metadata::{PLACEHOLDER_SHA, PlanStatus};
use super::validate::ValidationError;

/// Header delimiter line.
pub const DELIMITER: &str = "---";

/// A plan document split into its YAML header and verbatim body.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDocument {
    header: Mapping,
    body: String,
}

impl PlanDocument {
    /// Split `text` into header and body and parse the header.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let (header_text, body) = split(text)?;
        let value: Value = serde_yaml::from_str(header_text).map_err(ValidationError::Yaml)?;
        let header = match value {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            _ => return Err(ValidationError::NotAMapping),
        };
        Ok(Self {
            header,
            body: body.to_string(),
        })
    }

    /// Read and parse the document at `path`.
    pub fn read(path: &Path) -> Result<Self, ValidationError> {
        let text = std::fs::read_to_string(path).map_err(|e| ValidationError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&text)
    }

    pub fn header(&self) -> &Mapping {
        &self.header
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// `plan_id` as written, if it is a string.
    pub fn plan_id(&self) -> Option<&str> {
        self.header.get("plan_id").and_then(Value::as_str)
    }

    pub fn set_status(&mut self, status: PlanStatus) {
        self.set("status", Value::String(status.to_string()));
    }

    pub fn set_git_sha(&mut self, sha: &str) {
        self.set("git_sha", Value::String(sha.to_string()));
    }

    /// Overwrite a header value in place, keeping key order.
    fn set(&mut self, key: &str, value: Value) {
        self.header.insert(Value::String(key.to_string()), value);
    }

    /// Serialize back to text. The body is emitted byte-for-byte.
    pub fn render(&self) -> Result<String, ValidationError> {
        let yaml = serde_yaml::to_string(&self.header).map_err(ValidationError::Yaml)?;
        Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n{}", self.body))
    }

    /// Render and write to `path`.
    pub fn write(&self, path: &Path) -> Result<(), ValidationError> {
        let text = self.render()?;
        std::fs::write(path, text).map_err(|e| ValidationError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Split into `(header, body)`; the body starts right after the closing
/// delimiter line.
fn split(text: &str) -> Result<(&str, &str), ValidationError> {
    let mut lines = text.split_inclusive('\n');
    let first = lines.next().ok_or(ValidationError::MissingOpeningDelimiter)?;
    if strip_eol(first) != DELIMITER {
        return Err(ValidationError::MissingOpeningDelimiter);
    }

    let header_start = first.len();
    let mut offset = header_start;
    for line in lines {
        if strip_eol(line) == DELIMITER {
            let header = &text[header_start..offset];
            let body = &text[offset + line.len()..];
            return Ok((header, body));
        }
        offset += line.len();
    }
    Err(ValidationError::MissingClosingDelimiter)
}

fn strip_eol(line: &str) -> &str {
    line.trim_end_matches('\n').trim_end_matches('\r')
}

/// Text of a fresh draft plan.
///
/// `git_sha` defaults to the placeholder when `None`.
pub fn scaffold_plan(
    plan_id: &str,
    git_sha: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<String, ValidationError> {
    let mut header = Mapping::new();
    let mut put = |k: &str, v: Value| {
        header.insert(Value::String(k.to_string()), v);
    };
    put("plan_id", Value::String(plan_id.to_string()));
    put(
        "git_sha",
        Value::String(git_sha.unwrap_or(PLACEHOLDER_SHA).to_string()),
    );
    put("status", Value::String(PlanStatus::Draft.to_string()));
    put("evaluation_notes", Value::Sequence(Vec::new()));
    put(
        "created_at",
        Value::String(created_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );

    let doc = PlanDocument {
        header,
        body: format!("\n# {plan_id}\n\nDescribe the work to hand off.\n"),
    };
    doc.render()
}
