//! Plan documents: YAML-headed markdown files describing one unit of work.

pub mod document;
pub mod metadata;
pub mod validate;

pub use document::{DELIMITER, PlanDocument, scaffold_plan};
pub use metadata::{
    OPTIONAL_KEYS, PLACEHOLDER_SHA, PlanMetadata, PlanStatus, PlanStatusParseError, REQUIRED_KEYS,
    is_full_sha, is_valid_plan_id,
};
pub use validate::{PlanValidator, ValidationError};
