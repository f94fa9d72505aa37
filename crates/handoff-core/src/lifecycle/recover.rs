//! Restore a plan file from its backup.

use std::path::PathBuf;

use tracing::info;

use super::LifecycleError;
use crate::backup::{BackupError, Namespace};
use crate::context::RepoContext;

/// Result of [`recover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverOutcome {
    pub path: PathBuf,
    /// Namespace the content was read from.
    pub namespace: Namespace,
    /// Whether the backup pointer was moved back to the active namespace.
    pub reactivated: bool,
}

/// Write the backed-up plan back to `<ns>/tasks/<plan_id>.md`.
///
/// With `from_abandoned` only the abandoned namespace is consulted;
/// otherwise the active one is tried first and the abandoned one only when
/// the active one has nothing. Recovering from the abandoned namespace moves
/// the pointer back to active.
pub fn recover(
    ctx: &RepoContext,
    plan_id: &str,
    from_abandoned: bool,
    force: bool,
) -> Result<RecoverOutcome, LifecycleError> {
    let backups = ctx.backups();

    let namespace = if from_abandoned {
        Namespace::Abandoned
    } else if backups.lookup(plan_id, Namespace::Active)?.is_some() {
        Namespace::Active
    } else if backups.lookup(plan_id, Namespace::Abandoned)?.is_some() {
        Namespace::Abandoned
    } else {
        return Err(BackupError::NotFound {
            plan_id: plan_id.to_string(),
            namespace: Namespace::Active,
        }
        .into());
    };

    let path = backups.recover(plan_id, namespace, force)?;

    let reactivated = namespace == Namespace::Abandoned;
    if reactivated {
        backups.move_namespace(plan_id, Namespace::Abandoned, Namespace::Active)?;
    }

    info!(plan_id, %namespace, reactivated, path = %path.display(), "plan recovered");
    Ok(RecoverOutcome {
        path,
        namespace,
        reactivated,
    })
}
