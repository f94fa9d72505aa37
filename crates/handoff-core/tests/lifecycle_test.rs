//! End-to-end tests for the start, abandon, recover and finalize workflows
//! against real temporary git repositories.

use std::path::{Path, PathBuf};

use handoff_core::RepoContext;
use handoff_core::backup::{BackupError, Namespace};
use handoff_core::git::Vcs;
use handoff_core::layout::DEFAULT_NAMESPACE_DIR;
use handoff_core::lifecycle::{
    self, AbandonOutcome, LifecycleError, StepStatus, abandon, detect_artifacts, finalize, pin,
    recover, start,
};
use handoff_core::plan::{PLACEHOLDER_SHA, PlanMetadata, PlanStatus};
use handoff_core::worktree::WorkspaceError;
use handoff_test_utils::{FaultyVcs, TestRepo, git_in, plan_text};

// ===========================================================================
// Helpers
// ===========================================================================

fn context(repo: &TestRepo) -> RepoContext {
    RepoContext::new(Box::new(repo.vcs()), DEFAULT_NAMESPACE_DIR, "main")
}

fn faulty_context(repo: &TestRepo, failing: &[&'static str]) -> RepoContext {
    let vcs = FaultyVcs::new(repo.vcs());
    for op in failing {
        vcs.fail(op);
    }
    RepoContext::new(Box::new(vcs), DEFAULT_NAMESPACE_DIR, "main")
}

fn plan_status(ctx: &RepoContext, plan_id: &str) -> PlanStatus {
    let path = ctx.layout().plan_path(plan_id).unwrap();
    ctx.validator().validate(&path).unwrap().status
}

fn branch_exists(repo: &TestRepo, branch: &str) -> bool {
    repo.vcs()
        .resolve_ref(&format!("refs/heads/{branch}"))
        .unwrap()
        .is_some()
}

/// Commits everything in the workspace and merges the plan branch into main.
fn commit_and_merge(root: PathBuf) -> impl Fn(&PlanMetadata, &Path, &str) -> anyhow::Result<()> {
    move |plan: &PlanMetadata, workspace: &Path, main: &str| {
        git_in(workspace, &["add", "-A"]);
        git_in(workspace, &["commit", "--quiet", "-m", "implement plan"]);
        git_in(&root, &["checkout", "--quiet", main]);
        git_in(
            &root,
            &["merge", "--no-ff", "--quiet", "-m", "merge plan", &plan.plan_id],
        );
        Ok(())
    }
}

/// Commits in the workspace but never merges.
fn commit_only(_plan: &PlanMetadata, workspace: &Path, _main: &str) -> anyhow::Result<()> {
    git_in(workspace, &["add", "-A"]);
    git_in(workspace, &["commit", "--quiet", "-m", "unmerged work"]);
    Ok(())
}

fn started(repo: &TestRepo, plan_id: &str) -> (RepoContext, PathBuf) {
    repo.write_plan(DEFAULT_NAMESPACE_DIR, plan_id, &repo.head(), "ready");
    let ctx = context(repo);
    let outcome = start(&ctx, plan_id).unwrap();
    (ctx, outcome.workspace)
}

// ===========================================================================
// start
// ===========================================================================

#[test]
fn start_provisions_workspace_and_promotes_plan() {
    let repo = TestRepo::new();
    let head = repo.head();
    repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", &head, "ready");
    let ctx = context(&repo);

    let outcome = start(&ctx, "foo").unwrap();

    assert!(outcome.promoted);
    assert_eq!(outcome.status, PlanStatus::Coding);
    assert_eq!(
        outcome.workspace,
        repo.path().join(".handoff/worktrees/foo")
    );
    assert!(outcome.workspace.is_dir());
    assert_eq!(repo.git(&["rev-parse", "refs/heads/foo"]), head);
    assert_eq!(plan_status(&ctx, "foo"), PlanStatus::Coding);
    assert_eq!(
        ctx.backups().lookup("foo", Namespace::Active).unwrap(),
        Some(outcome.backup)
    );
}

#[test]
fn start_twice_reuses_workspace() {
    let repo = TestRepo::new();
    let (ctx, first) = started(&repo, "foo");
    let worktrees_before = repo.git(&["worktree", "list", "--porcelain"]);

    let again = start(&ctx, "foo").unwrap();

    assert_eq!(again.workspace, first);
    assert!(!again.promoted);
    assert_eq!(repo.git(&["worktree", "list", "--porcelain"]), worktrees_before);
}

#[test]
fn start_rejects_terminal_plan() {
    let repo = TestRepo::new();
    repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", &repo.head(), "implemented");
    let ctx = context(&repo);

    let err = start(&ctx, "foo").unwrap_err();
    assert!(
        matches!(err, LifecycleError::TerminalStatus { status: PlanStatus::Implemented, .. }),
        "{err}"
    );
    assert!(!branch_exists(&repo, "foo"));
}

#[test]
fn start_rejects_unpinned_draft() {
    let repo = TestRepo::new();
    repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", PLACEHOLDER_SHA, "draft");
    let ctx = context(&repo);

    let err = start(&ctx, "foo").unwrap_err();
    assert!(
        matches!(err, LifecycleError::Workspace(WorkspaceError::PlaceholderSha { .. })),
        "{err}"
    );
    assert_eq!(plan_status(&ctx, "foo"), PlanStatus::Draft);
}

#[test]
fn start_rejects_plan_filed_under_other_id() {
    let repo = TestRepo::new();
    let ctx = context(&repo);
    let path = ctx.layout().plan_path("foo").unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, plan_text("bar", &repo.head(), "ready")).unwrap();

    let err = start(&ctx, "foo").unwrap_err();
    assert!(matches!(err, LifecycleError::PlanIdMismatch { .. }), "{err}");
}

// ===========================================================================
// abandon
// ===========================================================================

#[test]
fn abandon_without_artifacts_does_nothing() {
    let repo = TestRepo::new();
    let ctx = context(&repo);
    let refs_before = repo.git(&["for-each-ref"]);

    assert!(detect_artifacts(&ctx, "ghost").unwrap().is_empty());
    let outcome = abandon(&ctx, "ghost", Some("never existed")).unwrap();

    assert_eq!(outcome, AbandonOutcome::NothingToDo);
    assert!(outcome.succeeded());
    assert_eq!(repo.git(&["for-each-ref"]), refs_before);
    assert!(!ctx.layout().abandon_log_path().exists());
}

#[test]
fn abandon_moves_backup_and_removes_everything_else() {
    let repo = TestRepo::new();
    let (ctx, workspace) = started(&repo, "foo");
    let backup = ctx
        .backups()
        .lookup("foo", Namespace::Active)
        .unwrap()
        .unwrap();

    let artifacts = detect_artifacts(&ctx, "foo").unwrap();
    assert!(artifacts.workspace && artifacts.branch && artifacts.plan_file && artifacts.backup);

    let outcome = abandon(&ctx, "foo", Some("scope changed\nsee issue")).unwrap();
    assert!(outcome.succeeded(), "{outcome:?}");

    assert_eq!(ctx.backups().lookup("foo", Namespace::Active).unwrap(), None);
    assert_eq!(
        ctx.backups().lookup("foo", Namespace::Abandoned).unwrap(),
        Some(backup)
    );
    assert!(!ctx.layout().plan_path("foo").unwrap().exists());
    assert!(!workspace.exists());
    assert!(!branch_exists(&repo, "foo"));

    let log = std::fs::read_to_string(ctx.layout().abandon_log_path()).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(log.starts_with('['), "{log}");
    assert!(log.ends_with(" UTC] foo: scope changed see issue\n"), "{log}");
}

#[test]
fn abandon_snapshots_plan_without_backup() {
    let repo = TestRepo::new();
    let path = repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", &repo.head(), "draft");
    let original = std::fs::read(&path).unwrap();
    let ctx = context(&repo);

    let outcome = abandon(&ctx, "foo", None).unwrap();
    assert!(outcome.succeeded());
    assert!(!path.exists());

    let recovered = recover(&ctx, "foo", true, false).unwrap();
    assert_eq!(std::fs::read(recovered.path).unwrap(), original);
}

#[test]
fn abandon_continues_past_failed_step_and_resumes() {
    let repo = TestRepo::new();
    let (_, workspace) = started(&repo, "foo");

    let faulty = faulty_context(&repo, &["delete_branch"]);
    let outcome = abandon(&faulty, "foo", None).unwrap();
    assert!(!outcome.succeeded());
    let AbandonOutcome::Completed { steps, .. } = outcome else {
        panic!("expected completed outcome");
    };
    let statuses: Vec<_> = steps.iter().map(|s| (s.name, s.failed())).collect();
    assert_eq!(
        statuses,
        vec![
            ("remove workspace", false),
            ("delete branch", true),
            ("delete plan file", false),
            ("move backup to abandoned", false),
        ]
    );
    assert!(!workspace.exists());
    assert!(branch_exists(&repo, "foo"));

    let ctx = context(&repo);
    let artifacts = detect_artifacts(&ctx, "foo").unwrap();
    assert!(artifacts.branch && !artifacts.workspace && !artifacts.plan_file && !artifacts.backup);

    let AbandonOutcome::Completed { steps, .. } = abandon(&ctx, "foo", None).unwrap() else {
        panic!("expected completed outcome");
    };
    assert_eq!(steps[0].status, StepStatus::Skipped);
    assert_eq!(steps[1].status, StepStatus::Done);
    assert_eq!(steps[3].status, StepStatus::Skipped);
    assert!(!branch_exists(&repo, "foo"));
}

#[test]
fn abandon_never_loses_backup_when_source_delete_fails() {
    let repo = TestRepo::new();
    let (ctx, _) = started(&repo, "foo");
    let backup = ctx.backups().lookup("foo", Namespace::Active).unwrap();

    let faulty = faulty_context(&repo, &["delete_ref"]);
    let outcome = abandon(&faulty, "foo", None).unwrap();
    assert!(!outcome.succeeded());

    assert_eq!(ctx.backups().lookup("foo", Namespace::Active).unwrap(), backup);
    assert_eq!(ctx.backups().lookup("foo", Namespace::Abandoned).unwrap(), backup);
}

#[test]
fn abandon_aborts_before_deleting_when_snapshot_fails() {
    let repo = TestRepo::new();
    let path = repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", &repo.head(), "draft");

    let faulty = faulty_context(&repo, &["write_blob"]);
    let err = abandon(&faulty, "foo", None).unwrap_err();
    assert!(matches!(err, LifecycleError::Backup(BackupError::Git(_))), "{err}");
    assert!(path.exists());
}

// ===========================================================================
// recover
// ===========================================================================

#[test]
fn recover_prefers_active_namespace() {
    let repo = TestRepo::new();
    let path = repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", &repo.head(), "ready");
    let ctx = context(&repo);
    ctx.backups().create("foo").unwrap();
    std::fs::remove_file(&path).unwrap();

    let outcome = recover(&ctx, "foo", false, false).unwrap();
    assert_eq!(outcome.namespace, Namespace::Active);
    assert!(!outcome.reactivated);
    assert!(path.exists());
}

#[test]
fn recover_falls_back_to_abandoned_and_reactivates() {
    let repo = TestRepo::new();
    let (ctx, _) = started(&repo, "foo");
    let backup = ctx.backups().lookup("foo", Namespace::Active).unwrap();
    abandon(&ctx, "foo", None).unwrap();

    let outcome = recover(&ctx, "foo", false, false).unwrap();
    assert_eq!(outcome.namespace, Namespace::Abandoned);
    assert!(outcome.reactivated);
    assert_eq!(plan_status(&ctx, "foo"), PlanStatus::Coding);
    assert_eq!(ctx.backups().lookup("foo", Namespace::Active).unwrap(), backup);
    assert_eq!(ctx.backups().lookup("foo", Namespace::Abandoned).unwrap(), None);
}

#[test]
fn recover_without_backup_is_not_found() {
    let repo = TestRepo::new();
    let ctx = context(&repo);

    let err = recover(&ctx, "foo", false, false).unwrap_err();
    assert!(
        matches!(err, LifecycleError::Backup(BackupError::NotFound { .. })),
        "{err}"
    );
}

#[test]
fn recover_keeps_existing_file_without_force() {
    let repo = TestRepo::new();
    let path = repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", &repo.head(), "ready");
    let ctx = context(&repo);
    ctx.backups().create("foo").unwrap();
    std::fs::write(&path, "edited").unwrap();

    let err = recover(&ctx, "foo", false, false).unwrap_err();
    assert!(
        matches!(err, LifecycleError::Backup(BackupError::AlreadyExists { .. })),
        "{err}"
    );
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "edited");
}

// ===========================================================================
// finalize
// ===========================================================================

#[test]
fn finalize_merges_and_reclaims_everything() {
    let repo = TestRepo::new();
    let (ctx, workspace) = started(&repo, "foo");
    std::fs::write(workspace.join("feature.txt"), "done\n").unwrap();

    let integrator = commit_and_merge(repo.path().to_path_buf());
    let outcome = finalize(&ctx, "foo", &integrator).unwrap();

    assert!(!outcome.resumed);
    assert!(outcome.workspace_removed);
    assert!(outcome.backup_removed);
    assert!(outcome.warnings.is_empty());
    assert!(!workspace.exists());
    assert!(!branch_exists(&repo, "foo"));
    assert_eq!(plan_status(&ctx, "foo"), PlanStatus::Implemented);
    assert_eq!(ctx.backups().lookup("foo", Namespace::Active).unwrap(), None);
    assert_eq!(
        repo.git(&["show", "main:feature.txt"]),
        "done",
    );
    assert!(
        ctx.vcs()
            .is_ancestor(
                outcome.merged_tip.as_deref().unwrap(),
                &repo.git(&["rev-parse", "main"])
            )
            .unwrap()
    );
}

#[test]
fn finalize_refuses_unmerged_branch_and_leaves_state() {
    let repo = TestRepo::new();
    let (ctx, workspace) = started(&repo, "foo");
    std::fs::write(workspace.join("feature.txt"), "wip\n").unwrap();

    let err = finalize(&ctx, "foo", &commit_only).unwrap_err();

    assert!(matches!(err, LifecycleError::NotMerged { .. }), "{err}");
    assert!(workspace.exists());
    assert!(branch_exists(&repo, "foo"));
    assert_eq!(plan_status(&ctx, "foo"), PlanStatus::Coding);
    assert!(ctx.backups().lookup("foo", Namespace::Active).unwrap().is_some());
}

#[test]
fn finalize_requires_uncommitted_changes() {
    let repo = TestRepo::new();
    let (ctx, workspace) = started(&repo, "foo");

    let err = finalize(&ctx, "foo", &commit_only).unwrap_err();
    assert!(matches!(err, LifecycleError::NothingToFinalize { .. }), "{err}");
    assert!(workspace.exists());
}

#[test]
fn finalize_requires_workspace() {
    let repo = TestRepo::new();
    repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", &repo.head(), "coding");
    let ctx = context(&repo);

    let err = finalize(&ctx, "foo", &commit_only).unwrap_err();
    assert!(matches!(err, LifecycleError::NoWorkspace { .. }), "{err}");
}

#[test]
fn finalize_reports_integration_failure() {
    let repo = TestRepo::new();
    let (ctx, workspace) = started(&repo, "foo");
    std::fs::write(workspace.join("feature.txt"), "wip\n").unwrap();

    let failing = |_: &PlanMetadata, _: &Path, _: &str| -> anyhow::Result<()> {
        anyhow::bail!("merge conflict in feature.txt")
    };
    let err = finalize(&ctx, "foo", &failing).unwrap_err();

    match err {
        LifecycleError::Integration { plan_id, message } => {
            assert_eq!(plan_id, "foo");
            assert!(message.contains("merge conflict"));
        }
        other => panic!("expected Integration, got {other}"),
    }
    assert!(workspace.join("feature.txt").exists());
}

#[test]
fn finalize_treats_backup_cleanup_failure_as_warning() {
    let repo = TestRepo::new();
    let (_, workspace) = started(&repo, "foo");
    std::fs::write(workspace.join("feature.txt"), "done\n").unwrap();

    let faulty = faulty_context(&repo, &["delete_ref"]);
    let integrator = commit_and_merge(repo.path().to_path_buf());
    let outcome = finalize(&faulty, "foo", &integrator).unwrap();

    assert!(!outcome.backup_removed);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(!branch_exists(&repo, "foo"));
    assert!(
        context(&repo)
            .backups()
            .lookup("foo", Namespace::Active)
            .unwrap()
            .is_some()
    );
}

#[test]
fn finalize_resumes_after_branch_delete_failure() {
    let repo = TestRepo::new();
    let (_, workspace) = started(&repo, "foo");
    std::fs::write(workspace.join("feature.txt"), "done\n").unwrap();

    let faulty = faulty_context(&repo, &["delete_branch"]);
    let integrator = commit_and_merge(repo.path().to_path_buf());
    let err = finalize(&faulty, "foo", &integrator).unwrap_err();
    assert!(matches!(err, LifecycleError::Git(_)), "{err}");
    assert!(!workspace.exists());
    assert!(branch_exists(&repo, "foo"));

    let ctx = context(&repo);
    assert_eq!(plan_status(&ctx, "foo"), PlanStatus::Implemented);
    let never_called = |_: &PlanMetadata, _: &Path, _: &str| -> anyhow::Result<()> {
        anyhow::bail!("integration must not run again")
    };
    let outcome = finalize(&ctx, "foo", &never_called).unwrap();

    assert!(outcome.resumed);
    assert!(!outcome.workspace_removed);
    assert!(outcome.merged_tip.is_some());
    assert!(outcome.backup_removed);
    assert!(!branch_exists(&repo, "foo"));
    assert_eq!(ctx.backups().lookup("foo", Namespace::Active).unwrap(), None);

    // Nothing left: a third run is a no-op.
    let outcome = finalize(&ctx, "foo", &never_called).unwrap();
    assert!(outcome.resumed);
    assert_eq!(outcome.merged_tip, None);
    assert!(!outcome.backup_removed);
}

#[test]
fn finalize_resumes_with_clean_merged_workspace() {
    let repo = TestRepo::new();
    let (_, workspace) = started(&repo, "foo");
    std::fs::write(workspace.join("feature.txt"), "done\n").unwrap();

    let faulty = faulty_context(&repo, &["remove_worktree"]);
    let integrator = commit_and_merge(repo.path().to_path_buf());
    assert!(finalize(&faulty, "foo", &integrator).is_err());
    assert!(workspace.exists());

    let ctx = context(&repo);
    let outcome = finalize(&ctx, "foo", &commit_only).unwrap();
    assert!(outcome.resumed);
    assert!(outcome.workspace_removed);
    assert!(!workspace.exists());
    assert!(!branch_exists(&repo, "foo"));
    assert_eq!(plan_status(&ctx, "foo"), PlanStatus::Implemented);
}

#[test]
fn finalize_resumes_from_merged_branch_before_status_update() {
    let repo = TestRepo::new();
    let (ctx, workspace) = started(&repo, "foo");
    std::fs::write(workspace.join("feature.txt"), "done\n").unwrap();
    git_in(&workspace, &["add", "-A"]);
    git_in(&workspace, &["commit", "--quiet", "-m", "implement plan"]);
    git_in(
        repo.path(),
        &["merge", "--no-ff", "--quiet", "-m", "merge plan", "foo"],
    );

    let outcome = finalize(&ctx, "foo", &commit_only).unwrap();
    assert!(outcome.resumed);
    assert!(!workspace.exists());
    assert!(!branch_exists(&repo, "foo"));
    assert_eq!(plan_status(&ctx, "foo"), PlanStatus::Implemented);
}

#[test]
fn start_rejects_dash_leading_plan_id_without_side_effects() {
    let repo = TestRepo::new();
    repo.write_plan(DEFAULT_NAMESPACE_DIR, "--force", &repo.head(), "ready");
    let ctx = context(&repo);

    let err = start(&ctx, "--force").unwrap_err();
    assert!(
        matches!(
            err,
            LifecycleError::Workspace(WorkspaceError::InvalidBranchName { .. })
        ),
        "{err}"
    );
    assert_eq!(
        repo.git(&["for-each-ref", "--format=%(refname)", "refs/heads/"]),
        "refs/heads/main"
    );
    assert_eq!(plan_status(&ctx, "--force"), PlanStatus::Ready);
}

#[test]
fn start_deletes_branch_it_created_when_worktree_add_fails() {
    let repo = TestRepo::new();
    repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", &repo.head(), "ready");
    let faulty = faulty_context(&repo, &["add_worktree"]);

    assert!(start(&faulty, "foo").is_err());
    assert!(!branch_exists(&repo, "foo"));
    assert!(!repo.path().join(".handoff/worktrees/foo").exists());

    let outcome = start(&context(&repo), "foo").unwrap();
    assert!(outcome.workspace.exists());
}

// ===========================================================================
// pin
// ===========================================================================

#[test]
fn pin_sets_sha_so_draft_can_start() {
    let repo = TestRepo::new();
    let path = repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", PLACEHOLDER_SHA, "draft");
    let ctx = context(&repo);
    assert!(start(&ctx, "foo").is_err());

    let head = repo.head();
    let outcome = pin(&ctx, "foo", &head).unwrap();

    assert_eq!(outcome.previous, PLACEHOLDER_SHA);
    assert_eq!(outcome.git_sha, head);
    assert!(std::fs::read_to_string(&path).unwrap().contains("# foo"));
    let metadata = lifecycle::load_plan(&ctx, "foo").unwrap();
    assert_eq!(metadata.git_sha, head);
    assert_eq!(
        ctx.backups().lookup("foo", Namespace::Active).unwrap(),
        Some(outcome.backup)
    );

    let started = start(&ctx, "foo").unwrap();
    assert!(started.workspace.exists());
}

#[test]
fn pin_refuses_once_branch_exists() {
    let repo = TestRepo::new();
    let (ctx, _) = started(&repo, "foo");
    let newer = repo.commit_file("x.txt", "x\n", "second");

    let err = pin(&ctx, "foo", &newer).unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyStarted { .. }), "{err}");
    assert_ne!(lifecycle::load_plan(&ctx, "foo").unwrap().git_sha, newer);
}

#[test]
fn pin_rejects_non_commits_without_writing() {
    let repo = TestRepo::new();
    let path = repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", PLACEHOLDER_SHA, "draft");
    let before = std::fs::read_to_string(&path).unwrap();
    let ctx = context(&repo);

    let tree = repo.git(&["rev-parse", "HEAD^{tree}"]);
    for bad in [PLACEHOLDER_SHA, "abc1234", tree.as_str()] {
        let err = pin(&ctx, "foo", bad).unwrap_err();
        assert!(matches!(err, LifecycleError::NotACommit { .. }), "{bad}: {err}");
    }
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn load_plan_validates_filed_plan() {
    let repo = TestRepo::new();
    repo.write_plan(DEFAULT_NAMESPACE_DIR, "foo", &repo.head(), "ready");
    let ctx = context(&repo);

    let metadata = lifecycle::load_plan(&ctx, "foo").unwrap();
    assert_eq!(metadata.plan_id, "foo");
    assert!(lifecycle::load_plan(&ctx, "../x").is_err());
}
