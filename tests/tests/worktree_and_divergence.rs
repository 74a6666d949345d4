//! End-to-end coverage of the worktree manager (C2) against a real git
//! repository: creating a worktree, observing divergence once a commit
//! lands on its feature branch, and releasing it again.

use std::path::Path;
use std::process::Command;

use adw_core::vcs::{branch_differs_from_base_in, ensure_worktree_in, remove_worktree_in};

fn git(dir: &Path, args: &[&str]) {
    assert!(
        Command::new("git").args(args).current_dir(dir).status().unwrap().success(),
        "git {args:?} failed in {dir:?}"
    );
}

fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
    std::fs::write(dir.join("README.md"), "hello\n").unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "init"]);
    git(dir, &["branch", "-M", "main"]);
}

#[test]
fn worktree_lifecycle_tracks_divergence() {
    let tmp = tempfile::tempdir().unwrap();
    init_repo(tmp.path());

    let (worktree_path, feature_branch) =
        ensure_worktree_in(tmp.path(), "scenario-1", "main").unwrap();
    assert!(worktree_path.exists());
    assert_eq!(feature_branch, "adw/scenario-1");

    assert!(!branch_differs_from_base_in(tmp.path(), &feature_branch, "main"));

    std::fs::write(worktree_path.join("feature.txt"), "work\n").unwrap();
    git(&worktree_path, &["add", "."]);
    git(&worktree_path, &["commit", "-q", "-m", "feature work"]);

    assert!(branch_differs_from_base_in(tmp.path(), &feature_branch, "main"));

    remove_worktree_in(tmp.path(), "scenario-1", true).unwrap();
    assert!(!worktree_path.exists());
}

#[test]
fn two_runs_get_independent_worktrees() {
    let tmp = tempfile::tempdir().unwrap();
    init_repo(tmp.path());

    let (path_a, branch_a) = ensure_worktree_in(tmp.path(), "run-a", "main").unwrap();
    let (path_b, branch_b) = ensure_worktree_in(tmp.path(), "run-b", "main").unwrap();

    assert_ne!(path_a, path_b);
    assert_ne!(branch_a, branch_b);
    assert!(path_a.exists());
    assert!(path_b.exists());
}
