//! Coverage of the phase sequencer (C3) against real shell scripts
//! standing in for phase scripts: exit-code passthrough, TOKEN_EVENT
//! forwarding (property 7), timeout handling, and the "zero exit but
//! no commit" override to AGENT_FAILED.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use adw_core::phase::{run_phases, PhaseEnv, PhaseSpec};
use adw_kernel::{WorkflowRun, WorkflowRunState};

fn git(dir: &Path, args: &[&str]) {
    assert!(Command::new("git").args(args).current_dir(dir).status().unwrap().success());
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

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

fn new_run(env: &PhaseEnv, phase: &str) -> WorkflowRun {
    WorkflowRun {
        work_item_id: env.work_item_id.clone(),
        run_id: env.run_id.clone(),
        phases: vec![phase.to_string()],
        current_phase_index: 0,
        phase_outcomes: Vec::new(),
        started_at: chrono::Utc::now(),
        worktree_path: env.worktree_path.clone(),
        base_branch: env.base_branch.clone(),
        feature_branch: env.feature_branch.clone(),
        state: WorkflowRunState::Running,
    }
}

fn setup(scripts_dir: &Path) -> (tempfile::TempDir, PathBuf, String) {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path());
    let (worktree_path, feature_branch) =
        adw_core::vcs::ensure_worktree_in(repo.path(), "phase-test", "main").unwrap();
    std::fs::create_dir_all(scripts_dir).unwrap();
    (repo, worktree_path, feature_branch)
}

#[tokio::test]
async fn successful_phase_with_commit_reports_success_and_forwards_token_event() {
    let scripts = tempfile::tempdir().unwrap();
    let (repo, worktree_path, feature_branch) = setup(scripts.path());

    write_script(
        &scripts.path().join("build.sh"),
        "#!/bin/sh\n\
         echo hi >> notes.txt\n\
         git add .\n\
         git commit -q -m work\n\
         echo 'TOKEN_EVENT:{\"adw_id\":\"run-1\",\"phase\":\"build\",\"agent\":\"claude\",\"input_tokens\":10,\"output_tokens\":5,\"cache_read_tokens\":0,\"cache_creation_tokens\":0,\"cost_usd\":null,\"timestamp\":\"2026-01-01T00:00:00Z\"}'\n\
         exit 0\n",
    );

    let env = PhaseEnv {
        repo_path: repo.path().to_path_buf(),
        worktree_path,
        base_branch: "main".into(),
        feature_branch,
        work_item_id: "42".into(),
        run_id: "phase-test".into(),
        orchestrator_context: false,
    };
    let spec = PhaseSpec {
        name: "build".into(),
        script: scripts.path().join("build.sh"),
        timeout: Duration::from_secs(10),
        expects_commit: true,
    };
    let (token_tx, mut token_rx) = tokio::sync::mpsc::channel(4);
    let mut run = new_run(&env, "build");

    let outcome = run_phases(&mut run, &[spec], &env, Some(token_tx), None).await.unwrap();
    assert!(outcome.is_success());

    let event = token_rx.recv().await.expect("token event forwarded");
    assert_eq!(event.input_tokens, 10);
    assert_eq!(event.output_tokens, 5);
}

#[tokio::test]
async fn zero_exit_without_a_commit_is_downgraded_to_agent_failed() {
    let scripts = tempfile::tempdir().unwrap();
    let (repo, worktree_path, feature_branch) = setup(scripts.path());

    write_script(&scripts.path().join("build.sh"), "#!/bin/sh\nexit 0\n");

    let env = PhaseEnv {
        repo_path: repo.path().to_path_buf(),
        worktree_path,
        base_branch: "main".into(),
        feature_branch,
        work_item_id: "42".into(),
        run_id: "phase-test".into(),
        orchestrator_context: false,
    };
    let spec = PhaseSpec {
        name: "build".into(),
        script: scripts.path().join("build.sh"),
        timeout: Duration::from_secs(10),
        expects_commit: true,
    };
    let mut run = new_run(&env, "build");

    let outcome = run_phases(&mut run, &[spec], &env, None, None).await.unwrap();
    assert!(!outcome.is_success());
    assert_eq!(outcome.code, adw_kernel::ExitCode::AGENT_FAILED.code());
}

#[tokio::test]
async fn nonzero_exit_maps_to_the_matching_exit_code() {
    let scripts = tempfile::tempdir().unwrap();
    let (repo, worktree_path, feature_branch) = setup(scripts.path());

    write_script(&scripts.path().join("plan.sh"), "#!/bin/sh\nexit 11\n");

    let env = PhaseEnv {
        repo_path: repo.path().to_path_buf(),
        worktree_path,
        base_branch: "main".into(),
        feature_branch,
        work_item_id: "42".into(),
        run_id: "phase-test".into(),
        orchestrator_context: true,
    };
    let spec = PhaseSpec {
        name: "plan".into(),
        script: scripts.path().join("plan.sh"),
        timeout: Duration::from_secs(10),
        expects_commit: false,
    };
    let mut run = new_run(&env, "plan");

    let outcome = run_phases(&mut run, &[spec], &env, None, None).await.unwrap();
    assert_eq!(outcome.code, 11);
    assert!(outcome.exit_code().unwrap().is_validation_failure());
}

#[tokio::test]
async fn a_hung_phase_is_killed_at_its_timeout() {
    let scripts = tempfile::tempdir().unwrap();
    let (repo, worktree_path, feature_branch) = setup(scripts.path());

    write_script(&scripts.path().join("build.sh"), "#!/bin/sh\nsleep 30\n");

    let env = PhaseEnv {
        repo_path: repo.path().to_path_buf(),
        worktree_path,
        base_branch: "main".into(),
        feature_branch,
        work_item_id: "42".into(),
        run_id: "phase-test".into(),
        orchestrator_context: false,
    };
    let spec = PhaseSpec {
        name: "build".into(),
        script: scripts.path().join("build.sh"),
        timeout: Duration::from_millis(200),
        expects_commit: true,
    };
    let mut run = new_run(&env, "build");

    let outcome = run_phases(&mut run, &[spec], &env, None, None).await.unwrap();
    assert_eq!(outcome.code, adw_kernel::ExitCode::AGENT_TIMEOUT.code());
}
