//! The phase sequencer (C3): runs a `WorkflowRun`'s phase scripts in
//! order against a worktree, one subprocess per phase, stopping at the
//! first non-zero exit code. Grounded on the teacher's agent-invocation
//! shape (spawn, pipe stdout/stderr, enforce a timeout, kill on
//! expiry) with the progress-filter subprocess and wire-chat plumbing
//! dropped: a phase script here is an opaque, already-built executable,
//! not an LLM chat client.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::Sender;
use tokio::time;

use adw_kernel::{ExitCode, PhaseOutcome, TokenUsageEvent, WorkflowRun};

use crate::console::{ProgressEvent, ProgressKind};
use crate::vcs::branch_differs_from_base_in;

#[derive(Debug)]
pub enum PhaseError {
    ScriptNotFound(PathBuf),
    Spawn(std::io::Error),
    Io(std::io::Error),
    Timeout(Duration),
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseError::ScriptNotFound(path) => {
                write!(f, "phase script not found at {}", path.display())
            }
            PhaseError::Spawn(e) => write!(f, "failed to spawn phase script: {e}"),
            PhaseError::Io(e) => write!(f, "I/O error reading phase output: {e}"),
            PhaseError::Timeout(d) => write!(f, "phase exceeded timeout of {}s", d.as_secs()),
        }
    }
}

impl std::error::Error for PhaseError {}

/// Where to find a phase's executable and how long it may run.
#[derive(Debug, Clone)]
pub struct PhaseSpec {
    pub name: String,
    pub script: PathBuf,
    pub timeout: Duration,
    /// Phases expected to leave a commit on the feature branch (plan
    /// does not; build and review do). When true and the branch did
    /// not diverge from base after a zero exit, the outcome is
    /// downgraded to `AGENT_FAILED` per the "no-op success" rule.
    pub expects_commit: bool,
}

/// Fixed environment a phase script runs with, independent of which
/// phase it is.
#[derive(Debug, Clone)]
pub struct PhaseEnv {
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub base_branch: String,
    pub feature_branch: String,
    pub work_item_id: String,
    pub run_id: String,
    pub orchestrator_context: bool,
}

/// Run every phase of `run` in order via `specs`, applying `env`,
/// forwarding `TOKEN_EVENT:` lines over `token_tx` and progress lines
/// over `progress_tx`, and stopping at the first phase that does not
/// succeed. Mutates `run.phase_outcomes` / `run.current_phase_index`
/// in place and returns the outcome of the last phase attempted.
pub async fn run_phases(
    run: &mut WorkflowRun,
    specs: &[PhaseSpec],
    env: &PhaseEnv,
    token_tx: Option<Sender<TokenUsageEvent>>,
    progress_tx: Option<Sender<ProgressEvent>>,
) -> Result<PhaseOutcome, PhaseError> {
    let mut last = PhaseOutcome::success("none");
    for (index, spec) in specs.iter().enumerate() {
        run.current_phase_index = index;
        let outcome = run_one_phase(spec, env, token_tx.clone(), progress_tx.clone()).await?;
        let failed = !outcome.is_success();
        run.phase_outcomes.push(outcome.clone());
        last = outcome;
        if failed {
            break;
        }
    }
    Ok(last)
}

async fn run_one_phase(
    spec: &PhaseSpec,
    env: &PhaseEnv,
    token_tx: Option<Sender<TokenUsageEvent>>,
    progress_tx: Option<Sender<ProgressEvent>>,
) -> Result<PhaseOutcome, PhaseError> {
    if !spec.script.exists() {
        return Err(PhaseError::ScriptNotFound(spec.script.clone()));
    }

    let mut command = Command::new(&spec.script);
    command
        .arg(&env.work_item_id)
        .arg(&env.run_id)
        .current_dir(&env.worktree_path)
        .env("ADW_REPO_PATH", &env.repo_path)
        .env("ADW_WORKTREE_PATH", &env.worktree_path)
        .env("ADW_BASE_BRANCH", &env.base_branch)
        .env("ADW_FEATURE_BRANCH", &env.feature_branch)
        .env("ADW_PHASE", &spec.name)
        .env(
            "ADW_ORCHESTRATOR_CONTEXT",
            if env.orchestrator_context { "1" } else { "0" },
        )
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(PhaseError::Spawn)?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let phase_name = spec.name.clone();
    let token_tx_for_stdout = token_tx.clone();
    let progress_tx_for_stdout = progress_tx.clone();
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut usage = None;
        while let Ok(Some(line)) = lines.next_line().await {
            match TokenUsageEvent::parse_line(&line) {
                Some(Ok(event)) => {
                    usage = Some(event.clone());
                    if let Some(tx) = &token_tx_for_stdout {
                        let _ = tx.send(event).await;
                    }
                }
                Some(Err(_)) | None => {
                    if let Some(tx) = &progress_tx_for_stdout {
                        let _ = tx
                            .send(
                                ProgressEvent::new(ProgressKind::Phase, line)
                                    .with_phase(phase_name.clone()),
                            )
                            .await;
                    }
                }
            }
        }
        usage
    });

    let phase_name_err = spec.name.clone();
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut collected = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(tx) = &progress_tx {
                let _ = tx
                    .send(
                        ProgressEvent::new(ProgressKind::Phase, line.clone())
                            .with_phase(phase_name_err.clone())
                            .with_source("stderr"),
                    )
                    .await;
            }
            collected.push(line);
        }
        collected
    });

    let wait_future = child.wait();
    let status = match time::timeout(spec.timeout, wait_future).await {
        Ok(result) => result.map_err(PhaseError::Io)?,
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            return Ok(PhaseOutcome::failure(
                &spec.name,
                ExitCode::AGENT_TIMEOUT,
                format!("phase `{}` exceeded {}s", spec.name, spec.timeout.as_secs()),
            ));
        }
    };

    let usage = stdout_task.await.unwrap_or(None);
    let stderr_lines = stderr_task.await.unwrap_or_default();
    let code = status.code().unwrap_or(-1);

    if code == 0 {
        let diverged = branch_differs_from_base_in(&env.repo_path, &env.feature_branch, &env.base_branch);
        if spec.expects_commit && !diverged {
            return Ok(PhaseOutcome::failure(
                &spec.name,
                ExitCode::AGENT_FAILED,
                format!("phase `{}` exited 0 but left no commit on {}", spec.name, env.feature_branch),
            ));
        }
        let mut outcome = PhaseOutcome::success(&spec.name);
        outcome.usage = usage;
        return Ok(outcome);
    }

    let message = if stderr_lines.is_empty() {
        format!("phase `{}` exited with code {code}", spec.name)
    } else {
        stderr_lines.join("\n")
    };
    match ExitCode::from_raw(code) {
        Some(exit_code) => Ok(PhaseOutcome::failure(&spec.name, exit_code, message)),
        None => Ok(PhaseOutcome::failure(
            &spec.name,
            ExitCode::UNEXPECTED_RUNTIME_ERROR,
            message,
        )),
    }
}

pub fn default_phase_specs<P: AsRef<Path>>(scripts_dir: P, timeout: Duration) -> Vec<PhaseSpec> {
    let dir = scripts_dir.as_ref();
    vec![
        PhaseSpec {
            name: "plan".into(),
            script: dir.join("plan.sh"),
            timeout,
            expects_commit: false,
        },
        PhaseSpec {
            name: "build".into(),
            script: dir.join("build.sh"),
            timeout,
            expects_commit: true,
        },
        PhaseSpec {
            name: "review".into(),
            script: dir.join("review.sh"),
            timeout,
            expects_commit: true,
        },
    ]
}
