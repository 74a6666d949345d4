use std::io::Read;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tokio::sync::mpsc;

use adw_core::config::Config;
use adw_core::console::{get_display_config, render_progress_event, ProgressEvent};
use adw_core::dispatcher::{self, ShutdownSignal};
use adw_core::guard::{self, ContextStateFile};
use adw_core::phase::{self, PhaseEnv};
use adw_core::tracker::{GhTrackerAdapter, TrackerAdapter};
use adw_core::vcs::{detect_primary_branch_in, ensure_worktree_in};
use adw_core::{ceprintln, cprintln};
use adw_kernel::{ExitCode, PhaseOutcome, WorkItem, WorkItemStatus, WorkflowRun, WorkflowRunState};

use crate::cli::args::{Cli, Commands, GuardAction, PhaseName};
use crate::completions;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::RunPhase(args) => run_phase_command(args).await,
        Commands::Claim(args) => run_claim(args).await,
        Commands::Doctor(args) => run_doctor(args).await,
        Commands::Guard(args) => run_guard(args),
        Commands::TokenReport(args) => run_token_report(args),
        Commands::Completions(args) => completions::write_registration(args.shell),
    }
}

/// Wait for a shutdown request. Handles SIGTERM (the signal a process
/// manager sends) alongside Ctrl-C; platforms without `tokio::signal::unix`
/// fall back to Ctrl-C only.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Build a `launch` closure for [`dispatcher::run_forever`]: allocate a
/// run id, materialise a worktree off the repo's primary branch, and run
/// the configured phase sequence, returning the terminal `PhaseOutcome`
/// for the dispatcher's outcome accounting.
async fn run_one_workflow(
    item: WorkItem,
    repo_path: std::path::PathBuf,
    config: Config,
    progress_tx: Option<mpsc::Sender<ProgressEvent>>,
) -> PhaseOutcome {
    let run_id = match dispatcher::allocate_run_id(&repo_path, &item.id) {
        Some(id) => id,
        None => {
            return PhaseOutcome::failure(
                "allocate-run-id",
                ExitCode::EXTERNAL_RESOURCE_UNAVAILABLE,
                "could not allocate a unique run id",
            );
        }
    };

    let base_branch = detect_primary_branch_in(&repo_path).unwrap_or_else(|| "main".to_string());

    let (worktree_path, feature_branch) =
        match ensure_worktree_in(&repo_path, &run_id, &base_branch) {
            Ok(result) => result,
            Err(err) => {
                return PhaseOutcome::failure(
                    "ensure-worktree",
                    ExitCode::MISSING_WORKTREE,
                    err.to_string(),
                );
            }
        };

    let env = PhaseEnv {
        repo_path: repo_path.clone(),
        worktree_path: worktree_path.clone(),
        base_branch: base_branch.clone(),
        feature_branch: feature_branch.clone(),
        work_item_id: item.id.clone(),
        run_id: run_id.clone(),
        orchestrator_context: true,
    };

    let specs = phase::default_phase_specs(&config.scripts_dir, config.phase_timeout());
    let mut run = WorkflowRun {
        work_item_id: item.id.clone(),
        run_id,
        phases: specs.iter().map(|s| s.name.clone()).collect(),
        current_phase_index: 0,
        phase_outcomes: Vec::new(),
        started_at: chrono::Utc::now(),
        worktree_path,
        base_branch,
        feature_branch,
        state: WorkflowRunState::Running,
    };

    match phase::run_phases(&mut run, &specs, &env, None, progress_tx).await {
        Ok(outcome) => outcome,
        Err(err) => PhaseOutcome::failure("phase-sequencer", ExitCode::UNEXPECTED_RUNTIME_ERROR, err.to_string()),
    }
}

async fn run_serve(args: crate::cli::args::ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(&args.repo)?;
    if let Some(v) = args.poll_seconds {
        config.poll_seconds = v;
    }
    if let Some(v) = args.trigger_token {
        config.trigger_token = v;
    }
    if let Some(v) = args.worker_id {
        config.worker_id = v;
    }

    let tracker: Arc<dyn TrackerAdapter> = Arc::new(GhTrackerAdapter::new(config.repo.clone()));
    let shutdown = ShutdownSignal::new();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        ceprintln!("received shutdown signal; finishing current cycle before exit");
        shutdown_for_signal.request();
    });

    let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressEvent>(64);
    tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            for line in render_progress_event(&event, get_display_config().verbosity) {
                ceprintln!("{line}");
            }
        }
    });

    cprintln!("adw serve: repo={} poll={}s", config.repo, config.poll_seconds);

    let repo_path = args.repo.clone();
    let launch_config = config.clone();
    dispatcher::run_forever(tracker, &config, shutdown, Some(progress_tx.clone()), move |item| {
        run_one_workflow(item, repo_path.clone(), launch_config.clone(), Some(progress_tx.clone()))
    })
    .await;
    Ok(())
}

async fn run_phase_command(
    args: crate::cli::args::RunPhaseArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&args.repo)?;
    let (worktree_path, feature_branch) =
        ensure_worktree_in(&args.repo, &args.run_id, &args.base_branch)?;

    let spec = phase::default_phase_specs(&config.scripts_dir, config.phase_timeout())
        .into_iter()
        .find(|s| s.name == args.phase.as_str())
        .ok_or_else(|| format!("no script configured for phase `{}`", args.phase.as_str()))?;

    let env = PhaseEnv {
        repo_path: args.repo.clone(),
        worktree_path,
        base_branch: args.base_branch,
        feature_branch,
        work_item_id: args.work_item,
        run_id: args.run_id,
        orchestrator_context: matches!(args.phase, PhaseName::Plan),
    };

    let mut run = adw_kernel::WorkflowRun {
        work_item_id: env.work_item_id.clone(),
        run_id: env.run_id.clone(),
        phases: vec![spec.name.clone()],
        current_phase_index: 0,
        phase_outcomes: Vec::new(),
        started_at: chrono::Utc::now(),
        worktree_path: env.worktree_path.clone(),
        base_branch: env.base_branch.clone(),
        feature_branch: env.feature_branch.clone(),
        state: adw_kernel::WorkflowRunState::Running,
    };

    let outcome = phase::run_phases(&mut run, std::slice::from_ref(&spec), &env, None, None).await?;
    if outcome.is_success() {
        cprintln!("phase `{}` succeeded", spec.name);
        Ok(())
    } else {
        ceprintln!(
            "phase `{}` failed: code {} ({})",
            spec.name,
            outcome.code,
            outcome.message.unwrap_or_default()
        );
        std::process::exit(outcome.code);
    }
}

async fn run_claim(args: crate::cli::args::ClaimArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&args.repo)?;
    let tracker = GhTrackerAdapter::new(config.repo.clone());
    tracker.set_status(&args.work_item, WorkItemStatus::InProgress).await?;
    cprintln!("claimed work item {}", args.work_item);
    Ok(())
}

async fn run_doctor(args: crate::cli::args::DoctorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&args.repo)?;
    let mut checks: Vec<(&str, bool, Option<String>)> = Vec::new();

    checks.push((
        "git",
        detect_primary_branch_in(&args.repo).is_some(),
        None,
    ));

    let gh_version = tokio::process::Command::new("gh").arg("--version").output().await;
    checks.push((
        "github",
        gh_version.as_ref().map(|o| o.status.success()).unwrap_or(false),
        gh_version.err().map(|e| e.to_string()),
    ));

    let anthropic_key_present = std::env::var("ANTHROPIC_API_KEY").is_ok();
    checks.push((
        "anthropic_api_key",
        anthropic_key_present,
        if anthropic_key_present {
            None
        } else {
            Some("required: Anthropic API key for the agent runtime".to_string())
        },
    ));

    let claude_code_path = std::env::var("CLAUDE_CODE_PATH").unwrap_or_else(|_| "claude".to_string());
    let claude_version = tokio::process::Command::new(&claude_code_path)
        .arg("--version")
        .output()
        .await;
    checks.push((
        "claude_code",
        claude_version.as_ref().map(|o| o.status.success()).unwrap_or(false),
        Some(format!("using `{claude_code_path}`")),
    ));

    for (name, var, description) in [
        ("github_pat", "GITHUB_PAT", "optional: token for `gh` auth in non-interactive contexts"),
        ("e2b_api_key", "E2B_API_KEY", "optional: sandbox key for agent cloud execution"),
    ] {
        let present = std::env::var(var).is_ok();
        checks.push((
            name,
            true,
            Some(if present {
                format!("{var} is set")
            } else {
                format!("{var} not set ({description})")
            }),
        ));
    }

    checks.push(("config", true, Some(format!("poll_seconds={}", config.poll_seconds))));

    let all_ok = checks.iter().all(|(_, ok, _)| *ok);

    if args.json {
        let payload = serde_json::json!({
            "success": all_ok,
            "checks": checks.iter().map(|(name, ok, detail)| {
                serde_json::json!({"name": name, "success": ok, "detail": detail})
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (name, ok, detail) in &checks {
            cprintln!("[{}] {name}{}", if *ok { "OK" } else { "FAIL" }, detail.as_deref().map(|d| format!(" - {d}")).unwrap_or_default());
        }
    }

    if all_ok {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

#[derive(Deserialize)]
struct GuardCheckInput {
    tool_name: String,
    #[serde(default)]
    file_path: Option<String>,
}

fn run_guard(args: crate::cli::args::GuardArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.action {
        GuardAction::Activate { state_file } => {
            let mut prompt = String::new();
            std::io::stdin().read_to_string(&mut prompt)?;
            let state = ContextStateFile::new(state_file);
            match guard::detect_orchestrator_context(&prompt) {
                Some(context_name) => state.activate(context_name, &prompt)?,
                None => state.clear()?,
            }
            Ok(())
        }
        GuardAction::Check { state_file } => {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            let parsed: GuardCheckInput = serde_json::from_str(&input)?;
            let state = ContextStateFile::new(state_file);
            let active_context = guard::read_orchestrator_context(&state);
            match guard::evaluate_tool_call(
                &parsed.tool_name,
                parsed.file_path.as_deref(),
                active_context.as_deref(),
            ) {
                guard::GuardDecision::Continue => Ok(()),
                guard::GuardDecision::Block(message) => {
                    // Consumed verbatim by the calling hook harness, not decorated.
                    eprintln!("{message}");
                    std::process::exit(1);
                }
            }
        }
        GuardAction::Clear { state_file } => {
            ContextStateFile::new(state_file).clear()?;
            Ok(())
        }
    }
}

fn run_token_report(args: crate::cli::args::TokenReportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let pricing = Config::load(&args.repo).map(|c| c.pricing).unwrap_or_default();
    let body = std::fs::read_to_string(&args.log_file)?;
    let mut total_input = 0u64;
    let mut total_output = 0u64;
    let mut total_cost = 0.0f64;
    let mut by_phase: std::collections::BTreeMap<String, (u64, u64)> = std::collections::BTreeMap::new();

    for line in body.lines() {
        if let Some(Ok(event)) = adw_kernel::TokenUsageEvent::parse_line(line) {
            total_input += event.input_tokens;
            total_output += event.output_tokens;
            total_cost += event.cost_usd.unwrap_or_else(|| {
                pricing.cost_usd(
                    event.input_tokens,
                    event.output_tokens,
                    event.cache_read_tokens,
                    event.cache_creation_tokens,
                )
            });
            let entry = by_phase.entry(event.phase.clone()).or_insert((0, 0));
            entry.0 += event.input_tokens;
            entry.1 += event.output_tokens;
        }
    }

    cprintln!("total input tokens:  {total_input}");
    cprintln!("total output tokens: {total_output}");
    cprintln!("total cost (usd):    {total_cost:.4}");
    for (phase, (input, output)) in by_phase {
        cprintln!("  {phase}: input={input} output={output}");
    }
    Ok(())
}
