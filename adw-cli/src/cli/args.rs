use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(name = "adw", version, about = "Autonomous development workflow orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the polling dispatcher against a repository, claiming and
    /// launching qualifying work items until interrupted.
    Serve(ServeArgs),
    /// Run a single phase script against a work item's worktree.
    RunPhase(RunPhaseArgs),
    /// Atomically claim one work item without launching a run.
    Claim(ClaimArgs),
    /// Run environment/toolchain health checks.
    Doctor(DoctorArgs),
    /// Orchestrator-context guard hook shim.
    Guard(GuardArgs),
    /// Summarise recorded TOKEN_EVENT lines from a run's captured output.
    TokenReport(TokenReportArgs),
    /// Emit shell completion script.
    Completions(CompletionsArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Path to the repository to poll.
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,
    #[arg(long)]
    pub poll_seconds: Option<u64>,
    #[arg(long)]
    pub trigger_token: Option<String>,
    #[arg(long)]
    pub worker_id: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct RunPhaseArgs {
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,
    #[arg(long)]
    pub work_item: String,
    #[arg(long)]
    pub run_id: String,
    #[arg(long, value_enum)]
    pub phase: PhaseName,
    #[arg(long, default_value = "main")]
    pub base_branch: String,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PhaseName {
    Plan,
    Build,
    Review,
}

impl PhaseName {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseName::Plan => "plan",
            PhaseName::Build => "build",
            PhaseName::Review => "review",
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct ClaimArgs {
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,
    #[arg(long)]
    pub work_item: String,
}

#[derive(clap::Args, Debug)]
pub struct DoctorArgs {
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct GuardArgs {
    #[command(subcommand)]
    pub action: GuardAction,
}

#[derive(Subcommand, Debug)]
pub enum GuardAction {
    /// Read a prompt from stdin; if it matches an orchestrator
    /// pattern, persist active context to the state file.
    Activate {
        #[arg(long, default_value = ".claude/data/orchestrator_context.json")]
        state_file: PathBuf,
    },
    /// Read a `{tool_name, file_path}` JSON object from stdin; print a
    /// block message and exit 1 if the tool is blocked, else exit 0.
    Check {
        #[arg(long, default_value = ".claude/data/orchestrator_context.json")]
        state_file: PathBuf,
    },
    /// Clear any active orchestrator context.
    Clear {
        #[arg(long, default_value = ".claude/data/orchestrator_context.json")]
        state_file: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct TokenReportArgs {
    /// File containing captured phase stdout, one line per entry.
    pub log_file: PathBuf,
    /// Repo to read `adw.toml`'s pricing table from, for events that
    /// didn't already carry a `cost_usd`.
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}
