//! The orchestrator guard and context classifier (C4): decides whether
//! a tool call made from orchestrator context should be blocked, and
//! tracks whether orchestrator context is currently active.
//!
//! Grounded on the original automation's `orchestrator_guard.py` (the
//! blocked/allowed tool sets and block-message shape) and
//! `orchestrator_context.py` (the regex pattern table and the
//! env-var-then-state-file read path, including the atomic
//! write-to-temp-then-rename).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub static BLOCKED_TOOLS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["Write", "Edit", "MultiEdit", "NotebookEdit"].into_iter().collect());

pub static ALLOWED_TOOLS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "Read",
        "Grep",
        "Glob",
        "Bash",
        "Task",
        "SlashCommand",
        "AskUserQuestion",
        "TodoWrite",
        "WebFetch",
        "WebSearch",
    ]
    .into_iter()
    .collect()
});

const ENV_VAR: &str = "ADW_ORCHESTRATOR_CONTEXT";

/// `(pattern, context_name)`, checked in order against the lowercased
/// prompt; the first match wins.
static CONTEXT_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"^/plan\b").unwrap(), "plan-phase"),
        (Regex::new(r"^/orchestrate\b").unwrap(), "workflow-orchestrator"),
        (Regex::new(r"\borchestrator\b.*\bcommand\b").unwrap(), "command-orchestrator"),
    ]
});

/// Whether `prompt` should activate orchestrator context, and under
/// what name.
pub fn detect_orchestrator_context(prompt: &str) -> Option<&'static str> {
    if prompt.is_empty() {
        return None;
    }
    let lowered = prompt.to_lowercase();
    CONTEXT_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(&lowered))
        .map(|(_, name)| *name)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContextState {
    context_name: String,
    active: bool,
    #[serde(default)]
    prompt_preview: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Cross-process persistence for orchestrator context: written by the
/// phase that enters orchestrator context, read by every subsequent
/// tool-call interception in a (possibly different) process.
pub struct ContextStateFile {
    path: PathBuf,
}

impl ContextStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Atomic write: write to `<path>.tmp` then rename over `path`, so
    /// a concurrent reader never observes a partial write.
    pub fn activate(&self, context_name: &str, prompt_preview: &str) -> std::io::Result<()> {
        let state = ContextState {
            context_name: context_name.to_string(),
            active: true,
            prompt_preview: prompt_preview.chars().take(200).collect(),
            timestamp: chrono::Utc::now(),
        };
        let body = serde_json::to_string_pretty(&state).expect("ContextState always serialises");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)
    }

    pub fn clear(&self) -> std::io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn read(&self) -> Option<(bool, String)> {
        let body = fs::read_to_string(&self.path).ok()?;
        let state: ContextState = serde_json::from_str(&body).ok()?;
        Some((state.active, state.context_name))
    }
}

/// Read the active orchestrator context, preferring the in-process env
/// var (set by the same process that activated it) and falling back to
/// `state_file` for cross-process checks.
pub fn read_orchestrator_context(state_file: &ContextStateFile) -> Option<String> {
    if let Ok(name) = std::env::var(ENV_VAR)
        && !name.is_empty()
    {
        return Some(name);
    }
    state_file
        .read()
        .filter(|(active, _)| *active)
        .map(|(_, name)| name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Continue,
    Block(String),
}

/// Decide whether `tool_name` (with `file_path`, if any) should be
/// blocked given the currently-active orchestrator context, if any.
pub fn evaluate_tool_call(
    tool_name: &str,
    file_path: Option<&str>,
    active_context: Option<&str>,
) -> GuardDecision {
    let Some(context_name) = active_context else {
        return GuardDecision::Continue;
    };
    if !BLOCKED_TOOLS.contains(tool_name) {
        return GuardDecision::Continue;
    }
    GuardDecision::Block(build_block_message(tool_name, context_name, file_path))
}

fn build_block_message(tool_name: &str, context_name: &str, file_path: Option<&str>) -> String {
    let target = file_path.unwrap_or("<target file>");
    let mut allowed: Vec<&str> = ALLOWED_TOOLS.iter().copied().collect();
    allowed.sort_unstable();

    format!(
        "[BLOCKED] Tool '{tool_name}' is not allowed in orchestrator context.\n\n\
         Context: {context_name}\n\
         Target: {target}\n\n\
         Orchestrators must delegate file modifications to build agents.\n\n\
         To proceed:\n\
         1. Spawn a build phase for this work item.\n\
         2. Or run the phase directly outside orchestrator context.\n\n\
         Allowed tools in orchestrator context:\n  {}\n\n\
         To disable enforcement, clear the orchestrator context.",
        allowed.join(", ")
    )
}
