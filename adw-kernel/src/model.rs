//! Core data model (spec.md §3): `WorkItem`, `Claim`, `WorkflowRun`,
//! `Worktree`, `PhaseOutcome`, `DependentsContext`, `MemoryHit`. Pure
//! value types — no IO, no locking. Owning processes (the dispatcher,
//! the phase sequencer) are responsible for the invariants described on
//! each type.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::exit_code::ExitCode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Open,
    Ready,
    InProgress,
    Done,
    Blocked,
}

/// A unit of engineering work discovered from the tracker. Created by
/// the tracker; mutated only via the tracker adapter; its lifetime is
/// external to this process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub body: String,
    /// Lower is higher priority.
    pub priority: i64,
    pub status: WorkItemStatus,
    pub assignee: Option<String>,
    pub blocked_by: Vec<String>,
    /// Identifier of the latest comment observed on this item, if any;
    /// used by the dispatcher's trigger-idempotency check.
    pub latest_comment_token: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl WorkItem {
    /// A `WorkItem` is ready iff it is open and every dependency is done.
    /// `done_lookup` reports whether a dependency id is currently done.
    pub fn is_ready(&self, mut done_lookup: impl FnMut(&str) -> bool) -> bool {
        self.status == WorkItemStatus::Open && self.blocked_by.iter().all(|dep| done_lookup(dep))
    }
}

/// A `(work-item-id, worker-id, acquired-at)` tuple produced by an
/// atomic open/ready → in-progress transition. Invariant: at most one
/// live `Claim` exists per work item at a time; enforced by the tracker
/// adapter's atomic `set_status` call, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub work_item_id: String,
    pub worker_id: String,
    pub acquired_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunState {
    Created,
    Running,
    Succeeded,
    Failed,
}

/// Identified by `(work_item_id, run_id)`. Mutated only by the phase
/// sequencer (C3); destroyed when the run terminates (its branch and
/// logs outlive it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub work_item_id: String,
    pub run_id: String,
    pub phases: Vec<String>,
    pub current_phase_index: usize,
    pub phase_outcomes: Vec<PhaseOutcome>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub worktree_path: PathBuf,
    pub base_branch: String,
    pub feature_branch: String,
    pub state: WorkflowRunState,
}

impl WorkflowRun {
    pub fn current_phase(&self) -> Option<&str> {
        self.phases
            .get(self.current_phase_index)
            .map(String::as_str)
    }
}

/// A checkout of the repository rooted under a conventional
/// `trees/<run-id>` location, bound to a feature branch. Owned
/// exclusively by one `WorkflowRun`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub run_id: String,
    pub path: PathBuf,
    pub base_branch: String,
    pub feature_branch: String,
}

/// Categorised integer code from C1, plus an optional human message and
/// usage record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub phase: String,
    pub code: i32,
    pub message: Option<String>,
    pub usage: Option<crate::token_event::TokenUsageEvent>,
}

impl PhaseOutcome {
    pub fn success(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            code: 0,
            message: None,
            usage: None,
        }
    }

    pub fn failure(phase: impl Into<String>, code: ExitCode, message: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            code: code.code(),
            message: Some(message.into()),
            usage: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn exit_code(&self) -> Option<ExitCode> {
        ExitCode::from_raw(self.code)
    }
}

/// For a file path, a list of files that import/depend on it (direct,
/// depth 1). Derived on demand from the external dependency index;
/// ephemeral.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependentsContext {
    pub path: String,
    pub dependents: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryHitKind {
    Failure,
    Decision,
}

/// Ephemeral hit produced by a search over the memory index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub kind: MemoryHitKind,
    pub summary: String,
    pub source_ref: String,
    pub relevance: f64,
}
