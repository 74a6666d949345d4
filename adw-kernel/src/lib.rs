pub mod exit_code;
pub mod model;
pub mod token_event;

pub use exit_code::{Band, ExitCode};
pub use model::{
    Claim, DependentsContext, MemoryHit, MemoryHitKind, PhaseOutcome, WorkItem, WorkItemStatus,
    Worktree, WorkflowRun, WorkflowRunState,
};
pub use token_event::TokenUsageEvent;
