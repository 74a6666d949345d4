//! The worktree and branch-divergence manager (C2): creates/locates
//! per-workflow worktrees on a named base branch and answers "does this
//! branch differ from base?".

mod branches;
mod divergence;
mod worktrees;

pub use branches::{
    branch_exists_in, checkout_branch_in, create_branch_from_in, delete_branch_in,
    detect_primary_branch_in,
};
pub use divergence::branch_differs_from_base_in;
pub use worktrees::{
    add_worktree_for_branch_in, ensure_worktree_in, find_worktree_name_by_path_in,
    remove_worktree_in,
};
