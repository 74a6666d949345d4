//! The structured exit-code taxonomy (C1): a closed enumeration of
//! categorised outcome codes, band predicates, and human descriptions.
//!
//! Codes and bands are sourced from the original automation's
//! `exit_codes.py`: blockers [1,9], validation failures [10,19],
//! execution failures [20,29], resource failures [30,39].

use std::fmt;

/// One of the four contiguous numeric bands an [`ExitCode`] falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    Blocker,
    Validation,
    Execution,
    Resource,
}

impl Band {
    pub fn as_str(self) -> &'static str {
        match self {
            Band::Blocker => "blocker",
            Band::Validation => "validation",
            Band::Execution => "execution",
            Band::Resource => "resource",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorised outcome code in [1, 39]. Constructed only through the
/// named constructors below or [`ExitCode::from_raw`], so every live
/// value is a member of the closed taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const MISSING_ENV_OR_EXECUTABLE: ExitCode = ExitCode(1);
    pub const MISSING_PRIOR_STATE: ExitCode = ExitCode(2);
    pub const MISSING_WORKTREE: ExitCode = ExitCode(3);
    pub const MISSING_SPEC_OR_PLAN: ExitCode = ExitCode(4);
    pub const INVALID_CLI_ARGS: ExitCode = ExitCode(5);
    pub const EXTERNAL_RESOURCE_UNAVAILABLE: ExitCode = ExitCode(7);

    pub const BLOCKING_REVIEW_ISSUES: ExitCode = ExitCode(10);
    pub const TEST_FAILURE: ExitCode = ExitCode(11);
    pub const LINT_FAILURE: ExitCode = ExitCode(12);
    pub const TYPECHECK_FAILURE: ExitCode = ExitCode(13);
    pub const SECURITY_ISSUE: ExitCode = ExitCode(14);

    pub const AGENT_FAILED: ExitCode = ExitCode(20);
    pub const AGENT_TIMEOUT: ExitCode = ExitCode(21);
    pub const PARSE_ERROR: ExitCode = ExitCode(22);
    pub const UNEXPECTED_RUNTIME_ERROR: ExitCode = ExitCode(23);

    pub const VCS_ERROR: ExitCode = ExitCode(30);
    pub const FILE_IO_ERROR: ExitCode = ExitCode(31);
    pub const NETWORK_ERROR: ExitCode = ExitCode(32);
    pub const REPO_RESOLUTION_ERROR: ExitCode = ExitCode(33);

    /// Construct from a raw process exit code. Returns `None` for 0
    /// (success, not part of the failure taxonomy) or any code outside
    /// the defined bands.
    pub fn from_raw(code: i32) -> Option<ExitCode> {
        const KNOWN: &[i32] = &[
            1, 2, 3, 4, 5, 7, 10, 11, 12, 13, 14, 20, 21, 22, 23, 30, 31, 32, 33,
        ];
        if KNOWN.contains(&code) {
            Some(ExitCode(code))
        } else {
            None
        }
    }

    pub fn code(self) -> i32 {
        self.0
    }

    pub fn band(self) -> Option<Band> {
        match self.0 {
            1..=9 => Some(Band::Blocker),
            10..=19 => Some(Band::Validation),
            20..=29 => Some(Band::Execution),
            30..=39 => Some(Band::Resource),
            _ => None,
        }
    }

    pub fn is_blocker(self) -> bool {
        matches!(self.band(), Some(Band::Blocker))
    }

    pub fn is_validation_failure(self) -> bool {
        matches!(self.band(), Some(Band::Validation))
    }

    pub fn is_execution_failure(self) -> bool {
        matches!(self.band(), Some(Band::Execution))
    }

    pub fn is_resource_failure(self) -> bool {
        matches!(self.band(), Some(Band::Resource))
    }

    pub fn description(self) -> &'static str {
        match self.0 {
            1 => "missing required environment variable or executable",
            2 => "missing prior state from an earlier phase",
            3 => "missing or unusable worktree",
            4 => "missing specification or plan document",
            5 => "invalid command-line arguments",
            7 => "required external resource unavailable",
            10 => "blocking review issues",
            11 => "test failure",
            12 => "lint failure",
            13 => "typecheck failure",
            14 => "security issue",
            20 => "agent execution failed",
            21 => "agent execution timed out",
            22 => "parse error on agent output",
            23 => "unexpected runtime error",
            30 => "version-control error",
            31 => "file I/O error",
            32 => "network or API error",
            33 => "repository resolution error",
            _ => "unknown exit code",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.description())
    }
}

impl From<ExitCode> for i32 {
    fn from(value: ExitCode) -> Self {
        value.0
    }
}
