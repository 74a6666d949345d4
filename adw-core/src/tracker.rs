//! The issue-tracker adapter: lists open work items, fetches their
//! comments/details, and performs the atomic claim (status transition)
//! that hands a work item to exactly one worker. Grounded on the
//! original automation's `github.py`, which shells the `gh` CLI rather
//! than calling the GitHub API directly; `GhTrackerAdapter` keeps that
//! shape.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;

use adw_kernel::{WorkItem, WorkItemStatus};

#[derive(Debug)]
pub enum TrackerError {
    CliNotFound,
    CommandFailed { args: Vec<String>, stderr: String },
    Parse(serde_json::Error),
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::CliNotFound => {
                write!(f, "tracker CLI not found; install `gh` and run `gh auth login`")
            }
            TrackerError::CommandFailed { args, stderr } => {
                write!(f, "tracker command `{}` failed: {stderr}", args.join(" "))
            }
            TrackerError::Parse(err) => write!(f, "failed to parse tracker response: {err}"),
        }
    }
}

impl std::error::Error for TrackerError {}

/// A comment on a work item, in tracker-native chronological order.
#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// The issue tracker this orchestrator polls and claims work items
/// from. One implementation (`GhTrackerAdapter`) ships; the trait
/// exists so a test double can stand in without a live repository.
/// `#[async_trait]` keeps this object-safe so the dispatcher can hold
/// it behind `Arc<dyn TrackerAdapter>`.
#[async_trait]
pub trait TrackerAdapter: Send + Sync {
    async fn list_open_items(&self) -> Result<Vec<WorkItem>, TrackerError>;
    async fn fetch_comments(&self, item_id: &str) -> Result<Vec<Comment>, TrackerError>;
    async fn fetch_details(&self, item_id: &str) -> Result<WorkItem, TrackerError>;
    /// Atomically transition `item_id` to `status`. Implementations
    /// must make this a single tracker-side mutation so concurrent
    /// workers cannot both observe success.
    async fn set_status(&self, item_id: &str, status: WorkItemStatus) -> Result<(), TrackerError>;
    async fn comment(&self, item_id: &str, body: &str) -> Result<(), TrackerError>;
    async fn label(&self, item_id: &str, label: &str) -> Result<(), TrackerError>;
}

/// `gh`-CLI backed tracker over a GitHub repository (`owner/repo`).
pub struct GhTrackerAdapter {
    repo: String,
    github_pat: Option<String>,
}

impl GhTrackerAdapter {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            github_pat: std::env::var("GITHUB_PAT").ok(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new("gh");
        command.args(args).stdin(Stdio::null());
        if let Some(pat) = &self.github_pat {
            command.env("GH_TOKEN", pat);
        }
        command
    }

    async fn run_json<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T, TrackerError> {
        let output = self
            .command(args)
            .output()
            .await
            .map_err(|_| TrackerError::CliNotFound)?;
        if !output.status.success() {
            return Err(TrackerError::CommandFailed {
                args: args.iter().map(|s| s.to_string()).collect(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        serde_json::from_slice(&output.stdout).map_err(TrackerError::Parse)
    }

    async fn run(&self, args: &[&str]) -> Result<(), TrackerError> {
        let output = self
            .command(args)
            .output()
            .await
            .map_err(|_| TrackerError::CliNotFound)?;
        if !output.status.success() {
            return Err(TrackerError::CommandFailed {
                args: args.iter().map(|s| s.to_string()).collect(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct GhIssueListItem {
    number: u64,
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Deserialize)]
struct GhIssueComments {
    #[serde(default)]
    comments: Vec<Comment>,
}

fn priority_from_labels(labels: &[GhLabel]) -> i64 {
    for label in labels {
        if let Some(rest) = label.name.strip_prefix("priority:") {
            if let Ok(n) = rest.parse::<i64>() {
                return n;
            }
        }
    }
    100
}

fn status_from_labels(labels: &[GhLabel]) -> WorkItemStatus {
    if labels.iter().any(|l| l.name == "blocked") {
        WorkItemStatus::Blocked
    } else if labels.iter().any(|l| l.name == "in_progress") {
        WorkItemStatus::InProgress
    } else {
        WorkItemStatus::Open
    }
}

fn blocked_by_from_body(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("Blocked-by:"))
        .flat_map(|rest| rest.split(','))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

#[async_trait]
impl TrackerAdapter for GhTrackerAdapter {
    async fn list_open_items(&self) -> Result<Vec<WorkItem>, TrackerError> {
        let items: Vec<GhIssueListItem> = self
            .run_json(&[
                "issue",
                "list",
                "--repo",
                &self.repo,
                "--state",
                "open",
                "--json",
                "number,title,body,labels,createdAt",
                "--limit",
                "1000",
            ])
            .await?;

        Ok(items
            .into_iter()
            .map(|item| WorkItem {
                id: item.number.to_string(),
                title: item.title,
                blocked_by: blocked_by_from_body(&item.body),
                priority: priority_from_labels(&item.labels),
                status: status_from_labels(&item.labels),
                assignee: None,
                latest_comment_token: None,
                created_at: item.created_at,
                body: item.body,
            })
            .collect())
    }

    async fn fetch_comments(&self, item_id: &str) -> Result<Vec<Comment>, TrackerError> {
        let response: GhIssueComments = self
            .run_json(&[
                "issue", "view", item_id, "--repo", &self.repo, "--json", "comments",
            ])
            .await?;
        let mut comments = response.comments;
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    async fn fetch_details(&self, item_id: &str) -> Result<WorkItem, TrackerError> {
        let item: GhIssueListItem = self
            .run_json(&[
                "issue",
                "view",
                item_id,
                "--repo",
                &self.repo,
                "--json",
                "number,title,body,labels,createdAt",
            ])
            .await?;
        Ok(WorkItem {
            id: item.number.to_string(),
            title: item.title,
            blocked_by: blocked_by_from_body(&item.body),
            priority: priority_from_labels(&item.labels),
            status: status_from_labels(&item.labels),
            assignee: None,
            latest_comment_token: None,
            created_at: item.created_at,
            body: item.body,
        })
    }

    async fn set_status(&self, item_id: &str, status: WorkItemStatus) -> Result<(), TrackerError> {
        let label = match status {
            WorkItemStatus::InProgress => "in_progress",
            WorkItemStatus::Blocked => "blocked",
            WorkItemStatus::Done => {
                return self.run(&["issue", "close", item_id, "--repo", &self.repo]).await;
            }
            WorkItemStatus::Open | WorkItemStatus::Ready => {
                return self
                    .run(&[
                        "issue", "edit", item_id, "--repo", &self.repo, "--remove-label",
                        "in_progress",
                    ])
                    .await;
            }
        };
        self.run(&[
            "issue", "edit", item_id, "--repo", &self.repo, "--add-label", label, "--add-assignee",
            "@me",
        ])
        .await
    }

    async fn comment(&self, item_id: &str, body: &str) -> Result<(), TrackerError> {
        self.run(&["issue", "comment", item_id, "--repo", &self.repo, "--body", body])
            .await
    }

    async fn label(&self, item_id: &str, label: &str) -> Result<(), TrackerError> {
        self.run(&["issue", "edit", item_id, "--repo", &self.repo, "--add-label", label])
            .await
    }
}
