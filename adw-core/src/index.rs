//! The dependency/memory index adapter: a thin client over an external
//! index process (queried as an opaque subprocess, one invocation per
//! question), with a soft timeout so a slow or absent index never
//! blocks a phase. Grounded on the original automation's
//! `hooks/utils/hook_helpers.py` `run_kotadb_*` family, which shells
//! out to a `kotadb` CLI and treats any failure as "no context" rather
//! than an error.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use adw_kernel::{DependentsContext, MemoryHit, MemoryHitKind};
use tokio::process::Command;
use tokio::time;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Adapter over an external dependency/memory index. A missing or
/// misbehaving index is never fatal: every method returns an empty
/// result on any failure rather than propagating an error, matching
/// the "log a warning, continue" behavior of the hooks this is
/// grounded on.
pub struct IndexAdapter {
    binary: String,
    timeout: Duration,
}

impl IndexAdapter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Direct (depth-1) dependents of `path`, per `kotadb deps <path>
    /// --format json --depth 1`.
    pub async fn dependents(&self, path: &Path) -> DependentsContext {
        let path_str = path.to_string_lossy().to_string();
        let output = self
            .run(&["deps", &path_str, "--format", "json", "--depth", "1"])
            .await;
        let dependents = output
            .and_then(|raw| serde_json::from_str::<DepsResponse>(&raw).ok())
            .map(|resp| resp.dependents)
            .unwrap_or_default();
        DependentsContext {
            path: path_str,
            dependents,
        }
    }

    pub async fn search_failures(&self, query: &str, limit: usize) -> Vec<MemoryHit> {
        self.search_memory(query, limit, "failures", MemoryHitKind::Failure).await
    }

    pub async fn search_decisions(&self, query: &str, limit: usize) -> Vec<MemoryHit> {
        self.search_memory(query, limit, "decisions", MemoryHitKind::Decision).await
    }

    async fn search_memory(
        &self,
        query: &str,
        limit: usize,
        collection: &str,
        kind: MemoryHitKind,
    ) -> Vec<MemoryHit> {
        let limit_str = limit.to_string();
        let output = self
            .run(&["search", collection, query, "--limit", &limit_str])
            .await;
        output
            .and_then(|raw| serde_json::from_str::<SearchResponse>(&raw).ok())
            .map(|resp| {
                resp.results
                    .into_iter()
                    .map(|hit| MemoryHit {
                        kind,
                        summary: hit.summary,
                        source_ref: hit.source_ref,
                        relevance: hit.relevance,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn run(&self, args: &[&str]) -> Option<String> {
        let invocation = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output();

        match time::timeout(self.timeout, invocation).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            _ => None,
        }
    }
}

#[derive(serde::Deserialize)]
struct DepsResponse {
    #[serde(default)]
    dependents: Vec<String>,
}

#[derive(serde::Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(serde::Deserialize)]
struct SearchHit {
    summary: String,
    source_ref: String,
    #[serde(default)]
    relevance: f64,
}
