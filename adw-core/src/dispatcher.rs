//! The polling dispatcher (C5): on a fixed interval, lists open work
//! items, finds which ones are ready and qualify (no comments yet, or
//! the latest comment is an untriggered trigger token), claims the
//! highest-priority qualifying item atomically, and launches it through
//! the phase sequencer without waiting for it to finish. When a launch
//! finishes, its outcome is categorised by band and used to comment on
//! and possibly revert the item's tracker status. Grounded on the
//! original automation's `trigger_cron.py` — same qualification rule,
//! same "track what's already been triggered so a repeated poll is a
//! no-op", same signal-driven graceful shutdown (finish the current
//! cycle, stop claiming new work, let in-flight runs continue).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use adw_kernel::{Band, ExitCode, PhaseOutcome, WorkItem, WorkItemStatus};
use parking_lot::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::Config;
use crate::console::{ProgressEvent, ProgressKind};
use crate::tracker::{TrackerAdapter, TrackerError};

/// Shared flag a signal handler flips; the dispatcher checks it at the
/// top of every poll cycle and after every claim, never mid in-flight
/// run.
#[derive(Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a poll cycle did, for the CLI to print and for tests to
/// assert against.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub qualifying: Vec<String>,
    pub claimed: Vec<String>,
    pub skipped_already_triggered: Vec<String>,
}

/// Tracks, per work item, the last comment id this dispatcher already
/// acted on — the in-memory half of trigger idempotency. A work item
/// with no new comment since its last recorded id never re-qualifies.
#[derive(Default)]
pub struct TriggerLedger {
    last_seen_comment: HashMap<String, String>,
}

impl TriggerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn already_triggered(&self, item_id: &str, comment_token: &str) -> bool {
        self.last_seen_comment.get(item_id).map(String::as_str) == Some(comment_token)
    }

    pub fn record(&mut self, item_id: &str, comment_token: &str) {
        self.last_seen_comment
            .insert(item_id.to_string(), comment_token.to_string());
    }
}

/// Per-item count of consecutive resource-failure outcomes (spec.md
/// §7's "bounded attempts; after the bound, demote to blocker and mark
/// open" rule). Shared, via cheap clones, between poll cycles and the
/// spawned tasks doing outcome accounting for runs claimed in earlier
/// cycles.
#[derive(Clone, Default)]
pub struct ResourceRetryLedger(Arc<Mutex<HashMap<String, u32>>>);

impl ResourceRetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_failure(&self, item_id: &str) -> u32 {
        let mut map = self.0.lock();
        let count = map.entry(item_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn reset(&self, item_id: &str) {
        self.0.lock().remove(item_id);
    }
}

/// Generate a collision-free run id for `work_item_id`: a high-
/// resolution timestamp plus a random suffix, verified unique against
/// `<repo_path>/trees` before being handed back (spec.md §9's
/// resolution of the "run-id generation is under-specified" open
/// question). Returns `None` in the vanishingly unlikely case that
/// every candidate in the attempt budget already exists.
pub fn allocate_run_id(repo_path: &Path, work_item_id: &str) -> Option<String> {
    let trees_dir = repo_path.join("trees");
    for _ in 0..1000 {
        let candidate = format!(
            "{work_item_id}-{}-{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f"),
            uuid::Uuid::new_v4().simple()
        );
        if !trees_dir.join(&candidate).exists() {
            return Some(candidate);
        }
    }
    None
}

/// A work item qualifies for a run if it is ready (open, every
/// dependency in `blocked_by` reported done by `done_lookup`) and it
/// has never had a comment, or its latest comment is exactly the
/// configured trigger token and that comment hasn't already been acted
/// on.
pub fn qualifies(
    item: &WorkItem,
    trigger_token: &str,
    ledger: &TriggerLedger,
    done_lookup: impl FnMut(&str) -> bool,
) -> bool {
    if !item.is_ready(done_lookup) {
        return false;
    }
    match &item.latest_comment_token {
        None => true,
        Some(token) => {
            let triggered = token.trim().eq_ignore_ascii_case(trigger_token);
            triggered && !ledger.already_triggered(&item.id, token)
        }
    }
}

/// Order qualifying items by `(priority asc, created_at asc)` so the
/// dispatcher claims the highest-priority, oldest item first.
pub fn order_for_claim(mut items: Vec<WorkItem>) -> Vec<WorkItem> {
    items.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    items
}

/// Categorise a completed run's final exit code into the band the
/// dispatcher uses for its outcome accounting (spec.md §4.5).
pub fn outcome_band(code: i32) -> Option<Band> {
    ExitCode::from_raw(code).and_then(ExitCode::band)
}

/// Apply spec.md §4.5's outcome-accounting table to one finished run:
/// comment on the tracker item and, where the table calls for it,
/// transition its status. Resource failures are retried up to
/// `resource_retry_limit` consecutive times before being demoted to
/// `Blocked`; any other outcome resets that item's retry count.
async fn account_for_outcome(
    tracker: &dyn TrackerAdapter,
    item_id: &str,
    outcome: &PhaseOutcome,
    resource_retry_limit: u32,
    retries: &ResourceRetryLedger,
) {
    if outcome.is_success() {
        retries.reset(item_id);
        let _ = tracker
            .comment(item_id, &format!("adw: phase `{}` completed successfully.", outcome.phase))
            .await;
        return;
    }

    let description = outcome.exit_code().map(ExitCode::description).unwrap_or("unrecognised exit code");

    match outcome_band(outcome.code) {
        Some(Band::Blocker) => {
            retries.reset(item_id);
            let _ = tracker
                .comment(
                    item_id,
                    &format!(
                        "adw: phase `{}` hit a blocker ({description}, code {}); reverting to open.",
                        outcome.phase, outcome.code
                    ),
                )
                .await;
            let _ = tracker.set_status(item_id, WorkItemStatus::Open).await;
        }
        Some(Band::Resource) => {
            let attempts = retries.record_failure(item_id);
            if attempts > resource_retry_limit {
                retries.reset(item_id);
                let _ = tracker
                    .comment(
                        item_id,
                        &format!(
                            "adw: phase `{}` failed with a resource error ({description}, code {}) \
                             {attempts} times in a row, past the configured retry bound of \
                             {resource_retry_limit}; demoting to blocked.",
                            outcome.phase, outcome.code
                        ),
                    )
                    .await;
                let _ = tracker.set_status(item_id, WorkItemStatus::Blocked).await;
            } else {
                let _ = tracker
                    .comment(
                        item_id,
                        &format!(
                            "adw: phase `{}` failed with a resource error ({description}, code {}); \
                             attempt {attempts}/{resource_retry_limit}. Reverting to open for retry.",
                            outcome.phase, outcome.code
                        ),
                    )
                    .await;
                let _ = tracker.set_status(item_id, WorkItemStatus::Open).await;
            }
        }
        Some(Band::Validation) => {
            retries.reset(item_id);
            let _ = tracker
                .comment(
                    item_id,
                    &format!(
                        "adw: phase `{}` failed validation ({description}, code {}); still claimed, \
                         comment the trigger token to re-trigger once fixed.",
                        outcome.phase, outcome.code
                    ),
                )
                .await;
        }
        Some(Band::Execution) | None => {
            retries.reset(item_id);
            let _ = tracker
                .comment(
                    item_id,
                    &format!(
                        "adw: phase `{}` failed ({description}, code {}); still claimed, re-trigger advised.",
                        outcome.phase, outcome.code
                    ),
                )
                .await;
        }
    }
}

/// Run one poll cycle: fetch open items, resolve each item's
/// dependency statuses, determine which qualify, claim them in
/// priority order (stopping as soon as shutdown is requested), and
/// hand each claimed item to `launch`. `launch` returns a future that
/// the cycle spawns rather than awaits, so polling continues
/// concurrently with in-flight runs; once that future resolves, its
/// `PhaseOutcome` is run through [`account_for_outcome`].
pub async fn run_cycle<F, Fut>(
    tracker: &Arc<dyn TrackerAdapter>,
    config: &Config,
    ledger: &mut TriggerLedger,
    retries: &ResourceRetryLedger,
    shutdown: &ShutdownSignal,
    mut launch: F,
) -> Result<CycleReport, TrackerError>
where
    F: FnMut(WorkItem) -> Fut,
    Fut: std::future::Future<Output = PhaseOutcome> + Send + 'static,
{
    let mut report = CycleReport::default();
    if shutdown.requested() {
        return Ok(report);
    }

    let items = tracker.list_open_items().await?;

    let mut dep_ids = HashSet::new();
    for item in &items {
        dep_ids.extend(item.blocked_by.iter().cloned());
    }
    let mut dep_status = HashMap::new();
    for dep_id in dep_ids {
        if let Ok(details) = tracker.fetch_details(&dep_id).await {
            dep_status.insert(dep_id, details.status);
        }
    }

    let mut qualifying = Vec::new();
    for item in items {
        let done_lookup = |dep: &str| dep_status.get(dep).copied() == Some(WorkItemStatus::Done);
        if qualifies(&item, &config.trigger_token, ledger, done_lookup) {
            qualifying.push(item);
        }
    }
    report.qualifying = qualifying.iter().map(|item| item.id.clone()).collect();

    let resource_retry_limit = config.resource_retry_limit;
    let mut already_claimed = HashSet::new();

    for item in order_for_claim(qualifying) {
        if shutdown.requested() {
            break;
        }
        if already_claimed.contains(&item.id) {
            continue;
        }
        if tracker
            .set_status(&item.id, WorkItemStatus::InProgress)
            .await
            .is_err()
        {
            // Another worker won the race, or the tracker rejected the
            // transition; either way this item is not ours this cycle.
            continue;
        }
        already_claimed.insert(item.id.clone());
        if let Some(token) = &item.latest_comment_token {
            ledger.record(&item.id, token);
        }
        report.claimed.push(item.id.clone());

        let item_id = item.id.clone();
        let run_future = launch(item);
        let tracker_for_task = Arc::clone(tracker);
        let retries_for_task = retries.clone();
        tokio::spawn(async move {
            let outcome = run_future.await;
            account_for_outcome(
                tracker_for_task.as_ref(),
                &item_id,
                &outcome,
                resource_retry_limit,
                &retries_for_task,
            )
            .await;
        });
    }

    Ok(report)
}

/// Drive [`run_cycle`] on `config.poll_interval()` until `shutdown` is
/// requested, emitting a [`ProgressEvent`] per cycle over `progress`.
pub async fn run_forever<F, Fut>(
    tracker: Arc<dyn TrackerAdapter>,
    config: &Config,
    shutdown: ShutdownSignal,
    progress: Option<tokio::sync::mpsc::Sender<ProgressEvent>>,
    mut launch: F,
) where
    F: FnMut(WorkItem) -> Fut,
    Fut: std::future::Future<Output = PhaseOutcome> + Send + 'static,
{
    let mut ledger = TriggerLedger::new();
    let retries = ResourceRetryLedger::new();
    let mut ticker = interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if shutdown.requested() {
            break;
        }
        match run_cycle(&tracker, config, &mut ledger, &retries, &shutdown, &mut launch).await {
            Ok(report) => {
                if let Some(tx) = &progress {
                    let message = format!(
                        "cycle: {} qualifying, {} claimed",
                        report.qualifying.len(),
                        report.claimed.len()
                    );
                    let _ = tx.send(ProgressEvent::new(ProgressKind::Dispatcher, message)).await;
                }
            }
            Err(err) => {
                if let Some(tx) = &progress {
                    let _ = tx
                        .send(ProgressEvent::new(ProgressKind::Dispatcher, format!("poll cycle failed: {err}")))
                        .await;
                }
            }
        }
        if shutdown.requested() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: &str, priority: i64, comment: Option<&str>) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            title: "t".into(),
            body: "b".into(),
            priority,
            status: WorkItemStatus::Open,
            assignee: None,
            blocked_by: vec![],
            latest_comment_token: comment.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn item_with_no_comments_qualifies() {
        let ledger = TriggerLedger::new();
        assert!(qualifies(&item("1", 0, None), "adw", &ledger, |_| true));
    }

    #[test]
    fn matching_trigger_token_qualifies_once() {
        let mut ledger = TriggerLedger::new();
        let it = item("1", 0, Some("adw"));
        assert!(qualifies(&it, "adw", &ledger, |_| true));
        ledger.record("1", "adw");
        assert!(!qualifies(&it, "adw", &ledger, |_| true));
    }

    #[test]
    fn non_trigger_comment_does_not_qualify() {
        let ledger = TriggerLedger::new();
        assert!(!qualifies(&item("1", 0, Some("looks good")), "adw", &ledger, |_| true));
    }

    #[test]
    fn unmet_dependency_never_qualifies() {
        let ledger = TriggerLedger::new();
        let mut it = item("1", 0, None);
        it.blocked_by = vec!["2".to_string()];
        assert!(!qualifies(&it, "adw", &ledger, |_| false));
        assert!(qualifies(&it, "adw", &ledger, |_| true));
    }

    #[test]
    fn ordering_is_priority_then_created_at() {
        let mut a = item("a", 5, None);
        let mut b = item("b", 1, None);
        a.created_at = Utc::now();
        b.created_at = a.created_at;
        let ordered = order_for_claim(vec![a.clone(), b.clone()]);
        assert_eq!(ordered[0].id, "b");
        assert_eq!(ordered[1].id, "a");
    }

    #[test]
    fn resource_failures_retry_until_the_bound_then_demote() {
        let retries = ResourceRetryLedger::new();
        assert_eq!(retries.record_failure("1"), 1);
        assert_eq!(retries.record_failure("1"), 2);
        retries.reset("1");
        assert_eq!(retries.record_failure("1"), 1);
    }
}
