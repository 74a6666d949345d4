//! Property-level coverage of the dispatcher's qualification,
//! ordering, and trigger-idempotency rules (S3/S4, properties 4-5).

use chrono::{Duration, Utc};

use adw_core::dispatcher::{order_for_claim, qualifies, TriggerLedger};
use adw_kernel::{WorkItem, WorkItemStatus};

fn item(id: &str, priority: i64, status: WorkItemStatus, comment: Option<&str>) -> WorkItem {
    WorkItem {
        id: id.to_string(),
        title: format!("item {id}"),
        body: String::new(),
        priority,
        status,
        assignee: None,
        blocked_by: vec![],
        latest_comment_token: comment.map(str::to_string),
        created_at: Utc::now(),
    }
}

#[test]
fn closed_or_in_progress_items_never_qualify() {
    let ledger = TriggerLedger::new();
    let in_progress = item("1", 0, WorkItemStatus::InProgress, None);
    let blocked = item("2", 0, WorkItemStatus::Blocked, None);
    assert!(!qualifies(&in_progress, "adw", &ledger, |_| true));
    assert!(!qualifies(&blocked, "adw", &ledger, |_| true));
}

#[test]
fn trigger_token_is_case_insensitive_and_idempotent() {
    let mut ledger = TriggerLedger::new();
    let triggered = item("7", 0, WorkItemStatus::Open, Some("ADW"));
    assert!(qualifies(&triggered, "adw", &ledger, |_| true));

    // Simulate the dispatcher recording this comment as acted on; a
    // second poll cycle over the same unchanged item must not
    // re-qualify it (property 5: trigger idempotency).
    ledger.record("7", "ADW");
    assert!(!qualifies(&triggered, "adw", &ledger, |_| true));
}

#[test]
fn a_distinct_later_comment_requalifies_the_same_item() {
    let mut ledger = TriggerLedger::new();
    ledger.record("7", "adw-comment-1");
    let repeated = item("7", 0, WorkItemStatus::Open, Some("adw-comment-1"));
    assert!(!qualifies(&repeated, "adw-comment-1", &ledger, |_| true));

    let new_comment = item("7", 0, WorkItemStatus::Open, Some("adw"));
    assert!(qualifies(&new_comment, "adw", &ledger, |_| true));
}

#[test]
fn an_item_with_an_unmet_dependency_never_qualifies() {
    let ledger = TriggerLedger::new();
    let mut blocked_on_dep = item("8", 0, WorkItemStatus::Open, None);
    blocked_on_dep.blocked_by = vec!["7".to_string()];
    assert!(!qualifies(&blocked_on_dep, "adw", &ledger, |_| false));
    assert!(qualifies(&blocked_on_dep, "adw", &ledger, |dep| dep == "7"));
}

#[test]
fn claim_order_is_priority_then_age_and_is_stable_across_runs() {
    let now = Utc::now();
    let high_priority_new = {
        let mut i = item("a", 1, WorkItemStatus::Open, None);
        i.created_at = now;
        i
    };
    let low_priority_old = {
        let mut i = item("b", 9, WorkItemStatus::Open, None);
        i.created_at = now - Duration::hours(5);
        i
    };
    let high_priority_old = {
        let mut i = item("c", 1, WorkItemStatus::Open, None);
        i.created_at = now - Duration::hours(1);
        i
    };

    let ordered = order_for_claim(vec![
        high_priority_new.clone(),
        low_priority_old.clone(),
        high_priority_old.clone(),
    ]);

    assert_eq!(ordered[0].id, "c"); // priority 1, oldest of the priority-1 pair
    assert_eq!(ordered[1].id, "a"); // priority 1, newer
    assert_eq!(ordered[2].id, "b"); // priority 9, last regardless of age
}
