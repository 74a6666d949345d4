//! Cross-process-shaped coverage of the orchestrator guard (C4):
//! context detection, the atomic state-file write, and totality of the
//! block/continue decision (property 4 — every tool call yields
//! exactly one of Continue or Block, never neither).

use adw_core::guard::{
    detect_orchestrator_context, evaluate_tool_call, read_orchestrator_context, ContextStateFile,
    GuardDecision, ALLOWED_TOOLS, BLOCKED_TOOLS,
};

#[test]
fn every_known_tool_resolves_to_exactly_one_decision_variant() {
    for tool in BLOCKED_TOOLS.iter().chain(ALLOWED_TOOLS.iter()) {
        let decision = evaluate_tool_call(tool, Some("src/lib.rs"), Some("plan-phase"));
        match decision {
            GuardDecision::Continue | GuardDecision::Block(_) => {}
        }
        if BLOCKED_TOOLS.contains(tool) {
            assert!(matches!(decision, GuardDecision::Block(_)), "{tool} should be blocked");
        } else {
            assert_eq!(decision, GuardDecision::Continue, "{tool} should be allowed");
        }
    }
}

#[test]
fn state_file_survives_a_second_reader_opening_the_same_path() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("orchestrator_context.json");

    let writer = ContextStateFile::new(&path);
    writer.activate("plan-phase", "/plan build the thing").unwrap();

    // A second handle over the same path, as a separate process would
    // open it, must observe the write.
    let reader = ContextStateFile::new(&path);
    assert_eq!(read_orchestrator_context(&reader), Some("plan-phase".to_string()));

    writer.clear().unwrap();
    assert_eq!(read_orchestrator_context(&reader), None);
}

#[test]
fn unrecognised_prompts_never_activate_context() {
    assert_eq!(detect_orchestrator_context("refactor the parser please"), None);
    assert_eq!(detect_orchestrator_context(""), None);
}
