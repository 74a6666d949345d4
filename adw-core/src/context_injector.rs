//! Context injection (C4): before a phase touches a file, or before it
//! spawns a sub-agent, surface dependency and memory context so the
//! phase doesn't repeat a documented past mistake or miss a caller.
//! Every query here has a soft timeout via [`crate::index::IndexAdapter`]
//! and is formatted to a plain advisory string; nothing here can fail
//! the calling phase.
//!
//! Grounded on the original automation's `pre-edit-context.py`
//! (dependents alert on edit), `agent-context.py` (file-path extraction
//! from a spawn prompt, dependents alert per file), and
//! `memory-recall.py` (failures + decisions search keyed off the edited
//! path).

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::index::IndexAdapter;

const DEPENDENTS_ALERT_CAP: usize = 10;
const AGENT_SPAWN_FILE_CAP: usize = 5;
const AGENT_SPAWN_DEPENDENTS_CAP: usize = 15;
const MEMORY_HITS_PER_KIND: usize = 5;

static FILE_PATH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"[A-Za-z0-9_./-]+\.(?:ts|tsx|js|jsx|py|rs|go|java|rb)").unwrap(),
        Regex::new(r"src/[A-Za-z0-9_./-]+").unwrap(),
        Regex::new(r"app/[A-Za-z0-9_./-]+").unwrap(),
        Regex::new(r"tests?/[A-Za-z0-9_./-]+").unwrap(),
        Regex::new(r"lib/[A-Za-z0-9_./-]+").unwrap(),
    ]
});

/// Extract up to [`AGENT_SPAWN_FILE_CAP`] distinct file-looking paths
/// from free-form agent-spawn prompt text.
pub fn extract_file_paths(text: &str) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    for pattern in FILE_PATH_PATTERNS.iter() {
        for candidate in pattern.find_iter(text) {
            let cleaned = candidate.as_str().trim_matches(['.', '/']).to_string();
            if !cleaned.is_empty() && !cleaned.starts_with('.') {
                seen.insert(cleaned);
            }
        }
    }
    seen.into_iter().take(AGENT_SPAWN_FILE_CAP).collect()
}

/// Before an Edit/Write-equivalent phase action on `path`: if the path
/// has dependents, format an alert a phase can fold into its context.
/// Returns `None` if the index has nothing to say, which a caller
/// treats identically to an index failure.
pub async fn pre_edit_dependents_alert(index: &IndexAdapter, path: &Path) -> Option<String> {
    let context = index.dependents(path).await;
    if context.dependents.is_empty() {
        return None;
    }
    let shown: Vec<&str> = context
        .dependents
        .iter()
        .take(DEPENDENTS_ALERT_CAP)
        .map(String::as_str)
        .collect();
    let omitted = context.dependents.len().saturating_sub(shown.len());
    let mut alert = format!(
        "{} file(s) depend on {}:\n  {}",
        context.dependents.len(),
        context.path,
        shown.join("\n  ")
    );
    if omitted > 0 {
        alert.push_str(&format!("\n  ...and {omitted} more"));
    }
    Some(alert)
}

/// Before spawning a sub-agent with `prompt`: pull dependents for every
/// file path mentioned in the prompt, capped across all files
/// combined.
pub async fn pre_spawn_agent_context(index: &IndexAdapter, prompt: &str) -> Option<String> {
    let paths = extract_file_paths(prompt);
    if paths.is_empty() {
        return None;
    }

    let mut sections = Vec::new();
    let mut total_shown = 0usize;
    for path in &paths {
        if total_shown >= AGENT_SPAWN_DEPENDENTS_CAP {
            break;
        }
        let context = index.dependents(Path::new(path)).await;
        if context.dependents.is_empty() {
            continue;
        }
        let remaining = AGENT_SPAWN_DEPENDENTS_CAP - total_shown;
        let shown: Vec<&str> = context
            .dependents
            .iter()
            .take(remaining)
            .map(String::as_str)
            .collect();
        total_shown += shown.len();
        sections.push(format!("{}:\n  {}", context.path, shown.join("\n  ")));
    }

    if sections.is_empty() {
        None
    } else {
        Some(format!(
            "Dependency context for files mentioned in this task:\n\n{}",
            sections.join("\n\n")
        ))
    }
}

/// Before an edit at `path`: search recorded failures and decisions for
/// terms drawn from the path, and format whatever is found.
pub async fn memory_recall(index: &IndexAdapter, path: &Path) -> Option<String> {
    let query = search_terms_from_path(path);
    if query.is_empty() {
        return None;
    }
    let query = query.join(" ");

    let failures = index.search_failures(&query, MEMORY_HITS_PER_KIND).await;
    let decisions = index.search_decisions(&query, MEMORY_HITS_PER_KIND).await;
    if failures.is_empty() && decisions.is_empty() {
        return None;
    }

    let mut out = String::new();
    if !failures.is_empty() {
        out.push_str("Related past failures:\n");
        for hit in &failures {
            out.push_str(&format!("  - {} ({})\n", hit.summary, hit.source_ref));
        }
    }
    if !decisions.is_empty() {
        out.push_str("Related prior decisions:\n");
        for hit in &decisions {
            out.push_str(&format!("  - {} ({})\n", hit.summary, hit.source_ref));
        }
    }
    Some(out.trim_end().to_string())
}

/// Split a path into lowercase word-like components, dropping very
/// short or purely-numeric ones, to use as a memory-search query.
fn search_terms_from_path(path: &Path) -> Vec<String> {
    path.to_string_lossy()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| term.len() > 2 && !term.chars().all(|c| c.is_ascii_digit()))
        .map(|term| term.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_capped_distinct_file_paths() {
        let prompt = "Implement feature X in src/api/routes.ts and update tests/api.test.ts, \
                      also touch lib/helpers.py, app/main.go, src/util.rs, and README too";
        let paths = extract_file_paths(prompt);
        assert!(paths.len() <= AGENT_SPAWN_FILE_CAP);
        assert!(paths.iter().any(|p| p.contains("routes.ts")));
    }

    #[test]
    fn search_terms_drop_short_and_numeric_components() {
        let terms = search_terms_from_path(Path::new("src/api/v2/routes.ts"));
        assert!(terms.contains(&"routes".to_string()));
        assert!(!terms.contains(&"v2".to_string()) || terms.iter().all(|t| t != "2"));
    }
}
