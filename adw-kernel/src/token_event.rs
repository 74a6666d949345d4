//! `TokenUsageEvent`: the structured accounting record a phase script
//! emits over stdout as a `TOKEN_EVENT:<json>` line (spec.md §6).
//! Append-only, parsed verbatim; cost/pricing arithmetic is explicitly
//! out of scope here (spec.md §1) — `cost_usd` is whatever the phase
//! script already computed, passed through unchanged.

use serde::{Deserialize, Serialize};

pub const TOKEN_EVENT_PREFIX: &str = "TOKEN_EVENT:";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenUsageEvent {
    pub adw_id: String,
    pub phase: String,
    pub agent: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TokenUsageEvent {
    /// Parse a single stdout line. Returns `None` unless the line starts
    /// with [`TOKEN_EVENT_PREFIX`]; returns `Err` if the prefix is
    /// present but the payload is not valid JSON for this shape, so a
    /// caller can tell "not a token line" from "malformed token line".
    pub fn parse_line(line: &str) -> Option<Result<TokenUsageEvent, serde_json::Error>> {
        let payload = line.strip_prefix(TOKEN_EVENT_PREFIX)?;
        Some(serde_json::from_str(payload.trim()))
    }

    pub fn to_line(&self) -> String {
        format!(
            "{TOKEN_EVENT_PREFIX}{}",
            serde_json::to_string(self).expect("TokenUsageEvent always serialises")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TokenUsageEvent {
        TokenUsageEvent {
            adw_id: "run-1".into(),
            phase: "build".into(),
            agent: "claude".into(),
            input_tokens: 100,
            output_tokens: 50,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            cost_usd: Some(0.0012),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn passthrough_round_trip_preserves_fields() {
        let event = sample();
        let line = event.to_line();
        let parsed = TokenUsageEvent::parse_line(&line)
            .expect("should be a token line")
            .expect("should parse");
        assert_eq!(parsed, event);
    }

    #[test]
    fn non_token_lines_are_ignored() {
        assert!(TokenUsageEvent::parse_line("plain log line").is_none());
    }

    #[test]
    fn malformed_token_lines_surface_as_error() {
        let result = TokenUsageEvent::parse_line("TOKEN_EVENT:{not json");
        assert!(matches!(result, Some(Err(_))));
    }
}
