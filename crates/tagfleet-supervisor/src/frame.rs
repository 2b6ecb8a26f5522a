//! The `HEALTH|<json>` wire frame workers emit on their stdout pipe.
//!
//! The reference implementation hands frames across a `multiprocessing`
//! pipe that pickles Python objects; a portable equivalent needs explicit
//! framing. We use newline-delimited `HEALTH|<json>` lines, one of the two
//! framings the protocol explicitly allows.

use serde::{Deserialize, Serialize};

pub const HEALTH_FRAME_PREFIX: &str = "HEALTH|";

/// A parsed health frame. `status` is left as a string rather than
/// [`tagfleet_core::health::ComponentStatus`] because the wire protocol only
/// recognizes `"healthy"` and `"recovering"` as meaningful; every other value
/// (including ones a future worker might emit) is accepted and ignored by the
/// monitor rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthFrame {
    pub component_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recover_for_s: Option<f64>,
}

impl HealthFrame {
    #[must_use]
    pub fn healthy(component_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            status: "healthy".to_string(),
            recover_for_s: None,
        }
    }

    #[must_use]
    pub fn recovering(component_id: impl Into<String>, recover_for_s: Option<f64>) -> Self {
        Self {
            component_id: component_id.into(),
            status: "recovering".to_string(),
            recover_for_s,
        }
    }

    /// Encode as a single `HEALTH|<json>` line, without the trailing newline
    /// (callers writing to a pipe add that).
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{HEALTH_FRAME_PREFIX}{}",
            serde_json::to_string(self).expect("HealthFrame always serializes")
        )
    }
}

/// Parse one line of pipe output. Returns `None` (dropped, logged by the
/// caller) for anything not prefixed with `HEALTH|` or not valid JSON —
/// never an error, per the protocol's "drop silently after a warn" rule.
#[must_use]
pub fn parse_frame(line: &str) -> Option<HealthFrame> {
    let json_str = line.trim_end().strip_prefix(HEALTH_FRAME_PREFIX)?;
    serde_json::from_str(json_str).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_and_parse() {
        let frame = HealthFrame::healthy("worker:tag:0");
        let parsed = parse_frame(&frame.encode()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn recovering_frame_carries_recover_for_s() {
        let frame = HealthFrame::recovering("worker:tag:1", Some(30.0));
        let line = frame.encode();
        assert!(line.contains("recover_for_s"));
        let parsed = parse_frame(&line).unwrap();
        assert_eq!(parsed.recover_for_s, Some(30.0));
    }

    #[test]
    fn missing_prefix_is_dropped() {
        assert!(parse_frame(r#"{"component_id":"x","status":"healthy"}"#).is_none());
    }

    #[test]
    fn malformed_json_is_dropped() {
        assert!(parse_frame("HEALTH|{not json").is_none());
    }

    #[test]
    fn trailing_newline_is_tolerated() {
        let frame = HealthFrame::healthy("worker:tag:2");
        let line = format!("{}\n", frame.encode());
        assert_eq!(parse_frame(&line).unwrap(), frame);
    }

    #[test]
    fn unknown_status_value_still_parses() {
        // The monitor ignores anything but healthy/recovering, but parsing
        // itself must not reject it — that decision lives in the monitor.
        let line = r#"HEALTH|{"component_id":"x","status":"booting"}"#;
        let parsed = parse_frame(line).unwrap();
        assert_eq!(parsed.status, "booting");
    }
}
