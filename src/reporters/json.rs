//! JSON reporter
//!
//! Outputs reports as pretty-printed JSON for CI pipelines and `jq`.

use anyhow::Result;
use serde::Serialize;

/// Render any report type as JSON
pub fn render<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporters::tests::test_report;

    #[test]
    fn test_json_render_valid() {
        let report = test_report();
        let json_str = render(&report).expect("render JSON");
        let parsed: serde_json::Value = serde_json::from_str(&json_str).expect("parse JSON");
        assert_eq!(parsed["passed"], false);
        assert_eq!(parsed["overall_score"], 85);
        assert_eq!(parsed["findings"][0]["dimension"], "security");
        assert_eq!(parsed["findings"][0]["location"]["pointer"], "/resources/0");
        assert_eq!(parsed["tool_runs"][0]["status"], "timed-out");
        assert!(parsed["dimensions"][4]["score"].is_null());
    }

    #[test]
    fn test_json_round_trips() {
        let report = test_report();
        let json_str = render(&report).expect("render JSON");
        let back: crate::models::ValidationReport =
            serde_json::from_str(&json_str).expect("parse report");
        assert_eq!(back, report);
    }
}
