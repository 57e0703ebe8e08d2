//! Text (terminal) reporter with colors and formatting

use crate::fixes::{OptimizationResult, OptimizationState};
use crate::models::{Finding, Severity, ToolRunStatus, ValidationReport};
use anyhow::Result;

/// Severity colors
fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "\x1b[31m",   // Red
        Severity::Warning => "\x1b[33m", // Yellow
        Severity::Info => "\x1b[90m",    // Gray
    }
}

/// Reset ANSI color
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";

/// Findings shown before the list is cut off
const MAX_LISTED: usize = 25;

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "[E]",
        Severity::Warning => "[W]",
        Severity::Info => "[I]",
    }
}

/// Render report as formatted terminal output
pub fn render(report: &ValidationReport) -> Result<String> {
    let mut out = String::new();

    out.push_str(&format!("\n{BOLD}armvet validation{RESET}\n"));
    out.push_str(&format!(
        "{DIM}──────────────────────────────────────{RESET}\n"
    ));
    out.push_str(&format!(
        "Target: {} ({})\n",
        report.target.path.display(),
        report.target.kind
    ));
    let verdict = if report.passed {
        format!("{GREEN}{BOLD}PASS{RESET}")
    } else {
        format!("{RED}{BOLD}FAIL{RESET}")
    };
    out.push_str(&format!(
        "Score: {BOLD}{}/100{RESET}  Threshold: {}  Verdict: {}\n\n",
        report.overall_score, report.threshold, verdict
    ));

    // Dimension scores (compact)
    out.push_str(&format!("{BOLD}DIMENSIONS{RESET}\n "));
    for d in &report.dimensions {
        let score = match d.score {
            Some(score) => format_score(score),
            None => format!("{DIM}n/a{RESET}"),
        };
        out.push_str(&format!(" {}: {}", capitalize(d.dimension.as_str()), score));
    }
    out.push_str("\n\n");

    // Validators that did not produce a result
    let not_run: Vec<_> = report.tools_not_run().collect();
    if !report.tool_runs.is_empty() {
        out.push_str(&format!("{BOLD}VALIDATORS{RESET}\n"));
        for run in &report.tool_runs {
            let status = match run.status {
                ToolRunStatus::Completed => format!("{GREEN}completed{RESET}"),
                ToolRunStatus::Failed => format!("{RED}could not run{RESET}"),
                ToolRunStatus::TimedOut => format!("{RED}timed out{RESET}"),
                ToolRunStatus::Unparsable => format!("{RED}unreadable output{RESET}"),
            };
            out.push_str(&format!(
                "  {:<22} {}  {DIM}{} ms, {} attempt(s){}{RESET}\n",
                run.tool,
                status,
                run.duration_ms,
                run.attempts,
                if run.truncated { ", output truncated" } else { "" }
            ));
        }
        if !not_run.is_empty() {
            out.push_str(&format!(
                "  {DIM}{} validator(s) did not contribute to the score{RESET}\n",
                not_run.len()
            ));
        }
        out.push('\n');
    }

    let fs = &report.findings_summary;
    out.push_str(&format!("{BOLD}FINDINGS{RESET} ({} total)\n", fs.total));
    let mut summary_parts = Vec::new();
    if fs.error > 0 {
        summary_parts.push(format!("\x1b[31m{} error{RESET}", fs.error));
    }
    if fs.warning > 0 {
        summary_parts.push(format!("\x1b[33m{} warning{RESET}", fs.warning));
    }
    if fs.info > 0 {
        summary_parts.push(format!("\x1b[90m{} info{RESET}", fs.info));
    }
    if !summary_parts.is_empty() {
        out.push_str(&format!("  {}\n\n", summary_parts.join(" | ")));
    }

    for finding in report.findings.iter().take(MAX_LISTED) {
        out.push_str(&format_finding(finding));
    }
    let remaining = report.findings.len().saturating_sub(MAX_LISTED);
    if remaining > 0 {
        out.push_str(&format!(
            "\n  {DIM}...and {} more (use --format json for the full list){RESET}\n",
            remaining
        ));
    }
    out.push('\n');

    Ok(out)
}

/// Render the outcome of an optimization pass
pub fn render_optimization(result: &OptimizationResult) -> Result<String> {
    let mut out = render(&result.before)?;

    out.push_str(&format!("{BOLD}OPTIMIZATION{RESET} ({})\n", state_label(result.state)));
    match result.state {
        OptimizationState::NoFixAvailable => {
            out.push_str(&format!("  {DIM}No automatic fixes apply to these findings.{RESET}\n"));
        }
        OptimizationState::Proposed => {
            for action in &result.proposed {
                out.push_str(&format!(
                    "  {} {DIM}{} {}{RESET}\n",
                    action.action,
                    action.file.display(),
                    action.edit.pointer
                ));
            }
            out.push_str(&format!("\n  {DIM}Re-run with --apply to write these changes.{RESET}\n"));
        }
        _ => {
            for change in &result.changes {
                let before = change
                    .before
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "(unset)".to_string());
                out.push_str(&format!(
                    "  {GREEN}✓{RESET} {} {DIM}{} {}: {} -> {}{RESET}\n",
                    change.action,
                    change.file.display(),
                    change.pointer,
                    before,
                    change.after
                ));
            }
            if let Some(failure) = &result.write_failure {
                out.push_str(&format!(
                    "  {RED}✗{RESET} {} {DIM}{}: {}{RESET}\n",
                    failure.action,
                    failure.file.display(),
                    failure.reason
                ));
            }
            for action in &result.not_attempted {
                out.push_str(&format!("  {DIM}- {} (not attempted){RESET}\n", action.action));
            }
        }
    }

    if let (Some(after), Some(delta)) = (&result.after, result.delta()) {
        out.push_str(&format!(
            "\n  Score {} -> {BOLD}{}{RESET} ({:+}), {} finding(s) resolved, {} introduced. Verdict: {}\n",
            result.before.overall_score,
            after.overall_score,
            delta.score_change,
            delta.resolved.len(),
            delta.introduced.len(),
            if after.passed {
                format!("{GREEN}{BOLD}PASS{RESET}")
            } else {
                format!("{RED}{BOLD}FAIL{RESET}")
            }
        ));
    }
    out.push('\n');
    Ok(out)
}

fn state_label(state: OptimizationState) -> &'static str {
    match state {
        OptimizationState::Analyzed => "analyzed",
        OptimizationState::NoFixAvailable => "nothing to fix",
        OptimizationState::Proposed => "proposed",
        OptimizationState::Applying => "applying",
        OptimizationState::Reverified => "applied and re-verified",
        OptimizationState::PartiallyApplied => "partially applied",
        OptimizationState::Cancelled => "cancelled",
    }
}

fn format_finding(finding: &Finding) -> String {
    let sev_c = severity_color(finding.severity);
    let mut out = format!(
        "  {sev_c}{}{RESET} {BOLD}{}{RESET} {DIM}[{}/{}]{RESET}\n      {}\n",
        severity_tag(finding.severity),
        finding.rule,
        finding.source,
        finding.dimension,
        finding.message
    );
    if let Some(location) = format_location(finding) {
        out.push_str(&format!("      {DIM}at {}{RESET}\n", location));
    }
    if let Some(hint) = &finding.remediation {
        out.push_str(&format!("      {DIM}fix: {}{RESET}\n", hint));
    }
    out
}

fn format_location(finding: &Finding) -> Option<String> {
    let location = finding.location.as_ref()?;
    let mut text = location.file.display().to_string();
    if let Some(line) = location.line {
        text.push_str(&format!(":{}", line));
    }
    if let Some(pointer) = &location.pointer {
        text.push_str(&format!(" ({})", pointer));
    }
    Some(text)
}

fn format_score(score: u32) -> String {
    let color = if score >= 80 {
        "\x1b[32m"
    } else if score >= 60 {
        "\x1b[33m"
    } else {
        "\x1b[31m"
    };
    format!("{color}{}{RESET}", score)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporters::tests::test_report;

    #[test]
    fn test_text_render_shows_verdict_and_findings() {
        let report = test_report();
        let text = render(&report).unwrap();
        assert!(text.contains("FAIL"));
        assert!(text.contains("85/100"));
        assert!(text.contains("storage-https-only-missing"));
        assert!(text.contains("mainTemplate.json:12 (/resources/0)"));
        assert!(text.contains("Cost: \x1b[2mn/a"));
    }

    #[test]
    fn test_could_not_run_is_distinct() {
        let text = render(&test_report()).unwrap();
        assert!(text.contains("timed out"));
        assert!(text.contains("did not contribute to the score"));
    }

    #[test]
    fn test_long_lists_are_cut() {
        let mut report = test_report();
        let finding = report.findings[0].clone();
        report.findings = vec![finding; MAX_LISTED + 3];
        let text = render(&report).unwrap();
        assert!(text.contains("...and 3 more"));
    }
}
