//! Per-dimension penalty scorer

use crate::config::PolicyConfig;
use crate::models::{Dimension, DimensionScore, Finding, Severity};
use std::collections::BTreeSet;
use tracing::{debug, info};

const MAX_SCORE: u32 = 100;

/// Result of scoring one finding set
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    /// One entry per dimension, in `Dimension::ALL` order
    pub dimensions: Vec<DimensionScore>,
    pub overall: u32,
    pub threshold: u32,
    pub error_count: usize,
    pub passed: bool,
}

/// Scores findings against a borrowed policy
pub struct Scorer<'a> {
    policy: &'a PolicyConfig,
}

impl<'a> Scorer<'a> {
    pub fn new(policy: &'a PolicyConfig) -> Self {
        Self { policy }
    }

    /// Score a finding set over the covered dimensions
    pub fn score(&self, findings: &[Finding], covered: &BTreeSet<Dimension>) -> ScoreBreakdown {
        self.score_with_threshold(findings, covered, self.policy.threshold)
    }

    /// Same as [`Scorer::score`] with a caller-supplied pass threshold
    pub fn score_with_threshold(
        &self,
        findings: &[Finding],
        covered: &BTreeSet<Dimension>,
        threshold: u32,
    ) -> ScoreBreakdown {
        let mut covered = covered.clone();
        covered.extend(findings.iter().map(|f| f.dimension));

        let dimensions: Vec<DimensionScore> = Dimension::ALL
            .iter()
            .map(|&dimension| {
                let in_dimension: Vec<&Finding> =
                    findings.iter().filter(|f| f.dimension == dimension).collect();
                let score = covered
                    .contains(&dimension)
                    .then(|| self.dimension_score(&in_dimension));
                DimensionScore {
                    dimension,
                    score,
                    finding_count: in_dimension.len(),
                }
            })
            .collect();

        let overall = self.overall(&dimensions);
        let error_count = findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count();
        let passed = !covered.is_empty() && overall >= threshold && error_count == 0;

        for d in &dimensions {
            debug!(
                "{}: {:?} ({} findings)",
                d.dimension, d.score, d.finding_count
            );
        }
        info!(
            "Readiness score: {} (threshold {}, {} errors) - {}",
            overall,
            threshold,
            error_count,
            if passed { "pass" } else { "fail" }
        );

        ScoreBreakdown {
            dimensions,
            overall,
            threshold,
            error_count,
            passed,
        }
    }

    fn dimension_score(&self, findings: &[&Finding]) -> u32 {
        let penalty: u64 = findings
            .iter()
            .map(|f| u64::from(self.policy.penalties.penalty(f.severity)))
            .sum();
        u64::from(MAX_SCORE).saturating_sub(penalty) as u32
    }

    /// Weighted average renormalized over the scored dimensions. If every
    /// scored dimension has weight 0 the plain mean is used instead.
    fn overall(&self, dimensions: &[DimensionScore]) -> u32 {
        let scored: Vec<(f64, f64)> = dimensions
            .iter()
            .filter_map(|d| {
                d.score
                    .map(|s| (f64::from(s), self.policy.weights.weight(d.dimension)))
            })
            .collect();
        if scored.is_empty() {
            return 0;
        }

        let weight_sum: f64 = scored.iter().map(|(_, w)| w).sum();
        let average = if weight_sum > 0.0 {
            scored.iter().map(|(s, w)| s * w).sum::<f64>() / weight_sum
        } else {
            scored.iter().map(|(s, _)| s).sum::<f64>() / scored.len() as f64
        };
        (average.round() as u32).min(MAX_SCORE)
    }
}

/// Score with the policy's own threshold
pub fn compute_score(
    policy: &PolicyConfig,
    findings: &[Finding],
    covered: &BTreeSet<Dimension>,
) -> ScoreBreakdown {
    Scorer::new(policy).score(findings, covered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity, dimension: Dimension) -> Finding {
        Finding::new("rule", "builtin", severity, dimension, "message")
    }

    fn all() -> BTreeSet<Dimension> {
        Dimension::ALL.into_iter().collect()
    }

    #[test]
    fn test_no_findings_is_perfect() {
        let policy = PolicyConfig::default();
        let result = compute_score(&policy, &[], &all());
        assert_eq!(result.overall, 100);
        assert!(result.passed);
        assert!(result.dimensions.iter().all(|d| d.score == Some(100)));
    }

    #[test]
    fn test_penalties_and_floor() {
        let policy = PolicyConfig::default();
        let findings = vec![
            finding(Severity::Warning, Dimension::Structure),
            finding(Severity::Info, Dimension::Structure),
            finding(Severity::Error, Dimension::Security),
            finding(Severity::Error, Dimension::Security),
            finding(Severity::Error, Dimension::Security),
            finding(Severity::Error, Dimension::Security),
            finding(Severity::Error, Dimension::Security),
        ];
        let result = compute_score(&policy, &findings, &all());
        let score = |d| {
            result
                .dimensions
                .iter()
                .find(|s| s.dimension == d)
                .and_then(|s| s.score)
        };
        assert_eq!(score(Dimension::Structure), Some(94));
        assert_eq!(score(Dimension::Security), Some(0));
        assert_eq!(result.error_count, 5);
        assert!(!result.passed);
    }

    #[test]
    fn test_weighted_average() {
        let policy = PolicyConfig::default();
        // security 75, everything else 100: 0.35 * 75 + 0.65 * 100 = 91.25
        let result = compute_score(&policy, &[finding(Severity::Error, Dimension::Security)], &all());
        assert_eq!(result.overall, 91);
        // High average, but an error always blocks.
        assert!(!result.passed);
    }

    #[test]
    fn test_uncovered_dimensions_excluded() {
        let policy = PolicyConfig::default();
        let covered = BTreeSet::from([Dimension::Structure]);
        let result = compute_score(&policy, &[finding(Severity::Warning, Dimension::Structure)], &covered);
        assert_eq!(result.overall, 95);
        let security = result
            .dimensions
            .iter()
            .find(|d| d.dimension == Dimension::Security)
            .unwrap();
        assert_eq!(security.score, None);
    }

    #[test]
    fn test_finding_outside_covered_set_counts() {
        let policy = PolicyConfig::default();
        let covered = BTreeSet::from([Dimension::Structure]);
        let result = compute_score(&policy, &[finding(Severity::Warning, Dimension::Cost)], &covered);
        // structure 100 (0.20), cost 95 (0.10) -> 98.33
        assert_eq!(result.overall, 98);
        assert!(result.dimensions.iter().any(|d| d.dimension == Dimension::Cost && d.score == Some(95)));
    }

    #[test]
    fn test_empty_coverage_fails() {
        let policy = PolicyConfig::default();
        let result = compute_score(&policy, &[], &BTreeSet::new());
        assert_eq!(result.overall, 0);
        assert!(!result.passed);
        assert!(result.dimensions.iter().all(|d| d.score.is_none()));
    }

    #[test]
    fn test_threshold_applies() {
        let policy = PolicyConfig::default();
        let findings: Vec<Finding> = (0..5)
            .map(|_| finding(Severity::Warning, Dimension::Security))
            .collect();
        // security 75 -> 91
        let scorer = Scorer::new(&policy);
        assert!(scorer.score_with_threshold(&findings, &all(), 90).passed);
        assert!(!scorer.score_with_threshold(&findings, &all(), 92).passed);
    }

    #[test]
    fn test_zero_weights_fall_back_to_mean() {
        let mut policy = PolicyConfig::default();
        policy.weights.structure = 0.0;
        let covered = BTreeSet::from([Dimension::Structure]);
        let result = compute_score(&policy, &[finding(Severity::Warning, Dimension::Structure)], &covered);
        assert_eq!(result.overall, 95);
    }

    #[test]
    fn test_deterministic() {
        let policy = PolicyConfig::default();
        let findings = vec![
            finding(Severity::Warning, Dimension::Compliance),
            finding(Severity::Info, Dimension::Cost),
            finding(Severity::Error, Dimension::Structure),
        ];
        let first = compute_score(&policy, &findings, &all());
        for _ in 0..10 {
            assert_eq!(compute_score(&policy, &findings, &all()), first);
        }
    }

    #[test]
    fn test_adding_error_never_raises_dimension_score() {
        let policy = PolicyConfig::default();
        let mut findings = Vec::new();
        for dimension in Dimension::ALL {
            let mut previous = compute_score(&policy, &findings, &all());
            for _ in 0..6 {
                findings.push(finding(Severity::Error, dimension));
                let next = compute_score(&policy, &findings, &all());
                for (before, after) in previous.dimensions.iter().zip(&next.dimensions) {
                    assert!(after.score <= before.score);
                }
                assert!(next.overall <= previous.overall);
                previous = next;
            }
        }
    }
}
