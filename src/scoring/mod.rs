//! Marketplace readiness scoring
//!
//! Scores an artifact per dimension from its findings and combines the
//! covered dimensions into one overall score.
//!
//! # Scoring Formula
//!
//! ```text
//! Dimension = max(0, 100 - Σ penalty(severity))   (findings in that dimension)
//! Overall   = round( Σ Dimension × weight / Σ weight )   (covered dimensions only)
//! Pass      = Overall ≥ threshold  AND  no error findings
//! ```
//!
//! # Default Penalties
//!
//! - Error: 25
//! - Warning: 5
//! - Info: 1
//!
//! # Coverage
//!
//! A dimension is scored only when a check or a completed validator
//! covered it, or a finding landed in it. Everything else is reported as
//! `None` and left out of the average, so an artifact is never rewarded
//! for checks that did not run. No coverage at all scores 0 and fails.

mod dimension_scorer;

pub use dimension_scorer::{compute_score, ScoreBreakdown, Scorer};
