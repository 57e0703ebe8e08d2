//! Validate command

use super::{create_spinner_style, EXIT_FAIL, EXIT_PASS};
use crate::config::{PolicyConfig, UserConfig};
use crate::models::{ArtifactKind, ValidationReport};
use crate::pipeline::ValidationPipeline;
use crate::reporters::{render_report, render_reports, OutputFormat};
use anyhow::{bail, Context, Result};
use console::{style, Term};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn run(
    policy: &PolicyConfig,
    paths: &[PathBuf],
    kind: Option<ArtifactKind>,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<i32> {
    if kind.is_some() && paths.len() > 1 {
        bail!("--kind applies to a single path; got {}", paths.len());
    }

    let user = UserConfig::load();
    let pipeline = ValidationPipeline::new(policy, &user)?;
    let cancel = CancellationToken::new();

    let spinner = (format == OutputFormat::Text && Term::stderr().is_term()).then(|| {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(create_spinner_style());
        spinner.set_message(format!("Validating {} target(s)...", paths.len()));
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    });

    let results = if paths.len() == 1 {
        vec![pipeline.validate(&paths[0], kind, &cancel)]
    } else {
        pipeline.validate_many(paths, &cancel)
    };

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let reports = results.into_iter().collect::<Result<Vec<ValidationReport>, _>>()?;
    let rendered = match reports.as_slice() {
        [report] => render_report(report, format)?,
        _ => render_reports(&reports, format)?,
    };

    match output {
        Some(file) => {
            std::fs::write(file, console::strip_ansi_codes(&rendered).as_bytes())
                .with_context(|| format!("Failed to write report to {}", file.display()))?;
            eprintln!(
                "{} Report written to {}",
                style("✓").green(),
                style(file.display()).cyan()
            );
        }
        None => print!("{}", rendered),
    }

    let passed = reports.iter().all(|r| r.passed);
    info!(
        "{} of {} target(s) passed",
        reports.iter().filter(|r| r.passed).count(),
        reports.len()
    );
    Ok(if passed { EXIT_PASS } else { EXIT_FAIL })
}
