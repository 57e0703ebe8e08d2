//! Optimize command

use super::{create_spinner_style, EXIT_CANCELLED, EXIT_FAIL, EXIT_PASS};
use crate::config::{PolicyConfig, UserConfig};
use crate::fixes::{OptimizationState, Optimizer};
use crate::models::ArtifactKind;
use crate::pipeline::ValidationPipeline;
use crate::reporters::{render_optimization, OutputFormat};
use anyhow::Result;
use console::Term;
use indicatif::ProgressBar;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn run(
    policy: &PolicyConfig,
    path: &Path,
    kind: Option<ArtifactKind>,
    apply: bool,
    format: OutputFormat,
) -> Result<i32> {
    let user = UserConfig::load();
    let pipeline = ValidationPipeline::new(policy, &user)?;
    let optimizer = Optimizer::new(&pipeline);
    let cancel = CancellationToken::new();

    let spinner = (format == OutputFormat::Text && Term::stderr().is_term()).then(|| {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(create_spinner_style());
        spinner.set_message(if apply {
            "Applying fixes..."
        } else {
            "Looking for fixes..."
        });
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    });

    let result = optimizer.optimize(path, kind, apply, &cancel);

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let result = result?;
    print!("{}", render_optimization(&result, format)?);

    Ok(if result.state == OptimizationState::Cancelled {
        EXIT_CANCELLED
    } else if result.final_report().passed {
        EXIT_PASS
    } else {
        EXIT_FAIL
    })
}
