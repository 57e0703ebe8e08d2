//! Optimization engine
//!
//! Turns built-in findings into safe, idempotent JSON edits and verifies
//! the result through the full pipeline.
//!
//! ```text
//! Analyzed ──► NoFixAvailable
//!    │
//!    └──► Proposed ──(apply)──► Applying ──► Reverified
//!                                   │
//!                                   ├──(write failed)──► PartiallyApplied
//!                                   │
//!                                   └──(cancelled)─────► Cancelled
//! ```
//!
//! Nothing is written unless the caller asks for it and every write is
//! atomic. A run that wrote anything ends with a fresh report, or with
//! `Cancelled` and the list of changes already on disk.

pub mod actions;
mod writer;

pub use actions::{ActionKind, Edit};
pub use writer::{ArtifactWriter, AtomicWriter};

use crate::checks::{package, read_artifact, BUILTIN_SOURCE};
use crate::input::{sanitize_for_display, CanonicalPath};
use crate::models::{ArtifactKind, ReportDelta, ValidationReport};
use crate::pipeline::{PipelineError, ValidationPipeline};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizationState {
    Analyzed,
    NoFixAvailable,
    Proposed,
    Applying,
    Reverified,
    PartiallyApplied,
    /// Interrupted after writing; `after` is not set
    Cancelled,
}

/// An action matched to one finding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposedAction {
    pub action: ActionKind,
    /// The finding this action resolves
    pub finding_id: String,
    /// File as shown in the finding
    pub file: PathBuf,
    pub edit: Edit,
    #[serde(skip)]
    path: PathBuf,
}

/// A value changed on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub action: ActionKind,
    pub file: PathBuf,
    pub pointer: String,
    pub before: Option<JsonValue>,
    pub after: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteFailure {
    pub action: ActionKind,
    pub file: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub state: OptimizationState,
    pub before: ValidationReport,
    /// Re-verified report; `None` when nothing was applied
    pub after: Option<ValidationReport>,
    pub proposed: Vec<ProposedAction>,
    pub applied: Vec<ProposedAction>,
    pub not_attempted: Vec<ProposedAction>,
    pub changes: Vec<Change>,
    pub write_failure: Option<WriteFailure>,
}

impl OptimizationResult {
    /// The most recent report of the artifact
    pub fn final_report(&self) -> &ValidationReport {
        self.after.as_ref().unwrap_or(&self.before)
    }

    pub fn delta(&self) -> Option<ReportDelta> {
        self.after.as_ref().map(|after| after.delta_from(&self.before))
    }
}

/// Proposes and applies fixes, re-verifying through a pipeline
pub struct Optimizer<'p, 'a> {
    pipeline: &'p ValidationPipeline<'a>,
    writer: Box<dyn ArtifactWriter>,
}

impl<'p, 'a> Optimizer<'p, 'a> {
    pub fn new(pipeline: &'p ValidationPipeline<'a>) -> Self {
        Self {
            pipeline,
            writer: Box::new(AtomicWriter),
        }
    }

    pub fn with_writer(mut self, writer: Box<dyn ArtifactWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Analyze a target and, when `apply` is set, fix what the catalog can
    pub fn optimize(
        &self,
        raw: &Path,
        kind: Option<ArtifactKind>,
        apply: bool,
        cancel: &CancellationToken,
    ) -> Result<OptimizationResult, PipelineError> {
        let path = self.pipeline.guard().validate_path(raw)?;
        let before = self.pipeline.validate_canonical(&path, kind, cancel)?;
        let mut state = OptimizationState::Analyzed;

        let proposed = self.propose(&before, &path)?;
        let mut result = OptimizationResult {
            state,
            before,
            after: None,
            proposed,
            applied: Vec::new(),
            not_attempted: Vec::new(),
            changes: Vec::new(),
            write_failure: None,
        };

        if result.proposed.is_empty() {
            transition(&mut state, OptimizationState::NoFixAvailable);
            result.state = state;
            return Ok(result);
        }
        transition(&mut state, OptimizationState::Proposed);
        if !apply {
            result.state = state;
            return Ok(result);
        }

        transition(&mut state, OptimizationState::Applying);
        for (i, action) in result.proposed.iter().enumerate() {
            if cancel.is_cancelled() {
                result.not_attempted = result.proposed[i..].to_vec();
                return stop_cancelled(result, state);
            }
            match self.apply_one(action) {
                Ok(Some(change)) => {
                    result.changes.push(change);
                    result.applied.push(action.clone());
                }
                Ok(None) => debug!("{} already satisfied", action.action),
                Err(failure) => {
                    warn!("{}", failure);
                    result.write_failure = Some(WriteFailure {
                        action: action.action,
                        file: action.file.clone(),
                        reason: sanitize_for_display(&failure.to_string()),
                    });
                    result.not_attempted = result.proposed[i + 1..].to_vec();
                    break;
                }
            }
        }

        // Always re-verify, even after a failed write.
        match self.pipeline.validate_canonical(&path, kind, cancel) {
            Ok(report) => result.after = Some(report),
            Err(PipelineError::Cancelled) => return stop_cancelled(result, state),
            Err(e) => return Err(e),
        }
        let done = if result.write_failure.is_some() {
            OptimizationState::PartiallyApplied
        } else {
            OptimizationState::Reverified
        };
        transition(&mut state, done);
        result.state = state;

        if let Some(delta) = result.delta() {
            info!(
                "Optimization applied {} actions: {} findings resolved, score {:+}",
                result.applied.len(),
                delta.resolved.len(),
                delta.score_change
            );
        }
        Ok(result)
    }

    /// Match built-in findings to catalog actions. One action per edit.
    fn propose(
        &self,
        report: &ValidationReport,
        root: &CanonicalPath,
    ) -> Result<Vec<ProposedAction>, PipelineError> {
        let mut documents: BTreeMap<PathBuf, Option<JsonValue>> = BTreeMap::new();
        let mut seen = BTreeSet::new();
        let mut proposed = Vec::new();

        for finding in report.findings.iter().filter(|f| f.source == BUILTIN_SOURCE) {
            let Some(action) = ActionKind::for_rule(&finding.rule) else {
                continue;
            };
            let (Some(location), Some(pointer)) = (&finding.location, finding.pointer()) else {
                continue;
            };
            let Some(path) = resolve_file(root, &location.file)? else {
                continue;
            };

            if !documents.contains_key(path.as_path()) {
                let doc = serde_json::from_str::<JsonValue>(&read_artifact(&path)?).ok();
                documents.insert(path.as_path().to_path_buf(), doc);
            }
            let Some(Some(doc)) = documents.get(path.as_path()) else {
                continue;
            };

            let Some(edit) = actions::plan(action, doc, pointer, self.pipeline.policy()) else {
                debug!("No {} edit for {}", action, pointer);
                continue;
            };
            if !seen.insert((path.as_path().to_path_buf(), edit.pointer.clone())) {
                continue;
            }
            proposed.push(ProposedAction {
                action,
                finding_id: finding.id.clone(),
                file: location.file.clone(),
                edit,
                path: path.into_path_buf(),
            });
        }
        Ok(proposed)
    }

    /// Apply one action against the current file content
    fn apply_one(&self, action: &ProposedAction) -> Result<Option<Change>, PipelineError> {
        let write_failed = |reason: String| PipelineError::OptimizationWriteFailed {
            path: action.file.clone(),
            reason,
        };
        let text = std::fs::read_to_string(&action.path).map_err(|e| write_failed(e.to_string()))?;
        let mut doc: JsonValue = serde_json::from_str(text.trim_start_matches('\u{feff}'))
            .map_err(|e| write_failed(e.to_string()))?;

        let Some(before) = actions::apply(&mut doc, &action.edit) else {
            return Ok(None);
        };
        let mut contents =
            serde_json::to_string_pretty(&doc).map_err(|e| write_failed(e.to_string()))?;
        contents.push('\n');
        self.writer
            .write(&action.path, &contents)
            .map_err(|e| write_failed(e.to_string()))?;

        debug!("{} set {}", action.action, action.edit.pointer);
        Ok(Some(Change {
            action: action.action,
            file: action.file.clone(),
            pointer: action.edit.pointer.clone(),
            before,
            after: action.edit.value.clone(),
        }))
    }
}

/// End an interrupted apply. With nothing on disk this is a plain
/// cancellation; otherwise the caller gets the record of what was written.
fn stop_cancelled(
    mut result: OptimizationResult,
    mut state: OptimizationState,
) -> Result<OptimizationResult, PipelineError> {
    if result.changes.is_empty() {
        return Err(PipelineError::Cancelled);
    }
    warn!(
        "Optimization cancelled after {} change(s); {} action(s) not attempted",
        result.changes.len(),
        result.not_attempted.len()
    );
    transition(&mut state, OptimizationState::Cancelled);
    result.state = state;
    Ok(result)
}

fn transition(state: &mut OptimizationState, next: OptimizationState) {
    debug!("Optimization {:?} -> {:?}", state, next);
    *state = next;
}

/// The file a finding points at, inside the validated target
fn resolve_file(root: &CanonicalPath, file: &Path) -> Result<Option<CanonicalPath>, PipelineError> {
    if !root.as_path().is_dir() {
        return Ok(Some(root.clone()));
    }
    let Some(name) = file.to_str() else {
        return Ok(None);
    };
    Ok(package::find_artifact(root, name)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PolicyConfig, UserConfig};
    use std::fs;

    const FIXABLE: &str = r#"{
  "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
  "contentVersion": "1.0",
  "parameters": {
    "storageName": { "type": "string" }
  },
  "resources": [
    {
      "type": "Microsoft.Storage/storageAccounts",
      "name": "[parameters('storageName')]",
      "location": "[resourceGroup().location]",
      "tags": {},
      "properties": { "minimumTlsVersion": "TLS1_0" }
    }
  ]
}"#;

    struct FailingWriter;

    impl ArtifactWriter for FailingWriter {
        fn write(&self, _: &Path, _: &str) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }
    }

    /// Writes normally, then cancels the run
    struct CancelAfterWrite(CancellationToken);

    impl ArtifactWriter for CancelAfterWrite {
        fn write(&self, path: &Path, contents: &str) -> std::io::Result<()> {
            AtomicWriter.write(path, contents)?;
            self.0.cancel();
            Ok(())
        }
    }

    fn policy_for(dir: &Path) -> PolicyConfig {
        let mut policy = PolicyConfig::default();
        policy.allowed_roots = vec![dir.to_path_buf()];
        policy
    }

    fn rules(report: &ValidationReport) -> Vec<&str> {
        report.findings.iter().map(|f| f.rule.as_str()).collect()
    }

    #[test]
    fn test_clean_template_has_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mainTemplate.json");
        fs::write(
            &file,
            r#"{"$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#", "contentVersion": "1.0.0.0", "resources": []}"#,
        )
        .unwrap();
        let policy = policy_for(dir.path());
        let user = UserConfig::default();
        let pipeline = ValidationPipeline::with_validators(&policy, &user, Vec::new()).unwrap();

        let result = Optimizer::new(&pipeline)
            .optimize(&file, None, true, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.state, OptimizationState::NoFixAvailable);
        assert!(result.after.is_none());
    }

    #[test]
    fn test_propose_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mainTemplate.json");
        fs::write(&file, FIXABLE).unwrap();
        let policy = policy_for(dir.path());
        let user = UserConfig::default();
        let pipeline = ValidationPipeline::with_validators(&policy, &user, Vec::new()).unwrap();

        let result = Optimizer::new(&pipeline)
            .optimize(&file, None, false, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.state, OptimizationState::Proposed);
        let names: Vec<&str> = result.proposed.iter().map(|p| p.action.name()).collect();
        assert_eq!(
            names,
            vec![
                "add-content-version",
                "add-parameter-description",
                "inject-api-version",
                "enforce-storage-https",
                "raise-storage-min-tls"
            ]
        );
        assert_eq!(fs::read_to_string(&file).unwrap(), FIXABLE);
    }

    #[test]
    fn test_apply_fixes_and_reverifies() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mainTemplate.json");
        fs::write(&file, FIXABLE).unwrap();
        let policy = policy_for(dir.path());
        let user = UserConfig::default();
        let pipeline = ValidationPipeline::with_validators(&policy, &user, Vec::new()).unwrap();

        let result = Optimizer::new(&pipeline)
            .optimize(&file, None, true, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.state, OptimizationState::Reverified);
        assert_eq!(result.applied.len(), 5);
        let after = result.after.as_ref().unwrap();
        assert!(after.findings.is_empty(), "{:?}", rules(after));
        assert!(after.passed);
        assert!(after.overall_score > result.before.overall_score);

        let tls = result
            .changes
            .iter()
            .find(|c| c.action == ActionKind::RaiseStorageMinTls)
            .unwrap();
        assert_eq!(tls.pointer, "/resources/0/properties/minimumTlsVersion");
        assert_eq!(tls.before, Some(serde_json::json!("TLS1_0")));
        assert_eq!(tls.after, serde_json::json!("TLS1_2"));

        let written: JsonValue = serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(
            written["parameters"]["storageName"]["metadata"]["description"],
            serde_json::json!("Storage name")
        );
        assert_eq!(written["resources"][0]["apiVersion"], serde_json::json!("2023-01-01"));
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mainTemplate.json");
        fs::write(&file, FIXABLE).unwrap();
        let policy = policy_for(dir.path());
        let user = UserConfig::default();
        let pipeline = ValidationPipeline::with_validators(&policy, &user, Vec::new()).unwrap();
        let optimizer = Optimizer::new(&pipeline);
        let cancel = CancellationToken::new();

        let first = optimizer.optimize(&file, None, true, &cancel).unwrap();
        let written = fs::read_to_string(&file).unwrap();
        let second = optimizer.optimize(&file, None, true, &cancel).unwrap();

        assert!(second.applied.is_empty());
        assert!(second.changes.is_empty());
        assert!(second.before.same_outcome(first.after.as_ref().unwrap()));
        assert_eq!(fs::read_to_string(&file).unwrap(), written);
    }

    #[test]
    fn test_write_failure_stops_and_still_reports() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mainTemplate.json");
        fs::write(&file, FIXABLE).unwrap();
        let policy = policy_for(dir.path());
        let user = UserConfig::default();
        let pipeline = ValidationPipeline::with_validators(&policy, &user, Vec::new()).unwrap();

        let result = Optimizer::new(&pipeline)
            .with_writer(Box::new(FailingWriter))
            .optimize(&file, None, true, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.state, OptimizationState::PartiallyApplied);
        let failure = result.write_failure.as_ref().unwrap();
        assert_eq!(failure.action, ActionKind::AddContentVersion);
        assert!(failure.reason.contains("disk full"));
        assert!(result.applied.is_empty());
        assert_eq!(result.not_attempted.len(), 4);
        let after = result.after.as_ref().unwrap();
        assert!(after.same_outcome(&result.before));
        assert_eq!(fs::read_to_string(&file).unwrap(), FIXABLE);
    }

    #[test]
    fn test_cancel_mid_apply_keeps_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mainTemplate.json");
        fs::write(&file, FIXABLE).unwrap();
        let policy = policy_for(dir.path());
        let user = UserConfig::default();
        let pipeline = ValidationPipeline::with_validators(&policy, &user, Vec::new()).unwrap();
        let cancel = CancellationToken::new();

        let result = Optimizer::new(&pipeline)
            .with_writer(Box::new(CancelAfterWrite(cancel.clone())))
            .optimize(&file, None, true, &cancel)
            .unwrap();
        assert_eq!(result.state, OptimizationState::Cancelled);
        assert!(result.after.is_none());
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.applied[0].action, ActionKind::AddContentVersion);
        assert_eq!(result.not_attempted.len(), 4);
        assert!(result.write_failure.is_none());

        let written: JsonValue = serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(written["contentVersion"], serde_json::json!("1.0.0.0"));
        assert!(written["resources"][0].get("apiVersion").is_none());
    }

    #[test]
    fn test_package_root_edits_the_template() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mainTemplate.json"), FIXABLE).unwrap();
        let policy = policy_for(dir.path());
        let user = UserConfig::default();
        let pipeline = ValidationPipeline::with_validators(&policy, &user, Vec::new()).unwrap();

        let result = Optimizer::new(&pipeline)
            .optimize(dir.path(), None, true, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.state, OptimizationState::Reverified);
        let after = result.after.as_ref().unwrap();
        assert!(!after.has_rule("storage-https-only-missing"));
        // Not fixable by the catalog.
        assert!(after.has_rule("package-ui-definition-missing"));
    }
}
