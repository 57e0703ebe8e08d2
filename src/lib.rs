//! armvet - Azure Marketplace package validation
//!
//! Validates ARM templates, UI definitions and whole offer packages with
//! built-in checks and allow-listed external validators, scores the result
//! per quality dimension, and applies safe automatic fixes.

pub mod checks;
pub mod cli;
pub mod config;
pub mod fixes;
pub mod input;
pub mod models;
pub mod pipeline;
pub mod process;
pub mod reporters;
pub mod scoring;
pub mod validators;
