//! Batch runner for the Assay scoring engine.
//!
//! Drives the `assay-core` components over any
//! [`AssessmentStore`](assay_core::store::AssessmentStore): scores each
//! subject of a cycle concurrently, persists composites, gaps and confidence
//! records with audit entries, and evaluates confidence drift.

pub mod error;
pub mod pipeline;
pub mod retry;
pub mod settings;

pub use error::PipelineError;
pub use pipeline::{CycleReport, DriftOutcome, Pipeline, SubjectOutcome};
pub use settings::{RetryPolicy, RunnerConfig};

#[cfg(test)]
mod tests;
