//! Contract with the external analysis engine.
//!
//! The numeric work (filtering, heart rate, RMS, activation detection) lives
//! outside this crate. The pipeline only hands it a combined record string
//! and reads back the derived metrics.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::bluetooth::error::AnalysisError;

/// Metrics derived from one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Analysis {
    pub metrics: BTreeMap<String, f64>,
    /// The batch ended while an activation was still open
    pub ends_in_activation: bool,
}

impl Analysis {
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Analysis engine for one channel.
///
/// Must behave as a pure function of its input from the pipeline's point of
/// view. Failures are returned, never panicked.
pub trait Analyzer: Send {
    fn analyze(&mut self, combined: &str) -> Result<Analysis, AnalysisError>;
}

impl<F> Analyzer for F
where
    F: FnMut(&str) -> Result<Analysis, AnalysisError> + Send,
{
    fn analyze(&mut self, combined: &str) -> Result<Analysis, AnalysisError> {
        self(combined)
    }
}
