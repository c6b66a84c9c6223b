//! Batch buffering with carry-over.
//!
//! Records accumulate per channel until the threshold is reached, then the
//! whole batch goes to the analyzer as one delimited string. When the
//! analyzer reports that the batch ended mid-activation, the last record is
//! kept and prepended to the next batch so the activation is not cut at the
//! boundary.

use log::debug;

use crate::core::bluetooth::constants::{DEFAULT_BATCH_THRESHOLD, RECORD_DELIMITER};
use crate::core::bluetooth::error::AnalysisError;
use crate::core::stream::analysis::{Analysis, Analyzer};

#[derive(Debug, Clone)]
pub struct BatchBuffer {
    pending: Vec<String>,
    carry_over: Option<String>,
    threshold: usize,
}

impl BatchBuffer {
    /// A threshold of zero is treated as one.
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            pending: Vec::with_capacity(threshold),
            carry_over: None,
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn carry_over(&self) -> Option<&str> {
        self.carry_over.as_deref()
    }

    /// Appends a record and flushes once the threshold is reached.
    ///
    /// Returns `None` while accumulating, otherwise the analyzer's result for
    /// the flushed batch. Pending records are cleared either way; a failed
    /// analysis also drops the carry-over record.
    pub fn ingest(
        &mut self,
        record: String,
        analyzer: &mut dyn Analyzer,
    ) -> Option<Result<Analysis, AnalysisError>> {
        self.pending.push(record);
        if self.pending.len() < self.threshold {
            return None;
        }
        Some(self.flush(analyzer))
    }

    /// The records the next flush would dispatch, carry-over first.
    pub fn dispatch_sequence(&self) -> Vec<&str> {
        self.carry_over
            .as_deref()
            .into_iter()
            .chain(self.pending.iter().map(String::as_str))
            .collect()
    }

    fn flush(&mut self, analyzer: &mut dyn Analyzer) -> Result<Analysis, AnalysisError> {
        let combined = self.dispatch_sequence().join(RECORD_DELIMITER);
        debug!(
            "Flushing batch of {} records (carry-over: {})",
            self.pending.len(),
            self.carry_over.is_some()
        );

        let result = analyzer.analyze(&combined);
        let last = self.pending.pop();
        self.pending.clear();

        self.carry_over = match &result {
            Ok(analysis) if analysis.ends_in_activation => last,
            _ => None,
        };
        result
    }

    /// Drops all buffered state, e.g. when a new session starts.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.carry_over = None;
    }
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every combined string and answers with scripted activation flags.
    struct ScriptedAnalyzer {
        calls: Vec<String>,
        activations: Vec<bool>,
    }

    impl ScriptedAnalyzer {
        fn new(activations: &[bool]) -> Self {
            Self {
                calls: Vec::new(),
                activations: activations.to_vec(),
            }
        }
    }

    impl Analyzer for ScriptedAnalyzer {
        fn analyze(&mut self, combined: &str) -> Result<Analysis, AnalysisError> {
            let ends_in_activation = self.activations.get(self.calls.len()).copied().unwrap_or(false);
            self.calls.push(combined.to_string());
            Ok(Analysis {
                ends_in_activation,
                ..Analysis::default()
            })
        }
    }

    fn feed(buffer: &mut BatchBuffer, analyzer: &mut dyn Analyzer, records: &[&str]) -> usize {
        records
            .iter()
            .filter_map(|r| buffer.ingest(r.to_string(), analyzer))
            .count()
    }

    #[test]
    fn flushes_at_threshold_in_arrival_order() {
        let mut buffer = BatchBuffer::new(3);
        let mut analyzer = ScriptedAnalyzer::new(&[]);

        assert!(buffer.ingest("1".into(), &mut analyzer).is_none());
        assert!(buffer.ingest("2".into(), &mut analyzer).is_none());
        assert!(buffer.ingest("3".into(), &mut analyzer).is_some());

        assert_eq!(analyzer.calls, vec!["1,2,3"]);
        assert!(buffer.pending().is_empty());
        assert_eq!(buffer.carry_over(), None);
    }

    #[test]
    fn carry_over_prepends_last_record_of_activation_batch() {
        let mut buffer = BatchBuffer::new(3);
        let mut analyzer = ScriptedAnalyzer::new(&[true, false]);

        let flushes = feed(&mut buffer, &mut analyzer, &["a1", "a2", "a3", "b1", "b2", "b3"]);

        assert_eq!(flushes, 2);
        assert_eq!(analyzer.calls[0], "a1,a2,a3");
        // four records: batch one's last plus batch two's three
        assert_eq!(analyzer.calls[1], "a3,b1,b2,b3");
        assert_eq!(buffer.carry_over(), None);
    }

    #[test]
    fn carry_over_tracks_newest_batch() {
        let mut buffer = BatchBuffer::new(2);
        let mut analyzer = ScriptedAnalyzer::new(&[true, true, false]);

        feed(&mut buffer, &mut analyzer, &["1", "2", "3", "4", "5", "6"]);

        assert_eq!(analyzer.calls, vec!["1,2", "2,3,4", "4,5,6"]);
    }

    #[test]
    fn failed_analysis_clears_pending_and_carry_over() {
        let mut buffer = BatchBuffer::new(2);
        let mut ok = ScriptedAnalyzer::new(&[true]);
        feed(&mut buffer, &mut ok, &["1", "2"]);
        assert_eq!(buffer.carry_over(), Some("2"));

        let mut failing = |_: &str| -> Result<Analysis, AnalysisError> {
            Err(AnalysisError("engine unavailable".into()))
        };
        buffer.ingest("3".into(), &mut failing);
        let result = buffer.ingest("4".into(), &mut failing);

        assert!(matches!(result, Some(Err(_))));
        assert!(buffer.pending().is_empty());
        assert_eq!(buffer.carry_over(), None);

        let mut after = ScriptedAnalyzer::new(&[]);
        feed(&mut buffer, &mut after, &["5", "6"]);
        assert_eq!(after.calls, vec!["5,6"]);
    }

    #[test]
    fn zero_threshold_flushes_every_record() {
        let mut buffer = BatchBuffer::new(0);
        let mut analyzer = ScriptedAnalyzer::new(&[]);
        assert_eq!(buffer.threshold(), 1);
        assert_eq!(feed(&mut buffer, &mut analyzer, &["x", "y"]), 2);
    }

    #[test]
    fn pending_never_exceeds_threshold() {
        let mut buffer = BatchBuffer::new(4);
        let mut analyzer = ScriptedAnalyzer::new(&[true; 8]);
        for i in 0..25 {
            buffer.ingest(i.to_string(), &mut analyzer);
            assert!(buffer.pending().len() < buffer.threshold());
        }
    }
}
