use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::DEFAULT_BATCH_THRESHOLD;

/// Stream pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Records collected per channel before the analyzer runs
    pub batch_threshold: usize,
    /// Directory for per-channel CSV logs. `None` disables logging to disk.
    pub raw_log_dir: Option<PathBuf>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            raw_log_dir: None,
        }
    }
}
