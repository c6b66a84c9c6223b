use std::sync::OnceLock;

use chrono::Local;
use log::{Level, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::broadcast;

const LOG_CHANNEL_CAPACITY: usize = 256;

static LOGGER: OnceLock<StreamLogger> = OnceLock::new();

#[derive(Debug, Serialize, Clone)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

/// Writes to stderr and fans every record out to log subscribers.
pub struct StreamLogger {
    sender: broadcast::Sender<LogMessage>,
    level: Level,
}

impl StreamLogger {
    pub fn new(level: Level) -> Self {
        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self { sender, level }
    }

    /// Installs the logger globally.
    pub fn init(level: Level) -> Result<(), SetLoggerError> {
        let logger = LOGGER.get_or_init(|| StreamLogger::new(level));
        log::set_logger(logger).map(|()| log::set_max_level(level.to_level_filter()))
    }

    /// Live log records, if the logger is installed. Lagging receivers lose the oldest.
    pub fn subscribe() -> Option<broadcast::Receiver<LogMessage>> {
        LOGGER.get().map(|logger| logger.sender.subscribe())
    }

    fn emit_log(&self, record: &Record) {
        let log_message = LogMessage {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        };
        // No subscribers is fine.
        let _ = self.sender.send(log_message);
    }
}

impl log::Log for StreamLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.emit_log(record);
        }
    }

    fn flush(&self) {}
}

/// Installs [`StreamLogger`]. If another logger is already installed it stays.
pub fn init(level: Level) {
    if let Err(e) = StreamLogger::init(level) {
        eprintln!("Failed to install logger: {}", e);
    }
}
