//! Raw record persistence.
//! Every routed frame is handed to the sink before decoding and batching, so
//! nothing is lost when decoding or analysis fails.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;

use crate::core::bluetooth::types::{ChannelTag, RawFrame};
use crate::utils::ensure_directory_exists;

/// Append-only destination for raw records
pub trait RecordSink: Send {
    /// Receives the frame body exactly as it arrived, prefix already stripped.
    fn append(&mut self, frame: &RawFrame) -> io::Result<()>;
}

/// Writes one `<channel>_data_log.csv` file per channel, one record per line.
///
/// Text bodies are written as received minus their line terminator; binary
/// bodies are written as hex.
pub struct CsvRecordSink {
    directory: PathBuf,
    writers: HashMap<ChannelTag, LineWriter<File>>,
}

impl CsvRecordSink {
    /// Creates the sink, making sure the log directory exists.
    pub async fn create<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        ensure_directory_exists(&directory).await?;
        info!("Raw records will be appended under {:?}", directory);
        Ok(Self {
            directory,
            writers: HashMap::new(),
        })
    }

    pub fn file_path(&self, channel: ChannelTag) -> PathBuf {
        self.directory.join(format!("{}_data_log.csv", channel))
    }

    fn writer(&mut self, channel: ChannelTag) -> io::Result<&mut LineWriter<File>> {
        if !self.writers.contains_key(&channel) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.file_path(channel))?;
            self.writers.insert(channel, LineWriter::new(file));
        }
        self.writers
            .get_mut(&channel)
            .ok_or_else(|| io::Error::other("record writer missing"))
    }
}

fn body_text(frame: &RawFrame) -> String {
    if frame.channel.is_binary() {
        return frame.bytes.iter().map(|b| format!("{:02x}", b)).collect();
    }
    String::from_utf8_lossy(&frame.bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

impl RecordSink for CsvRecordSink {
    fn append(&mut self, frame: &RawFrame) -> io::Result<()> {
        let timestamp = stamp(frame.received_at);
        let body = body_text(frame);
        let writer = self.writer(frame.channel)?;
        writeln!(writer, "{},{}", timestamp, body)
    }
}

fn stamp(received_at: DateTime<Utc>) -> String {
    received_at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
