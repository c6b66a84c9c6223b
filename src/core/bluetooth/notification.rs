//! Notification handling for the sensor band
//! This module turns raw notification values into channel events: route,
//! persist, decode, deliver to listeners and batch for analysis.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use uuid::Uuid;

use crate::core::bluetooth::types::{ChannelTag, DecodedSample};
use crate::core::stream::decoder;
use crate::core::stream::{
    Analyzer, BatchBuffer, ChannelEvent, ChannelListener, FrameRouter, ListenerRegistry,
    ListenerToken, RecordSink,
};

/// Counters for frames that did not make it through the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub delivered: u64,
    pub unrouted: u64,
    pub decode_errors: u64,
    pub sink_errors: u64,
    pub analysis_errors: u64,
}

struct AnalysisSlot {
    buffer: BatchBuffer,
    analyzer: Box<dyn Analyzer>,
}

/// The stream pipeline for one connection.
///
/// Listener callbacks run while the handler is locked by the driver; they
/// must not call back into the handler.
pub struct NotificationHandler {
    router: FrameRouter,
    batch_threshold: usize,
    analysis: HashMap<ChannelTag, AnalysisSlot>,
    listeners: ListenerRegistry,
    sink: Option<Box<dyn RecordSink>>,
    latest: HashMap<ChannelTag, DecodedSample>,
    stats: PipelineStats,
}

impl NotificationHandler {
    pub fn new(router: FrameRouter, batch_threshold: usize) -> Self {
        Self {
            router,
            batch_threshold,
            analysis: HashMap::new(),
            listeners: ListenerRegistry::new(),
            sink: None,
            latest: HashMap::new(),
            stats: PipelineStats::default(),
        }
    }

    pub fn with_sink<S: RecordSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Batches `channel` through `analyzer`. Replaces any previous analyzer and its buffer.
    pub fn register_analyzer<A: Analyzer + 'static>(&mut self, channel: ChannelTag, analyzer: A) {
        self.analysis.insert(
            channel,
            AnalysisSlot {
                buffer: BatchBuffer::new(self.batch_threshold),
                analyzer: Box::new(analyzer),
            },
        );
    }

    pub fn subscribe<L: ChannelListener + 'static>(
        &mut self,
        channel: ChannelTag,
        listener: L,
    ) -> ListenerToken {
        self.listeners.subscribe(channel, listener)
    }

    pub fn unsubscribe(&mut self, token: ListenerToken) -> bool {
        self.listeners.unsubscribe(token)
    }

    pub fn latest_sample(&self, channel: ChannelTag) -> Option<&DecodedSample> {
        self.latest.get(&channel)
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Drops per-session state so a new session never mixes with the last one.
    pub fn reset_session(&mut self) {
        for slot in self.analysis.values_mut() {
            slot.buffer.clear();
        }
        self.latest.clear();
    }

    /// Processes one notification value. Returns the channel it was delivered on.
    pub fn handle_notification(
        &mut self,
        characteristic: Uuid,
        value: &[u8],
        received_at: DateTime<Utc>,
    ) -> Option<ChannelTag> {
        let Some(frame) = self.router.route(characteristic, value, received_at) else {
            self.stats.unrouted += 1;
            return None;
        };
        let channel = frame.channel;

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.append(&frame) {
                error!("Failed to persist {} record: {}", channel, e);
                self.stats.sink_errors += 1;
            }
        }

        let sample = match decoder::decode(&frame) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Dropping {} frame: {}", channel, e);
                self.stats.decode_errors += 1;
                return None;
            }
        };
        debug!("Decoded {} sample: {}", channel, sample);

        self.latest.insert(channel, sample.clone());
        let record = sample.to_string();
        self.listeners.publish(channel, &ChannelEvent::Sample(sample));
        self.stats.delivered += 1;

        if let Some(slot) = self.analysis.get_mut(&channel) {
            match slot.buffer.ingest(record, slot.analyzer.as_mut()) {
                Some(Ok(analysis)) => {
                    self.listeners
                        .publish(channel, &ChannelEvent::Analysis(analysis));
                }
                Some(Err(e)) => {
                    error!("Error processing {} buffer: {}", channel, e);
                    self.stats.analysis_errors += 1;
                }
                None => {}
            }
        }

        Some(channel)
    }
}
