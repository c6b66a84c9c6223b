//! Sensor stream processing
//! Routing, decoding, batching and delivery of notification payloads.

pub mod analysis;
pub mod batch;
pub mod decoder;
pub mod listener;
pub mod router;
pub mod sink;

pub use analysis::{Analysis, Analyzer};
pub use batch::BatchBuffer;
pub use listener::{ChannelEvent, ChannelListener, ListenerRegistry, ListenerToken};
pub use router::FrameRouter;
pub use sink::{CsvRecordSink, RecordSink};
