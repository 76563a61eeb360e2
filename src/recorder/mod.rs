//! Recording state machine
//!
//! Drives an encoder over a [`CombinedFeed`](crate::compositor::CombinedFeed),
//! tracks elapsed time, gathers chunks and assembles the final artifact.

pub mod encoder;
pub mod format;
#[allow(clippy::module_inception)]
mod recorder;
pub mod segment;
pub mod state;

pub use encoder::{Encoder, EncoderEvent, EncoderFactory, EncoderOptions};
pub use format::{negotiate, MediaFormat, PREFERRED_FORMATS, SEGMENT_MIME};
pub use recorder::{format_elapsed, Artifact, Recorder, RecorderOptions, RecordingSnapshot};
pub use segment::{
    Record, Segment, SegmentEncoder, SegmentEncoderFactory, SegmentError, SegmentHeader,
    SegmentReader,
};
pub use state::{RecordingState, Transition};
