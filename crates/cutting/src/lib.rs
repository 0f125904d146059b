//! Cut execution: producing one video from archived segments.
//!
//! The four cut types share one contract: validate first, then stream
//! bytes. Fast cuts never spawn a subprocess; smart cuts re-encode only
//! range boundaries; full and webm cuts run the whole request through
//! one ffmpeg filtergraph. Output is always streamed, never buffered
//! whole.

pub mod encode;
pub mod error;
pub mod fast;
pub mod frame;
pub mod request;
pub mod subprocess;
pub mod thumbnail;
pub mod waveform;

pub use error::CutError;
pub use request::{CutType, Rect, Transition, TransitionKind, validate_cut};
pub use subprocess::ByteStream;

use std::path::PathBuf;

/// One selected segment feeding a cut, with its advertised duration.
#[derive(Debug, Clone)]
pub struct SourceSegment {
    pub path: PathBuf,
    pub duration: f64,
}

/// The source material for one requested range.
///
/// `skip` and `duration` are positions on the timeline the segments
/// form when concatenated end to end. The caller's selection has
/// already spliced out any permitted holes, so a range's nominal
/// wall-clock span and its `duration` here differ whenever a hole was
/// skipped.
#[derive(Debug, Clone)]
pub struct RangeSource {
    /// Selected segments in ascending start order.
    pub segments: Vec<SourceSegment>,
    /// Seconds into the concatenated segments where the range starts.
    pub skip: f64,
    /// Length of the wanted span on the concatenated timeline.
    pub duration: f64,
}

impl RangeSource {
    /// Total duration of the underlying segments.
    pub fn segments_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// Dispatch an already-validated cut to its implementation.
pub fn execute_cut(
    ranges: Vec<RangeSource>,
    transitions: Vec<Option<Transition>>,
    crop: Option<Rect>,
    cut_type: CutType,
    token: tokio_util::sync::CancellationToken,
) -> ByteStream {
    match cut_type {
        CutType::Fast => fast::fast_cut(ranges, token),
        CutType::Smart => encode::smart_cut(ranges, transitions, crop, token),
        CutType::Full => {
            encode::encoded_cut(ranges, transitions, crop, encode::OutputFormat::MpegTs, token)
        }
        CutType::Webm => {
            encode::encoded_cut(ranges, transitions, crop, encode::OutputFormat::Webm, token)
        }
    }
}
