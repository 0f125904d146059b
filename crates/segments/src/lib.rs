//! The on-disk segment archive shared by every wubloader component.
//!
//! Layout: `CHANNEL/QUALITY/YYYY-MM-DDTHH/MM-SS.sss-DURATION-TYPE-HASH.ts`.
//! Files are immutable and content-addressed; two files for the same
//! instant with different hashes are both legal. Writers stage into a
//! temp name and atomically rename, so readers never observe partial
//! files and no cross-process locking is needed.

pub mod error;
pub mod list;
pub mod mpegts;
pub mod path;
pub mod playlist;
pub mod select;
pub mod writer;

pub use error::SegmentError;
pub use path::{HOUR_FMT, SegmentFile, SegmentKind, format_hour, parse_hour};
pub use select::{Selection, select_segments};
pub use writer::SegmentWriter;
