//! Segment selection for a requested time range.
//!
//! Given the ordered segment list of a (channel, quality), pick the set
//! covering [start, end) with the preference full > suspect > partial,
//! then longest remaining coverage, then lowest hash. Identical inputs
//! always produce identical selections; both cutting and playlist
//! synthesis depend on that.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::path::SegmentFile;

/// Gaps shorter than this are rounding noise between adjacent segments,
/// not holes.
pub const ALLOWABLE_GAP_MS: i64 = 10;

/// Result of selecting segments for one range.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Chosen segments in ascending start order, no duplicates.
    pub segments: Vec<SegmentFile>,
    /// Uncovered sub-intervals of the request, in order.
    pub holes: Vec<(DateTime<Utc>, DateTime<Utc>)>,
}

impl Selection {
    /// Total requested time not covered by any segment.
    pub fn hole_duration(&self) -> ChronoDuration {
        self.holes
            .iter()
            .fold(ChronoDuration::zero(), |acc, (a, b)| acc + (*b - *a))
    }

    /// Map an instant to its position on the timeline formed by laying
    /// the selected segments end to end.
    ///
    /// This is the coordinate space cuts operate in: interior holes are
    /// already spliced out, and overlapping duplicates occupy their
    /// full length. An instant inside a hole maps to the end of the
    /// content before it; an instant before the first segment maps to
    /// zero.
    pub fn concat_offset(&self, t: DateTime<Utc>) -> f64 {
        let mut position = 0.0;
        let mut laid_out = 0.0;
        for segment in &self.segments {
            let duration = segment.duration.as_secs_f64();
            let within =
                ((t - segment.start).num_milliseconds() as f64 / 1000.0).clamp(0.0, duration);
            if within > 0.0 {
                position = laid_out + within;
            }
            laid_out += duration;
        }
        position
    }
}

/// Select segments from `candidates` covering [start, end).
///
/// `candidates` must be sorted (the order [`crate::list`] returns);
/// segments that do not intersect the range are ignored.
pub fn select_segments(
    candidates: &[SegmentFile],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Selection {
    let allowable_gap = ChronoDuration::milliseconds(ALLOWABLE_GAP_MS);
    let mut selection = Selection::default();
    if start >= end {
        return selection;
    }

    let intersecting: Vec<&SegmentFile> = candidates
        .iter()
        .filter(|s| s.end() > start && s.start < end)
        .collect();

    let mut cursor = start;
    loop {
        if end - cursor <= allowable_gap {
            break;
        }

        // Segments already covering the cursor, with the small tolerance
        // so back-to-back segments with millisecond drift still chain.
        let best = intersecting
            .iter()
            .filter(|s| s.start <= cursor + allowable_gap && s.end() > cursor + allowable_gap)
            .min_by(|a, b| {
                a.kind
                    .rank()
                    .cmp(&b.kind.rank())
                    .then(b.end().cmp(&a.end()))
                    .then(a.hash.cmp(&b.hash))
            });

        match best {
            Some(segment) => {
                selection.segments.push((*segment).clone());
                cursor = segment.end();
            }
            None => {
                // Hole until the next segment start (or the range end).
                let next_start = intersecting
                    .iter()
                    .map(|s| s.start)
                    .filter(|s| *s > cursor)
                    .min()
                    .map(|s| s.min(end))
                    .unwrap_or(end);
                selection.holes.push((cursor, next_start));
                if next_start >= end {
                    break;
                }
                cursor = next_start;
            }
        }
    }

    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::SegmentKind;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t(secs: f64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 9, 0, 0, 0).unwrap()
            + ChronoDuration::milliseconds((secs * 1000.0).round() as i64)
    }

    fn seg(start_secs: f64, dur_secs: f64, kind: SegmentKind, hash: &str) -> SegmentFile {
        SegmentFile {
            channel: "alpha".into(),
            quality: "source".into(),
            start: t(start_secs),
            duration: Duration::from_secs_f64(dur_secs),
            kind,
            hash: hash.into(),
        }
    }

    fn archive() -> Vec<SegmentFile> {
        let mut v = vec![
            seg(0.0, 2.0, SegmentKind::Full, "S0"),
            seg(2.0, 2.0, SegmentKind::Full, "S1"),
            seg(4.0, 2.0, SegmentKind::Full, "S2"),
            seg(6.0, 2.0, SegmentKind::Full, "S3"),
            seg(8.0, 2.0, SegmentKind::Full, "S4"),
        ];
        v.sort();
        v
    }

    #[test]
    fn full_coverage_has_no_holes() {
        let selection = select_segments(&archive(), t(2.0), t(8.5));
        assert!(selection.holes.is_empty());
        let hashes: Vec<_> = selection.segments.iter().map(|s| s.hash.as_str()).collect();
        assert_eq!(hashes, vec!["S1", "S2", "S3", "S4"]);

        // Selected coverage spans the whole request.
        assert!(selection.segments.first().unwrap().start <= t(2.0));
        assert!(selection.segments.last().unwrap().end() >= t(8.5));
    }

    #[test]
    fn missing_segment_is_a_hole() {
        let mut segments = archive();
        segments.retain(|s| s.hash != "S2");
        let selection = select_segments(&segments, t(2.0), t(8.5));
        assert_eq!(selection.holes, vec![(t(4.0), t(6.0))]);
        let hashes: Vec<_> = selection.segments.iter().map(|s| s.hash.as_str()).collect();
        assert_eq!(hashes, vec!["S1", "S3", "S4"]);
    }

    #[test]
    fn hole_at_range_edges() {
        let segments = vec![seg(4.0, 2.0, SegmentKind::Full, "S2")];
        let selection = select_segments(&segments, t(2.0), t(8.0));
        assert_eq!(selection.holes, vec![(t(2.0), t(4.0)), (t(6.0), t(8.0))]);
        assert_eq!(selection.hole_duration(), ChronoDuration::seconds(4));
    }

    #[test]
    fn prefers_full_over_suspect_over_partial() {
        let mut segments = vec![
            seg(0.0, 2.0, SegmentKind::Partial, "P"),
            seg(0.0, 2.0, SegmentKind::Suspect, "S"),
            seg(0.0, 2.0, SegmentKind::Full, "F"),
        ];
        segments.sort();
        let selection = select_segments(&segments, t(0.0), t(2.0));
        assert_eq!(selection.segments.len(), 1);
        assert_eq!(selection.segments[0].hash, "F");
    }

    #[test]
    fn ties_break_by_longest_coverage_then_hash() {
        let mut segments = vec![
            seg(0.0, 1.5, SegmentKind::Full, "AAA"),
            seg(0.0, 2.0, SegmentKind::Full, "ZZZ"),
        ];
        segments.sort();
        let selection = select_segments(&segments, t(0.0), t(2.0));
        assert_eq!(selection.segments[0].hash, "ZZZ");

        let mut segments = vec![
            seg(0.0, 2.0, SegmentKind::Full, "BBB"),
            seg(0.0, 2.0, SegmentKind::Full, "AAA"),
        ];
        segments.sort();
        let selection = select_segments(&segments, t(0.0), t(2.0));
        assert_eq!(selection.segments[0].hash, "AAA");
    }

    #[test]
    fn partial_fills_gaps_the_full_chain_misses() {
        let mut segments = vec![
            seg(0.0, 2.0, SegmentKind::Full, "F0"),
            seg(2.0, 1.0, SegmentKind::Partial, "P1"),
            seg(4.0, 2.0, SegmentKind::Full, "F2"),
        ];
        segments.sort();
        let selection = select_segments(&segments, t(0.0), t(6.0));
        let hashes: Vec<_> = selection.segments.iter().map(|s| s.hash.as_str()).collect();
        assert_eq!(hashes, vec!["F0", "P1", "F2"]);
        assert_eq!(selection.holes, vec![(t(3.0), t(4.0))]);
    }

    #[test]
    fn millisecond_drift_is_not_a_hole() {
        let mut segments = vec![
            seg(0.0, 1.995, SegmentKind::Full, "A"),
            seg(2.0, 2.0, SegmentKind::Full, "B"),
        ];
        segments.sort();
        let selection = select_segments(&segments, t(0.0), t(4.0));
        assert!(selection.holes.is_empty(), "{:?}", selection.holes);
        assert_eq!(selection.segments.len(), 2);
    }

    #[test]
    fn concat_offset_on_contiguous_selection() {
        let selection = select_segments(&archive(), t(2.0), t(8.5));
        assert_eq!(selection.concat_offset(t(2.0)), 0.0);
        assert_eq!(selection.concat_offset(t(5.0)), 3.0);
        assert_eq!(selection.concat_offset(t(8.5)), 6.5);
        // Before the first selected segment clamps to zero.
        assert_eq!(selection.concat_offset(t(0.0)), 0.0);
    }

    #[test]
    fn concat_offset_collapses_interior_holes() {
        let mut segments = archive();
        segments.retain(|s| s.hash != "S2");
        let selection = select_segments(&segments, t(2.0), t(8.5));
        assert_eq!(selection.holes, vec![(t(4.0), t(6.0))]);

        // An instant inside the hole maps to the end of the content
        // before it; the request end lands 0.5 s into the last segment
        // at spliced position 4.5, not nominal 6.5.
        assert_eq!(selection.concat_offset(t(5.0)), 2.0);
        assert_eq!(selection.concat_offset(t(8.5)), 4.5);
    }

    #[test]
    fn concat_offset_counts_overlapping_duplicates_in_full() {
        let mut segments = vec![
            seg(0.0, 2.5, SegmentKind::Full, "LONG"),
            seg(2.0, 2.0, SegmentKind::Full, "NEXT"),
        ];
        segments.sort();
        let selection = select_segments(&segments, t(0.0), t(4.0));
        assert_eq!(selection.segments.len(), 2);
        // The overlap [2.0, 2.5) appears twice on the spliced timeline,
        // so the request end sits at 2.5 + 2.0, not at 4.0.
        assert_eq!(selection.concat_offset(t(4.0)), 4.5);
    }

    #[test]
    fn selection_is_deterministic() {
        let segments = archive();
        let a = select_segments(&segments, t(1.0), t(9.0));
        let b = select_segments(&segments, t(1.0), t(9.0));
        assert_eq!(a.segments, b.segments);
        assert_eq!(a.holes, b.holes);
    }

    #[test]
    fn empty_and_inverted_ranges_select_nothing() {
        let segments = archive();
        assert!(select_segments(&segments, t(5.0), t(5.0)).segments.is_empty());
        assert!(select_segments(&segments, t(6.0), t(5.0)).segments.is_empty());
    }
}
