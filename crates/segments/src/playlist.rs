//! HLS media playlist synthesis over a selection.
//!
//! Nothing is persisted: the playlist is rebuilt per request from the
//! segment listing. Holes become discontinuities so players reset their
//! timeline instead of stalling.

use m3u8_rs::{MediaPlaylist, MediaSegment};

use crate::select::Selection;

/// Build a media playlist for an already-computed selection.
///
/// `uri_for` maps a segment to the URI the client should fetch, letting
/// the restreamer prefix its own mount point.
pub fn media_playlist(
    selection: &Selection,
    uri_for: impl Fn(&crate::path::SegmentFile) -> String,
) -> MediaPlaylist {
    let mut playlist = MediaPlaylist {
        version: Some(3),
        media_sequence: 0,
        end_list: true,
        ..Default::default()
    };

    let mut target_duration = 0u64;
    let mut hole_iter = selection.holes.iter().peekable();

    for segment in &selection.segments {
        // A hole that ended at or before this segment's start means the
        // previous segment does not connect to this one.
        let mut discontinuity = false;
        while let Some((_, hole_end)) = hole_iter.peek() {
            if *hole_end <= segment.start {
                discontinuity = true;
                hole_iter.next();
            } else {
                break;
            }
        }

        let duration = segment.duration.as_secs_f64();
        target_duration = target_duration.max(duration.ceil() as u64);

        playlist.segments.push(MediaSegment {
            uri: uri_for(segment),
            duration: duration as f32,
            discontinuity,
            program_date_time: Some(segment.start.fixed_offset()),
            ..Default::default()
        });
    }

    playlist.target_duration = target_duration.max(1);
    playlist
}

/// Render a playlist to its textual form.
pub fn render(playlist: &MediaPlaylist) -> String {
    let mut buf: Vec<u8> = Vec::new();
    // Writing to a Vec cannot fail.
    let _ = playlist.write_to(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{SegmentFile, SegmentKind};
    use crate::select::select_segments;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::time::Duration;

    fn t(secs: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 9, 0, 0, 0).unwrap() + ChronoDuration::seconds(secs)
    }

    fn seg(start_secs: i64, hash: &str) -> SegmentFile {
        SegmentFile {
            channel: "alpha".into(),
            quality: "source".into(),
            start: t(start_secs),
            duration: Duration::from_secs(2),
            kind: SegmentKind::Full,
            hash: hash.into(),
        }
    }

    #[test]
    fn playlist_lists_segments_in_order() {
        let segments = vec![seg(0, "A"), seg(2, "B"), seg(4, "C")];
        let selection = select_segments(&segments, t(0), t(6));
        let playlist = media_playlist(&selection, |s| s.file_name());
        let text = render(&playlist);

        assert!(text.starts_with("#EXTM3U"));
        assert!(text.contains("#EXT-X-TARGETDURATION:2"));
        assert!(text.contains("#EXT-X-ENDLIST"));
        let a = text.find("00-00.000").unwrap();
        let b = text.find("00-02.000").unwrap();
        let c = text.find("00-04.000").unwrap();
        assert!(a < b && b < c);
        assert!(!text.contains("#EXT-X-DISCONTINUITY\n#EXTM3U"));
    }

    #[test]
    fn hole_becomes_discontinuity() {
        let segments = vec![seg(0, "A"), seg(6, "D")];
        let selection = select_segments(&segments, t(0), t(8));
        let playlist = media_playlist(&selection, |s| s.file_name());
        assert!(!playlist.segments[0].discontinuity);
        assert!(playlist.segments[1].discontinuity);
        assert!(render(&playlist).contains("#EXT-X-DISCONTINUITY"));
    }
}
