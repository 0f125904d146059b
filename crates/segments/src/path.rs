//! Segment filename grammar.
//!
//! A segment lives at `CHANNEL/QUALITY/HOUR/MM-SS.sss-DURATION-TYPE-HASH.ts`
//! where HOUR is `YYYY-MM-DDTHH` (UTC), DURATION is seconds with
//! millisecond precision, TYPE is one of `full`/`suspect`/`partial`, and
//! HASH is the URL-safe unpadded base64 SHA-256 of the file bytes.
//! Parse and format are exact inverses for values this crate produces.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::SegmentError;

/// Hour bucket directory format.
pub const HOUR_FMT: &str = "%Y-%m-%dT%H";

const SEGMENT_EXT: &str = ".ts";

/// Classification of a segment file, in descending order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Complete download with no upstream discontinuity.
    Full,
    /// Complete bytes but the stream around it is questionable: upstream
    /// flagged a discontinuity, the worker restarted mid-stream, or the
    /// measured duration disagrees with the advertised one.
    Suspect,
    /// Download was truncated; bytes are a prefix of the real segment.
    Partial,
}

impl SegmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmentKind::Full => "full",
            SegmentKind::Suspect => "suspect",
            SegmentKind::Partial => "partial",
        }
    }

    /// Preference rank when multiple segments cover the same instant.
    /// Lower is better.
    pub fn rank(self) -> u8 {
        match self {
            SegmentKind::Full => 0,
            SegmentKind::Suspect => 1,
            SegmentKind::Partial => 2,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(SegmentKind::Full),
            "suspect" => Some(SegmentKind::Suspect),
            "partial" => Some(SegmentKind::Partial),
            _ => None,
        }
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One archived segment, as described by its location on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    pub channel: String,
    pub quality: String,
    /// Wall-clock start, millisecond precision.
    pub start: DateTime<Utc>,
    pub duration: Duration,
    pub kind: SegmentKind,
    /// URL-safe unpadded base64 SHA-256 of the byte contents.
    pub hash: String,
}

impl SegmentFile {
    /// Wall-clock end of the segment.
    pub fn end(&self) -> DateTime<Utc> {
        self.start + chrono_dur(self.duration)
    }

    /// The hour bucket this segment belongs to.
    pub fn hour(&self) -> String {
        self.start.format(HOUR_FMT).to_string()
    }

    /// Just the filename, e.g. `05-30.250-2.000-full-AbC….ts`.
    pub fn file_name(&self) -> String {
        let minute = self.start.format("%M");
        let sec = self.start.format("%S%.3f");
        format!(
            "{}-{}-{:.3}-{}-{}{}",
            minute,
            sec,
            self.duration.as_secs_f64(),
            self.kind,
            self.hash,
            SEGMENT_EXT,
        )
    }

    /// Path relative to the archive base directory.
    pub fn rel_path(&self) -> PathBuf {
        PathBuf::from(&self.channel)
            .join(&self.quality)
            .join(self.hour())
            .join(self.file_name())
    }

    /// Parse a filename within a known (channel, quality, hour).
    ///
    /// Rejects anything that does not match the grammar; listings skip
    /// such entries rather than serving them.
    pub fn parse(
        channel: &str,
        quality: &str,
        hour: &str,
        file_name: &str,
    ) -> Result<Self, SegmentError> {
        let bad = |reason| SegmentError::BadFilename {
            name: file_name.to_string(),
            reason,
        };

        let hour_start = parse_hour(hour)?;
        let stem = file_name
            .strip_suffix(SEGMENT_EXT)
            .ok_or_else(|| bad("missing .ts extension"))?;

        // MM-SS.sss-DURATION-TYPE-HASH; the hash is base64 and never
        // contains '-', so split from the right.
        let (rest, hash) = stem.rsplit_once('-').ok_or_else(|| bad("missing hash"))?;
        let (rest, kind_str) = rest.rsplit_once('-').ok_or_else(|| bad("missing type"))?;
        let (rest, duration_str) = rest
            .rsplit_once('-')
            .ok_or_else(|| bad("missing duration"))?;
        let (minute_str, second_str) = rest
            .split_once('-')
            .ok_or_else(|| bad("missing minute-second"))?;

        let kind = SegmentKind::parse(kind_str).ok_or_else(|| bad("unknown type"))?;

        let minute: u32 = minute_str.parse().map_err(|_| bad("bad minute"))?;
        let second: f64 = second_str.parse().map_err(|_| bad("bad second"))?;
        if minute >= 60 || !(0.0..60.0).contains(&second) {
            return Err(bad("minute or second out of range"));
        }

        let duration: f64 = duration_str.parse().map_err(|_| bad("bad duration"))?;
        if !duration.is_finite() || duration < 0.0 {
            return Err(bad("negative or non-finite duration"));
        }

        if hash.is_empty() || !hash.bytes().all(is_base64_url_byte) {
            return Err(bad("hash is not base64url"));
        }

        let offset_ms = (minute as i64) * 60_000 + (second * 1000.0).round() as i64;
        let start = hour_start + ChronoDuration::milliseconds(offset_ms);

        Ok(Self {
            channel: channel.to_string(),
            quality: quality.to_string(),
            start,
            duration: Duration::from_secs_f64(duration),
            kind,
            hash: hash.to_string(),
        })
    }
}

impl PartialOrd for SegmentFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SegmentFile {
    /// Orders by start, then kind preference, then hash. This is the
    /// deterministic ordering every listing and selection uses.
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then(self.kind.rank().cmp(&other.kind.rank()))
            .then(self.hash.cmp(&other.hash))
    }
}

/// Format an hour bucket name for an instant.
pub fn format_hour(t: DateTime<Utc>) -> String {
    t.format(HOUR_FMT).to_string()
}

/// Parse an hour bucket name into the hour's start instant.
pub fn parse_hour(hour: &str) -> Result<DateTime<Utc>, SegmentError> {
    let with_minutes = format!("{hour}:00");
    let naive = NaiveDateTime::parse_from_str(&with_minutes, "%Y-%m-%dT%H:%M")
        .map_err(|_| SegmentError::BadHour(hour.to_string()))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Encode a SHA-256 digest the way filenames carry it.
pub fn encode_hash(digest: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(digest)
}

fn is_base64_url_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

pub(crate) fn chrono_dur(d: Duration) -> ChronoDuration {
    ChronoDuration::milliseconds(d.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn sample_hash() -> String {
        encode_hash(&Sha256::digest(b"sample"))
    }

    fn sample_segment() -> SegmentFile {
        SegmentFile {
            channel: "alpha".into(),
            quality: "source".into(),
            start: Utc.with_ymd_and_hms(2024, 11, 9, 0, 5, 30).unwrap()
                + ChronoDuration::milliseconds(250),
            duration: Duration::from_secs_f64(2.0),
            kind: SegmentKind::Full,
            hash: sample_hash(),
        }
    }

    #[test]
    fn format_parse_roundtrip() {
        let seg = sample_segment();
        let name = seg.file_name();
        let parsed = SegmentFile::parse("alpha", "source", &seg.hour(), &name).unwrap();
        assert_eq!(parsed, seg);
        assert_eq!(parsed.file_name(), name);
    }

    #[test]
    fn file_name_shape() {
        let seg = sample_segment();
        let name = seg.file_name();
        assert!(name.starts_with("05-30.250-2.000-full-"));
        assert!(name.ends_with(".ts"));
    }

    #[test]
    fn rel_path_layout() {
        let seg = sample_segment();
        let path = seg.rel_path();
        let parts: Vec<_> = path.iter().map(|p| p.to_str().unwrap()).collect();
        assert_eq!(parts[0], "alpha");
        assert_eq!(parts[1], "source");
        assert_eq!(parts[2], "2024-11-09T00");
    }

    #[test]
    fn parse_rejects_malformed_names() {
        for name in [
            "garbage",
            "05-30.250-2.000-full-ABC",            // no extension
            "05-30.250-2.000-unknown-ABC.ts",      // bad type
            "61-30.250-2.000-full-ABC.ts",         // minute out of range
            "05-61.000-2.000-full-ABC.ts",         // second out of range
            "05-30.250--2.000-full-ABC.ts",        // negative duration
            "05-30.250-2.000-full-no+padding=.ts", // non-url-safe hash
        ] {
            assert!(
                SegmentFile::parse("c", "q", "2024-11-09T00", name).is_err(),
                "accepted {name}"
            );
        }
    }

    #[test]
    fn parse_accepts_whole_seconds() {
        let seg = SegmentFile::parse("c", "q", "2024-11-09T00", "00-02-6.000-full-AAAA.ts")
            .unwrap();
        assert_eq!(
            seg.start,
            Utc.with_ymd_and_hms(2024, 11, 9, 0, 0, 2).unwrap()
        );
        assert_eq!(seg.duration, Duration::from_secs(6));
    }

    #[test]
    fn hour_roundtrip() {
        let t = Utc.with_ymd_and_hms(2024, 11, 9, 13, 0, 0).unwrap();
        assert_eq!(format_hour(t), "2024-11-09T13");
        assert_eq!(parse_hour("2024-11-09T13").unwrap(), t);
        assert!(parse_hour("2024-11-09").is_err());
    }

    #[test]
    fn ordering_prefers_full_then_hash() {
        let mut a = sample_segment();
        let mut b = sample_segment();
        a.kind = SegmentKind::Suspect;
        b.kind = SegmentKind::Full;
        assert!(b < a);

        a.kind = SegmentKind::Full;
        a.hash = "AAAA".into();
        b.hash = "BBBB".into();
        assert!(a < b);
    }
}
