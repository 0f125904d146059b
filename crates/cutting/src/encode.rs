//! The re-encoding cut pipelines: full, webm, and smart.
//!
//! Full and webm run the entire request through one ffmpeg invocation:
//! per-range trims, xfade/acrossfade joins for named transitions, an
//! optional crop, then the output codec. Smart avoids the encoder
//! wherever it can: aligned ranges are raw concatenation, unaligned
//! ranges re-encode only the boundary segments and stream-copy the
//! interior.

use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::request::{Rect, Transition};
use crate::subprocess::{
    ByteStream, byte_channel, ffmpeg_command, pipe_command, pipe_file, send_error,
};
use crate::{RangeSource, SourceSegment};

/// How close to a segment edge a requested endpoint must land for smart
/// mode to skip re-encoding. Tunable; nothing outside this module may
/// depend on the exact value.
pub const SMART_BOUNDARY_EPSILON: f64 = 0.1;

/// Output codec family for encoded cuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    MpegTs,
    Webm,
}

impl OutputFormat {
    fn codec_args(self) -> &'static [&'static str] {
        match self {
            OutputFormat::MpegTs => &[
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-c:a",
                "aac",
                "-f",
                "mpegts",
            ],
            OutputFormat::Webm => &[
                "-c:v",
                "libvpx-vp9",
                "-b:v",
                "0",
                "-crf",
                "32",
                "-c:a",
                "libopus",
                "-f",
                "webm",
            ],
        }
    }
}

/// ffmpeg `concat:` input over a range's segment files.
fn concat_input(segments: &[SourceSegment]) -> String {
    let joined = segments
        .iter()
        .map(|s| s.path.to_string_lossy())
        .collect::<Vec<_>>()
        .join("|");
    format!("concat:{joined}")
}

fn fmt_secs(v: f64) -> String {
    format!("{v:.3}")
}

/// Build the filter_complex graph joining all ranges.
///
/// Returns (graph, video label, audio label). Input `i` is range `i`'s
/// concatenated segments; each is trimmed to the exact request, then
/// folded left to right with concat (null transition) or
/// xfade/acrossfade (named transition). The xfade offset is the
/// accumulated output length minus the overlap.
pub fn build_filtergraph(
    ranges: &[RangeSource],
    transitions: &[Option<Transition>],
    crop: Option<Rect>,
) -> (String, String, String) {
    let mut parts = Vec::new();

    for (i, range) in ranges.iter().enumerate() {
        let start = fmt_secs(range.skip);
        let end = fmt_secs(range.skip + range.duration);
        parts.push(format!(
            "[{i}:v]trim=start={start}:end={end},setpts=PTS-STARTPTS[v{i}]"
        ));
        parts.push(format!(
            "[{i}:a]atrim=start={start}:end={end},asetpts=PTS-STARTPTS[a{i}]"
        ));
    }

    let mut video = "v0".to_string();
    let mut audio = "a0".to_string();
    let mut acc_len = ranges[0].duration;

    for (i, transition) in transitions.iter().enumerate() {
        let next = i + 1;
        match transition {
            None => {
                parts.push(format!(
                    "[{video}][{audio}][v{next}][a{next}]concat=n=2:v=1:a=1[vj{next}][aj{next}]"
                ));
                acc_len += ranges[next].duration;
            }
            Some(transition) => {
                let offset = fmt_secs(acc_len - transition.duration);
                let duration = fmt_secs(transition.duration);
                parts.push(format!(
                    "[{video}][v{next}]xfade=transition={}:duration={duration}:offset={offset}[vj{next}]",
                    transition.kind.filter_name()
                ));
                parts.push(format!(
                    "[{audio}][a{next}]acrossfade=d={duration}[aj{next}]"
                ));
                acc_len += ranges[next].duration - transition.duration;
            }
        }
        video = format!("vj{next}");
        audio = format!("aj{next}");
    }

    if let Some(rect) = crop {
        parts.push(format!(
            "[{video}]crop={}:{}:{}:{}[vcrop]",
            rect.width, rect.height, rect.x, rect.y
        ));
        video = "vcrop".to_string();
    }

    (parts.join(";"), video, audio)
}

/// Full argument list (after the base flags) for an encoded cut.
pub fn encode_args(
    ranges: &[RangeSource],
    transitions: &[Option<Transition>],
    crop: Option<Rect>,
    format: OutputFormat,
) -> Vec<String> {
    let mut args = Vec::new();
    for range in ranges {
        args.push("-i".to_string());
        args.push(concat_input(&range.segments));
    }

    let (graph, video, audio) = build_filtergraph(ranges, transitions, crop);
    args.push("-filter_complex".to_string());
    args.push(graph);
    args.push("-map".to_string());
    args.push(format!("[{video}]"));
    args.push("-map".to_string());
    args.push(format!("[{audio}]"));
    args.extend(format.codec_args().iter().map(|s| s.to_string()));
    args.push("pipe:1".to_string());
    args
}

/// Run a full or webm cut, streaming the container bytes.
pub fn encoded_cut(
    ranges: Vec<RangeSource>,
    transitions: Vec<Option<Transition>>,
    crop: Option<Rect>,
    format: OutputFormat,
    token: CancellationToken,
) -> ByteStream {
    let (tx, stream) = byte_channel();

    tokio::spawn(async move {
        let mut cmd = ffmpeg_command();
        cmd.args(encode_args(&ranges, &transitions, crop, format));
        if let Err(error) = pipe_command(cmd, &tx, &token).await {
            send_error(&tx, error).await;
        }
    });

    stream
}

/// One piece of a smart cut's output.
#[derive(Debug, Clone, PartialEq)]
pub enum SmartPart {
    /// Stream-copy the file's bytes untouched.
    Raw(PathBuf),
    /// Re-encode a slice of one segment.
    Encode {
        path: PathBuf,
        start: f64,
        duration: f64,
    },
}

/// Decide which pieces of a range need the encoder.
///
/// The head is re-encoded when the range starts inside the first
/// segment, the tail when it ends inside the last; everything between
/// is raw. A range aligned on both edges is entirely raw.
pub fn plan_range_parts(range: &RangeSource) -> Vec<SmartPart> {
    let mut parts = Vec::new();
    if range.segments.is_empty() {
        return parts;
    }

    let total = range.segments_duration();
    let end_in_total = range.skip + range.duration;

    if range.segments.len() == 1 {
        let only = &range.segments[0];
        let aligned_start = range.skip <= SMART_BOUNDARY_EPSILON;
        let aligned_end = (only.duration - end_in_total).abs() <= SMART_BOUNDARY_EPSILON
            || end_in_total >= only.duration;
        if aligned_start && aligned_end {
            parts.push(SmartPart::Raw(only.path.clone()));
        } else {
            parts.push(SmartPart::Encode {
                path: only.path.clone(),
                start: range.skip,
                duration: range.duration,
            });
        }
        return parts;
    }

    let first = &range.segments[0];
    let last = &range.segments[range.segments.len() - 1];
    let last_offset = total - last.duration;
    // Where the range ends within the last segment.
    let tail_len = end_in_total - last_offset;

    if range.skip <= SMART_BOUNDARY_EPSILON {
        parts.push(SmartPart::Raw(first.path.clone()));
    } else {
        parts.push(SmartPart::Encode {
            path: first.path.clone(),
            start: range.skip,
            duration: first.duration - range.skip,
        });
    }

    for segment in &range.segments[1..range.segments.len() - 1] {
        parts.push(SmartPart::Raw(segment.path.clone()));
    }

    if tail_len >= last.duration - SMART_BOUNDARY_EPSILON {
        parts.push(SmartPart::Raw(last.path.clone()));
    } else {
        parts.push(SmartPart::Encode {
            path: last.path.clone(),
            start: 0.0,
            duration: tail_len,
        });
    }

    parts
}

/// Arguments to re-encode one slice of one segment to MPEG-TS.
pub fn encode_part_args(part_path: &std::path::Path, start: f64, duration: f64) -> Vec<String> {
    let mut args = vec!["-i".to_string(), part_path.to_string_lossy().into_owned()];
    if start > 0.0 {
        args.push("-ss".to_string());
        args.push(fmt_secs(start));
    }
    args.push("-t".to_string());
    args.push(fmt_secs(duration));
    args.extend(
        OutputFormat::MpegTs
            .codec_args()
            .iter()
            .map(|s| s.to_string()),
    );
    args.push("pipe:1".to_string());
    args
}

/// Smart cut: boundary-accurate without paying for a full re-encode.
///
/// Named transitions and crops need overlap rendering across ranges, so
/// those requests take the full pipeline; plain ranges get the hybrid
/// treatment per range, hard-concatenated.
pub fn smart_cut(
    ranges: Vec<RangeSource>,
    transitions: Vec<Option<Transition>>,
    crop: Option<Rect>,
    token: CancellationToken,
) -> ByteStream {
    if transitions.iter().any(Option::is_some) || crop.is_some() {
        return encoded_cut(ranges, transitions, crop, OutputFormat::MpegTs, token);
    }

    let (tx, stream) = byte_channel();
    tokio::spawn(async move {
        for range in &ranges {
            for part in plan_range_parts(range) {
                let result = match part {
                    SmartPart::Raw(path) => pipe_file(&path, &tx, &token).await,
                    SmartPart::Encode {
                        path,
                        start,
                        duration,
                    } => {
                        debug!(path = %path.display(), start, duration, "Re-encoding boundary segment");
                        let mut cmd = ffmpeg_command();
                        cmd.args(encode_part_args(&path, start, duration));
                        pipe_command(cmd, &tx, &token).await
                    }
                };
                if let Err(error) = result {
                    send_error(&tx, error).await;
                    return;
                }
            }
        }
    });
    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TransitionKind;

    fn seg(name: &str, duration: f64) -> SourceSegment {
        SourceSegment {
            path: PathBuf::from(name),
            duration,
        }
    }

    fn range(segments: Vec<SourceSegment>, skip: f64, duration: f64) -> RangeSource {
        RangeSource {
            segments,
            skip,
            duration,
        }
    }

    #[test]
    fn concat_input_joins_paths() {
        let input = concat_input(&[seg("/a/x.ts", 2.0), seg("/a/y.ts", 2.0)]);
        assert_eq!(input, "concat:/a/x.ts|/a/y.ts");
    }

    #[test]
    fn filtergraph_single_range_trims_and_resets_pts() {
        let ranges = [range(vec![seg("a.ts", 2.0), seg("b.ts", 2.0)], 0.5, 3.0)];
        let (graph, video, audio) = build_filtergraph(&ranges, &[], None);
        assert_eq!(video, "v0");
        assert_eq!(audio, "a0");
        assert!(graph.contains("[0:v]trim=start=0.500:end=3.500,setpts=PTS-STARTPTS[v0]"));
        assert!(graph.contains("[0:a]atrim=start=0.500:end=3.500,asetpts=PTS-STARTPTS[a0]"));
    }

    #[test]
    fn filtergraph_fade_places_offset_before_overlap() {
        // Two 2 s ranges joined by a 1 s fade: output is 3 s and the
        // fade starts at 1 s into the output.
        let ranges = [
            range(vec![seg("a.ts", 2.0)], 0.0, 2.0),
            range(vec![seg("b.ts", 2.0)], 0.0, 2.0),
        ];
        let transitions = [Some(Transition {
            kind: TransitionKind::Fade,
            duration: 1.0,
        })];
        let (graph, video, audio) = build_filtergraph(&ranges, &transitions, None);
        assert!(
            graph.contains("[v0][v1]xfade=transition=fade:duration=1.000:offset=1.000[vj1]"),
            "{graph}"
        );
        assert!(graph.contains("[a0][a1]acrossfade=d=1.000[aj1]"));
        assert_eq!(video, "vj1");
        assert_eq!(audio, "aj1");
    }

    #[test]
    fn filtergraph_null_transition_concatenates() {
        let ranges = [
            range(vec![seg("a.ts", 2.0)], 0.0, 2.0),
            range(vec![seg("b.ts", 2.0)], 0.0, 2.0),
        ];
        let (graph, video, _) = build_filtergraph(&ranges, &[None], None);
        assert!(graph.contains("[v0][a0][v1][a1]concat=n=2:v=1:a=1[vj1][aj1]"));
        assert_eq!(video, "vj1");
    }

    #[test]
    fn filtergraph_crop_is_last() {
        let ranges = [range(vec![seg("a.ts", 2.0)], 0.0, 2.0)];
        let rect = Rect {
            x: 10,
            y: 20,
            width: 640,
            height: 360,
        };
        let (graph, video, _) = build_filtergraph(&ranges, &[], Some(rect));
        assert!(graph.ends_with("[v0]crop=640:360:10:20[vcrop]"));
        assert_eq!(video, "vcrop");
    }

    #[test]
    fn xfade_offsets_accumulate_across_ranges() {
        let ranges = [
            range(vec![seg("a.ts", 4.0)], 0.0, 4.0),
            range(vec![seg("b.ts", 4.0)], 0.0, 4.0),
            range(vec![seg("c.ts", 4.0)], 0.0, 4.0),
        ];
        let fade = |d| {
            Some(Transition {
                kind: TransitionKind::Fade,
                duration: d,
            })
        };
        let (graph, _, _) = build_filtergraph(&ranges, &[fade(1.0), fade(2.0)], None);
        // After the first join the output is 4 + 4 - 1 = 7 s, so the
        // second fade starts at 7 - 2 = 5 s.
        assert!(graph.contains("offset=3.000"), "{graph}");
        assert!(graph.contains("offset=5.000"), "{graph}");
    }

    #[test]
    fn encode_args_shape() {
        let ranges = [range(vec![seg("a.ts", 2.0)], 0.0, 2.0)];
        let args = encode_args(&ranges, &[], None, OutputFormat::MpegTs);
        assert_eq!(args[0], "-i");
        assert_eq!(args[1], "concat:a.ts");
        assert!(args.contains(&"-filter_complex".to_string()));
        assert!(args.contains(&"mpegts".to_string()));
        assert_eq!(args.last().unwrap(), "pipe:1");

        let webm = encode_args(&ranges, &[], None, OutputFormat::Webm);
        assert!(webm.contains(&"libvpx-vp9".to_string()));
        assert!(webm.contains(&"webm".to_string()));
    }

    #[test]
    fn aligned_range_plans_all_raw() {
        let r = range(vec![seg("a.ts", 2.0), seg("b.ts", 2.0)], 0.0, 4.0);
        let parts = plan_range_parts(&r);
        assert_eq!(
            parts,
            vec![
                SmartPart::Raw(PathBuf::from("a.ts")),
                SmartPart::Raw(PathBuf::from("b.ts")),
            ]
        );
    }

    #[test]
    fn unaligned_range_encodes_only_boundaries() {
        // Request 2.0 .. 8.5 over 2 s segments starting at 0: segments
        // S1..S4 selected, skip 0 into S1 (aligned head), tail ends 0.5 s
        // into S4.
        let r = range(
            vec![
                seg("s1.ts", 2.0),
                seg("s2.ts", 2.0),
                seg("s3.ts", 2.0),
                seg("s4.ts", 2.0),
            ],
            0.0,
            6.5,
        );
        let parts = plan_range_parts(&r);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], SmartPart::Raw(PathBuf::from("s1.ts")));
        assert_eq!(parts[1], SmartPart::Raw(PathBuf::from("s2.ts")));
        assert_eq!(parts[2], SmartPart::Raw(PathBuf::from("s3.ts")));
        match &parts[3] {
            SmartPart::Encode {
                path,
                start,
                duration,
            } => {
                assert_eq!(path, &PathBuf::from("s4.ts"));
                assert_eq!(*start, 0.0);
                assert!((duration - 0.5).abs() < 1e-9);
            }
            other => panic!("expected encode tail, got {other:?}"),
        }
    }

    #[test]
    fn hole_collapsed_duration_keeps_the_tail_trim() {
        // Selection spliced a 2 s hole out of a nominal 6.5 s request:
        // three 2 s segments remain and only 0.5 s of the last one is
        // wanted. The tail must stay a trimmed encode, not a full copy
        // of the last segment.
        let r = range(
            vec![seg("s1.ts", 2.0), seg("s3.ts", 2.0), seg("s4.ts", 2.0)],
            0.0,
            4.5,
        );
        let parts = plan_range_parts(&r);
        assert_eq!(parts[0], SmartPart::Raw(PathBuf::from("s1.ts")));
        assert_eq!(parts[1], SmartPart::Raw(PathBuf::from("s3.ts")));
        match &parts[2] {
            SmartPart::Encode {
                path,
                start,
                duration,
            } => {
                assert_eq!(path, &PathBuf::from("s4.ts"));
                assert_eq!(*start, 0.0);
                assert!((duration - 0.5).abs() < 1e-9);
            }
            other => panic!("expected encode tail, got {other:?}"),
        }
    }

    #[test]
    fn unaligned_head_is_encoded() {
        let r = range(vec![seg("s1.ts", 2.0), seg("s2.ts", 2.0)], 0.5, 3.5);
        let parts = plan_range_parts(&r);
        match &parts[0] {
            SmartPart::Encode {
                start, duration, ..
            } => {
                assert!((start - 0.5).abs() < 1e-9);
                assert!((duration - 1.5).abs() < 1e-9);
            }
            other => panic!("expected encode head, got {other:?}"),
        }
        assert_eq!(parts[1], SmartPart::Raw(PathBuf::from("s2.ts")));
    }

    #[test]
    fn single_segment_subrange_is_one_encode() {
        let r = range(vec![seg("s1.ts", 6.0)], 1.0, 2.0);
        let parts = plan_range_parts(&r);
        assert_eq!(
            parts,
            vec![SmartPart::Encode {
                path: PathBuf::from("s1.ts"),
                start: 1.0,
                duration: 2.0,
            }]
        );
    }

    #[test]
    fn encode_part_args_omit_zero_seek() {
        let args = encode_part_args(std::path::Path::new("x.ts"), 0.0, 0.5);
        assert!(!args.contains(&"-ss".to_string()));
        let args = encode_part_args(std::path::Path::new("x.ts"), 1.25, 0.75);
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "1.250");
    }
}
