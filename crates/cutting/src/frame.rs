//! Single-frame extraction.

use tokio_util::sync::CancellationToken;

use crate::error::CutError;
use crate::subprocess::{byte_channel, ffmpeg_command, pipe_command};
use crate::{RangeSource, SourceSegment};

/// Decode one PNG frame at `offset` seconds into the given segments.
///
/// The caller selects the segment(s) covering the instant; a frame is a
/// few hundred KB so buffering it whole is fine.
pub async fn extract_frame(
    segments: Vec<SourceSegment>,
    offset: f64,
    token: CancellationToken,
) -> Result<Vec<u8>, CutError> {
    let input = RangeSource {
        segments,
        skip: 0.0,
        duration: 0.0,
    };

    let mut cmd = ffmpeg_command();
    cmd.args([
        "-ss",
        &format!("{offset:.3}"),
        "-i",
        &concat_of(&input),
        "-vframes",
        "1",
        "-f",
        "image2",
        "-c:v",
        "png",
        "pipe:1",
    ]);

    collect(cmd, token).await
}

fn concat_of(range: &RangeSource) -> String {
    let joined = range
        .segments
        .iter()
        .map(|s| s.path.to_string_lossy())
        .collect::<Vec<_>>()
        .join("|");
    format!("concat:{joined}")
}

pub(crate) async fn collect(
    cmd: tokio::process::Command,
    token: CancellationToken,
) -> Result<Vec<u8>, CutError> {
    use tokio_stream::StreamExt;

    let (tx, mut stream) = byte_channel();
    let pipe = tokio::spawn(async move { pipe_command(cmd, &tx, &token).await });

    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    pipe.await
        .map_err(|_| CutError::Cancelled)
        .and_then(|r| r)?;
    Ok(out)
}
