//! Audio waveform rendering.

use tokio_util::sync::CancellationToken;

use crate::SourceSegment;
use crate::error::CutError;
use crate::frame::collect;
use crate::subprocess::ffmpeg_command;

/// Render a PNG waveform of the given segments at `width`x`height`.
pub async fn render_waveform(
    segments: Vec<SourceSegment>,
    width: u32,
    height: u32,
    token: CancellationToken,
) -> Result<Vec<u8>, CutError> {
    let joined = segments
        .iter()
        .map(|s| s.path.to_string_lossy())
        .collect::<Vec<_>>()
        .join("|");

    let mut cmd = ffmpeg_command();
    cmd.args([
        "-i",
        &format!("concat:{joined}"),
        "-filter_complex",
        &format!("showwavespic=s={width}x{height}:colors=white"),
        "-frames:v",
        "1",
        "-f",
        "image2",
        "-c:v",
        "png",
        "pipe:1",
    ]);

    collect(cmd, token).await
}
