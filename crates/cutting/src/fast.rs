//! Fast cut: byte concatenation of whole segments.
//!
//! No subprocess, no trimming. Within one range the segments are
//! contiguous MPEG-TS, and between ranges the client sees a hard cut.
//! The output may carry up to one segment of slack on each end of each
//! range; that is the documented contract of `type=fast`.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::subprocess::{ByteStream, byte_channel, pipe_file, send_error};
use crate::{CutError, RangeSource};

/// Stream the selected segments of every range, in order.
///
/// For a fixed archive and fixed request this is byte-identical across
/// runs and across nodes: the selection is deterministic and files are
/// content-addressed.
pub fn fast_cut(ranges: Vec<RangeSource>, token: CancellationToken) -> ByteStream {
    let (tx, stream) = byte_channel();

    tokio::spawn(async move {
        for range in &ranges {
            for segment in &range.segments {
                if let Err(error) = pipe_file(&segment.path, &tx, &token).await {
                    debug!(path = %segment.path.display(), %error, "Fast cut aborted");
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
    use crate::SourceSegment;
    use futures::StreamExt;

    async fn collect(mut stream: ByteStream) -> Result<Vec<u8>, CutError> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    fn source(dir: &std::path::Path, files: &[(&str, &[u8])]) -> RangeSource {
        let segments = files
            .iter()
            .map(|(name, bytes)| {
                let path = dir.join(name);
                std::fs::write(&path, bytes).unwrap();
                SourceSegment {
                    path,
                    duration: 2.0,
                }
            })
            .collect();
        RangeSource {
            segments,
            skip: 0.0,
            duration: 4.0,
        }
    }

    #[tokio::test]
    async fn concatenates_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let range = source(tmp.path(), &[("a.ts", b"AAAA"), ("b.ts", b"BBBB")]);
        let bytes = collect(fast_cut(vec![range], CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(bytes, b"AAAABBBB");
    }

    #[tokio::test]
    async fn output_is_deterministic_across_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let range = source(tmp.path(), &[("a.ts", b"AAAA"), ("b.ts", b"BBBB")]);
        let first = collect(fast_cut(vec![range.clone()], CancellationToken::new()))
            .await
            .unwrap();
        let second = collect(fast_cut(vec![range], CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn multiple_ranges_hard_concatenate() {
        let tmp = tempfile::tempdir().unwrap();
        let first = source(tmp.path(), &[("a.ts", b"1111")]);
        let second = source(tmp.path(), &[("b.ts", b"2222")]);
        let bytes = collect(fast_cut(vec![first, second], CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(bytes, b"11112222");
    }

    #[tokio::test]
    async fn missing_file_surfaces_an_error() {
        let range = RangeSource {
            segments: vec![SourceSegment {
                path: "/nonexistent/segment.ts".into(),
                duration: 2.0,
            }],
            skip: 0.0,
            duration: 2.0,
        };
        let result = collect(fast_cut(vec![range], CancellationToken::new())).await;
        assert!(matches!(result, Err(CutError::Io { .. })));
    }

    #[tokio::test]
    async fn cancellation_stops_the_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let range = source(tmp.path(), &[("a.ts", b"AAAA")]);
        let token = CancellationToken::new();
        token.cancel();
        let result = collect(fast_cut(vec![range], token)).await;
        assert!(matches!(result, Err(CutError::Cancelled)));
    }
}
