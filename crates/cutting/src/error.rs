use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CutError {
    #[error("no ranges requested")]
    NoRanges,

    #[error("range {index} ends at or before it starts")]
    EmptyRange { index: usize },

    #[error("expected {expected} transitions for {ranges} ranges, got {actual}")]
    TransitionArity {
        ranges: usize,
        expected: usize,
        actual: usize,
    },

    #[error("unknown transition type {0:?}")]
    UnknownTransition(String),

    #[error("transition {index} duration {duration}s is not positive")]
    NonPositiveTransition { index: usize, duration: f64 },

    #[error(
        "transition {index} duration {duration}s exceeds an adjoining range ({shorter}s)"
    )]
    TransitionTooLong {
        index: usize,
        duration: f64,
        shorter: f64,
    },

    #[error("fast cuts support neither transitions nor crop")]
    FastCutUnsupported,

    #[error("requested range has {count} uncovered interval(s) and holes are not allowed")]
    Holes { count: usize },

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode pipeline exited with status {status}: {stderr}")]
    EncodeFailed { status: i32, stderr: String },

    #[error("cut cancelled")]
    Cancelled,

    #[error("bad image data: {0}")]
    Image(#[from] image::ImageError),
}

impl CutError {
    pub fn io(op: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the failure indicates a bad request rather than a node
    /// or environment problem.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            CutError::NoRanges
                | CutError::EmptyRange { .. }
                | CutError::TransitionArity { .. }
                | CutError::UnknownTransition(_)
                | CutError::NonPositiveTransition { .. }
                | CutError::TransitionTooLong { .. }
                | CutError::FastCutUnsupported
                | CutError::Holes { .. }
        )
    }
}
