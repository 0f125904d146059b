use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("invalid segment filename {name:?}: {reason}")]
    BadFilename { name: String, reason: &'static str },

    #[error("invalid hour directory name {0:?}")]
    BadHour(String),

    #[error("content hashes to {actual}, expected {declared}")]
    HashMismatch { declared: String, actual: String },

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SegmentError {
    pub fn io(op: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<common::fs::IoError> for SegmentError {
    fn from(e: common::fs::IoError) -> Self {
        Self::Io {
            op: e.op,
            path: e.path,
            source: e.source,
        }
    }
}
