use std::path::PathBuf;

/// Every failure the reconstruction core can report.
///
/// Shape, window, crop and config errors are raised before any volume I/O.
/// Read and cancellation errors carry the number of slices that were fully
/// sunk before the job stopped.
#[derive(thiserror::Error, Debug)]
pub enum ReconError {
    #[error("cannot parse volume dimensions from file name {name:?}: {reason}")]
    ShapeParse { name: String, reason: String },
    #[error(
        "file {path:?} holds {file_bytes} bytes, not a multiple of the {expected_bytes} bytes implied by its dimensions"
    )]
    ShapeMismatch {
        path: PathBuf,
        file_bytes: u64,
        expected_bytes: u64,
    },
    #[error("unrecognised windowing key {0:?}")]
    UnknownWindowKey(String),
    #[error("cannot crop {dc} DC + {hf} HF samples from a {half_length}-sample half spectrum")]
    InvalidCrop {
        dc: usize,
        hf: usize,
        half_length: usize,
    },
    #[error("invalid reconstruction parameter: {0}")]
    InvalidConfig(String),
    #[error(
        "short read at slice {slice}: expected {expected} bytes, got {actual} ({completed} slices completed)"
    )]
    TruncatedRead {
        slice: usize,
        expected: usize,
        actual: usize,
        completed: usize,
    },
    #[error("processing cancelled after {completed} slices")]
    Cancelled { completed: usize },
    #[error("buffer shape error")]
    Shape(#[from] ndarray::ShapeError),
    #[error("failed to build worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to parse reconstruction parameters")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReconError>;
