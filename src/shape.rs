use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ReconError, Result};

/// Raw samples are stored as 16-bit unsigned integers.
pub const SAMPLE_BYTES: usize = 2;

/// Dimensions of a raw volume, as encoded in its file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub depth_samples: usize,
    pub lateral_width: usize,
    pub lateral_count: usize,
}

impl VolumeDescriptor {
    pub fn new(depth_samples: usize, lateral_width: usize, lateral_count: usize) -> Self {
        Self {
            depth_samples,
            lateral_width,
            lateral_count,
        }
    }

    pub fn samples_per_slice(&self) -> usize {
        self.depth_samples * self.lateral_width
    }

    pub fn slice_bytes(&self) -> usize {
        self.samples_per_slice() * SAMPLE_BYTES
    }

    pub fn volume_bytes(&self) -> u64 {
        self.slice_bytes() as u64 * self.lateral_count as u64
    }

    /// Processing index whose reconstruction is kept as the middle cross-section.
    pub fn middle_slice_index(&self) -> Option<usize> {
        (self.lateral_count / 2).checked_sub(1)
    }
}

impl fmt::Display for VolumeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}",
            self.depth_samples, self.lateral_width, self.lateral_count
        )
    }
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("static dimension regex"))
}

/// Parses `(depth, width, count)` from a file name such as `scan_13312x512x512.bin`.
///
/// All underscore-delimited segments containing an `x` are joined and split on
/// `x`; every number found in the resulting tokens is taken in order. Only the
/// basename is inspected, so directory names never leak into the result.
pub fn parse_dimensions(file_name: &str) -> Result<VolumeDescriptor> {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let parse_err = |reason: String| ReconError::ShapeParse {
        name: base.to_string(),
        reason,
    };

    let block: String = base.split('_').filter(|s| s.contains('x')).collect();
    if block.is_empty() {
        return Err(parse_err("no x-separated dimension block".into()));
    }

    let mut dims = Vec::with_capacity(3);
    for token in block.split('x') {
        for found in number_pattern().find_iter(token) {
            let value = found
                .as_str()
                .parse::<usize>()
                .map_err(|_| parse_err(format!("{:?} is not an unsigned integer", found.as_str())))?;
            dims.push(value);
        }
    }

    match dims.as_slice() {
        [depth, width, count] => {
            if *depth == 0 || *width == 0 || *count == 0 {
                return Err(parse_err(format!("dimensions must be positive, got {dims:?}")));
            }
            Ok(VolumeDescriptor::new(*depth, *width, *count))
        }
        _ => Err(parse_err(format!(
            "expected three dimensions, found {}",
            dims.len()
        ))),
    }
}

/// Resolves a volume's dimensions from its path and checks them against the file size.
pub fn resolve(path: &Path) -> Result<VolumeDescriptor> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ReconError::ShapeParse {
            name: path.display().to_string(),
            reason: "path has no UTF-8 file name".into(),
        })?;
    let descriptor = parse_dimensions(name)?;

    let file_bytes = std::fs::metadata(path)?.len();
    let expected_bytes = descriptor.volume_bytes();
    if file_bytes == 0 || file_bytes % expected_bytes != 0 {
        return Err(ReconError::ShapeMismatch {
            path: path.to_path_buf(),
            file_bytes,
            expected_bytes,
        });
    }
    if file_bytes != expected_bytes {
        log::warn!(
            "{} holds {} volumes of {}; only the first is processed",
            path.display(),
            file_bytes / expected_bytes,
            descriptor
        );
    }
    Ok(descriptor)
}
