use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2};

use crate::error::{ReconError, Result};
use crate::pipeline::ReconstructedCrossSection;
use crate::shape::VolumeDescriptor;
use crate::utils::Endianness;

/// Suffix of the side-car file holding captured raw A-scans.
pub const RAW_ASCAN_SUFFIX: &str = "_RawAscans.bin";

/// Append-only output for reconstructed slices.
///
/// Only whole slices are ever committed: a failed append or an abandoned job
/// truncates the file back to the last slice boundary.
pub struct CrossSectionWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    slices_written: usize,
    committed_bytes: u64,
}

impl CrossSectionWriter {
    /// Creates (or truncates) `path`; slices are then appended in call order.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            slices_written: 0,
            committed_bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn slices_written(&self) -> usize {
        self.slices_written
    }

    pub fn committed_bytes(&self) -> u64 {
        self.committed_bytes
    }

    pub fn append_slice(&mut self, encoded: &[u8]) -> Result<()> {
        if let Err(e) = self.writer.write_all(encoded) {
            self.rollback();
            return Err(e.into());
        }
        self.committed_bytes += encoded.len() as u64;
        self.slices_written += 1;
        Ok(())
    }

    fn rollback(&mut self) {
        let _ = self.writer.flush();
        let _ = self.writer.get_ref().set_len(self.committed_bytes);
    }

    /// Flushes and cuts the file at the last committed slice.
    pub fn abandon(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        self.writer.get_ref().set_len(self.committed_bytes)?;
        Ok(self.path)
    }

    pub fn finalize(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(self.path)
    }
}

/// Appends raw A-scans `[lateral - radius, lateral + radius]` (clamped to the
/// slice) to the side-car file, depth-major per column.
pub fn append_raw_columns(
    path: &Path,
    raw: ArrayView2<'_, u16>,
    lateral: usize,
    radius: usize,
    endianness: Endianness,
) -> Result<usize> {
    let width = raw.ncols();
    if lateral >= width {
        return Err(ReconError::InvalidConfig(format!(
            "capture column {lateral} is outside a {width}-wide cross-section"
        )));
    }
    let first = lateral.saturating_sub(radius);
    let last = (lateral + radius).min(width - 1);

    let mut bytes = Vec::with_capacity((last - first + 1) * raw.nrows() * 2);
    for col in first..=last {
        endianness.encode_u16(raw.column(col).iter().copied(), &mut bytes);
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&bytes)?;
    Ok(last - first + 1)
}

/// `dir/stem_RawAscans.bin` next to the input volume.
pub fn raw_ascan_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}{RAW_ASCAN_SUFFIX}"))
}

/// Output name for a reconstructed volume: `recon_<prefix>_<DxWxC>.bin`.
///
/// The last underscore segment of the input name is taken to be the
/// dimension block and is replaced by the reconstructed dimensions.
pub fn recon_output_path(input: &Path, reconstructed: &VolumeDescriptor) -> PathBuf {
    let name = input
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let segments: Vec<&str> = name.split('_').collect();
    let mut prefix = String::from("recon_");
    for seg in &segments[..segments.len().saturating_sub(1)] {
        prefix.push_str(seg);
        prefix.push('_');
    }
    input.with_file_name(format!("{prefix}{reconstructed}.bin"))
}

/// `path` with `_AxB` appended to its stem, keeping the extension.
pub fn with_dims_suffix(path: &Path, dims: (usize, usize)) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bin".to_string());
    path.with_file_name(format!("{stem}_{}x{}.{ext}", dims.0, dims.1))
}

/// Writes a 2-D `f64` map flat in C order; the file name gains its shape.
pub fn write_flat_f64(path: &Path, map: &Array2<f64>, endianness: Endianness) -> Result<PathBuf> {
    let target = with_dims_suffix(path, map.dim());
    let mut bytes = Vec::with_capacity(map.len() * 8);
    endianness.encode_f64(map.iter().copied(), &mut bytes);
    std::fs::write(&target, bytes)?;
    Ok(target)
}

/// Writes one reconstructed cross-section flat; the file name gains its shape.
pub fn write_cross_section(
    path: &Path,
    slice: &ReconstructedCrossSection,
    endianness: Endianness,
) -> Result<PathBuf> {
    let target = with_dims_suffix(path, slice.dim());
    let mut bytes = Vec::new();
    slice.encode_into(endianness, &mut bytes);
    std::fs::write(&target, bytes)?;
    Ok(target)
}
