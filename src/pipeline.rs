use ndarray::{s, Array2, ArrayView2, Axis};
use num_complex::Complex;
use rayon::prelude::*;

use crate::config::ReconstructionConfig;
use crate::enface::{project_columns, EnfaceProjection};
use crate::error::{ReconError, Result};
use crate::spectral::build_complex_correction;
use crate::utils::{Endianness, FftHelper};

/// Below this many padded samples per slice the column FFTs stay on the calling thread.
const PARALLEL_COLUMN_THRESHOLD: usize = 1 << 16;

/// One reconstructed cross-section, `(cropped_depth, lateral_width)`.
#[derive(Clone, Debug, PartialEq)]
pub enum ReconstructedCrossSection {
    /// Display-scaled 8-bit intensities.
    Display(Array2<u8>),
    /// Unclipped `20·log10|x|` values.
    LogMagnitude(Array2<f64>),
}

impl ReconstructedCrossSection {
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::Display(a) => a.dim(),
            Self::LogMagnitude(a) => a.dim(),
        }
    }

    pub fn depth(&self) -> usize {
        self.dim().0
    }

    pub fn width(&self) -> usize {
        self.dim().1
    }

    pub fn sample_bytes(&self) -> usize {
        match self {
            Self::Display(_) => 1,
            Self::LogMagnitude(_) => 8,
        }
    }

    pub fn byte_len(&self) -> usize {
        let (d, w) = self.dim();
        d * w * self.sample_bytes()
    }

    pub fn to_f64(&self) -> Array2<f64> {
        match self {
            Self::Display(a) => a.mapv(f64::from),
            Self::LogMagnitude(a) => a.clone(),
        }
    }

    /// Collapses the depth axis into one value per lateral position.
    pub fn project(&self, kind: EnfaceProjection) -> Vec<f64> {
        match self {
            Self::Display(a) => project_columns(a.mapv(f64::from).view(), kind),
            Self::LogMagnitude(a) => project_columns(a.view(), kind),
        }
    }

    /// Appends the slice in C order, lateral index fastest.
    pub fn encode_into(&self, endianness: Endianness, out: &mut Vec<u8>) {
        out.reserve(self.byte_len());
        match self {
            Self::Display(a) => out.extend(a.iter().copied()),
            Self::LogMagnitude(a) => endianness.encode_f64(a.iter().copied(), out),
        }
    }
}

/// Stage 1: removes the mean A-scan (averaged over the lateral axis) from every column.
pub fn subtract_background(raw: ArrayView2<'_, u16>) -> Array2<f64> {
    let mut buffer = raw.mapv(f64::from);
    if let Some(mean) = buffer.mean_axis(Axis(1)) {
        buffer -= &mean.insert_axis(Axis(1));
    }
    buffer
}

/// Stage 2: multiplies every A-scan by the complex correction vector.
pub fn apply_correction(
    buffer: &Array2<f64>,
    correction: &[Complex<f64>],
) -> Result<Array2<Complex<f64>>> {
    if correction.len() != buffer.nrows() {
        return Err(ReconError::InvalidConfig(format!(
            "correction vector has {} samples, A-scans have {}",
            correction.len(),
            buffer.nrows()
        )));
    }
    Ok(Array2::from_shape_fn(buffer.dim(), |(d, l)| {
        correction[d] * buffer[[d, l]]
    }))
}

fn map_columns<T, F>(width: usize, work: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if work >= PARALLEL_COLUMN_THRESHOLD && rayon::current_thread_index().is_none() {
        (0..width).into_par_iter().map(f).collect()
    } else {
        (0..width).map(f).collect()
    }
}

/// Stage 3: prepends zeros up to the plan length and transforms each A-scan.
pub fn pad_and_transform(
    corrected: &Array2<Complex<f64>>,
    fft: &FftHelper,
) -> Result<Array2<Complex<f64>>> {
    let (depth, width) = corrected.dim();
    let padded_len = fft.len();
    if padded_len < depth {
        return Err(ReconError::InvalidConfig(format!(
            "FFT length {padded_len} is shorter than the {depth}-sample A-scan"
        )));
    }
    let pad = padded_len - depth;

    let columns = map_columns(width, padded_len * width, |col| {
        let mut line = vec![Complex::new(0.0, 0.0); padded_len];
        for (dst, src) in line[pad..].iter_mut().zip(corrected.column(col).iter()) {
            *dst = *src;
        }
        fft.forward_c2c(&mut line).map(|_| line)
    });
    let columns = columns.into_iter().collect::<Result<Vec<_>>>()?;

    Ok(Array2::from_shape_fn((padded_len, width), |(d, l)| {
        columns[l][d]
    }))
}

/// Stage 4: keeps the positive-frequency half in dB and crops DC / HF samples.
pub fn log_magnitude_cropped(
    spectrum: &Array2<Complex<f64>>,
    dc_crop: usize,
    hf_crop: usize,
) -> Result<Array2<f64>> {
    let half_length = spectrum.nrows() / 2;
    if dc_crop.checked_add(hf_crop).map_or(true, |c| c >= half_length) {
        return Err(ReconError::InvalidCrop {
            dc: dc_crop,
            hf: hf_crop,
            half_length,
        });
    }
    Ok(spectrum
        .slice(s![dc_crop..half_length - hf_crop, ..])
        .mapv(|z| 20.0 * z.norm().log10()))
}

/// Stage 5: maps dB values into the 8-bit display range, clipping below zero.
pub fn scale_for_display(buffer: &Array2<f64>, black_level: f64, display_scale: f64) -> Array2<u8> {
    buffer.mapv(|v| {
        let scaled = 255.0 * (v - black_level) / display_scale;
        if scaled > 0.0 {
            // `as` saturates at 255.
            scaled as u8
        } else {
            0
        }
    })
}

/// Reconstruction for a fixed A-scan depth; the correction vector and FFT
/// plan are built once and shared by every slice of a job.
#[derive(Clone)]
pub struct ReconstructionPipeline {
    config: ReconstructionConfig,
    depth: usize,
    cropped_depth: usize,
    correction: Vec<Complex<f64>>,
    fft: FftHelper,
}

impl ReconstructionPipeline {
    /// Validates `config` against `depth` without touching any volume data.
    pub fn new(depth: usize, config: &ReconstructionConfig) -> Result<Self> {
        config.validate()?;
        if depth == 0 {
            return Err(ReconError::InvalidConfig("A-scan depth must be positive".into()));
        }
        let cropped_depth = config.cropped_depth(depth)?;
        let correction = build_complex_correction(depth, &config.dispersion_coeffs, config.window);
        let fft = FftHelper::new(config.zero_pad.padded_length(depth));
        Ok(Self {
            config: config.clone(),
            depth,
            cropped_depth,
            correction,
            fft,
        })
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn padded_length(&self) -> usize {
        self.fft.len()
    }

    pub fn cropped_depth(&self) -> usize {
        self.cropped_depth
    }

    pub fn correction(&self) -> &[Complex<f64>] {
        &self.correction
    }

    /// Bytes one reconstructed slice of `width` A-scans should occupy on disk.
    pub fn expected_slice_bytes(&self, width: usize) -> usize {
        self.cropped_depth * width * self.config.output_sample_bytes()
    }

    pub fn reconstruct(&self, raw: ArrayView2<'_, u16>) -> Result<ReconstructedCrossSection> {
        if raw.nrows() != self.depth {
            return Err(ReconError::InvalidConfig(format!(
                "cross-section has {} depth samples, pipeline was built for {}",
                raw.nrows(),
                self.depth
            )));
        }
        let cfg = &self.config;
        let real = if cfg.background_subtract {
            subtract_background(raw)
        } else {
            raw.mapv(f64::from)
        };
        let corrected = apply_correction(&real, &self.correction)?;
        let spectrum = pad_and_transform(&corrected, &self.fft)?;
        let log_mag = log_magnitude_cropped(&spectrum, cfg.dc_crop_samples, cfg.hf_crop_samples)?;
        if cfg.scale_for_display {
            Ok(ReconstructedCrossSection::Display(scale_for_display(
                &log_mag,
                cfg.black_level,
                cfg.display_scale,
            )))
        } else {
            Ok(ReconstructedCrossSection::LogMagnitude(log_mag))
        }
    }
}

/// Reconstructs one raw `(depth, width)` cross-section with `config`.
pub fn reconstruct(
    raw: ArrayView2<'_, u16>,
    config: &ReconstructionConfig,
) -> Result<ReconstructedCrossSection> {
    ReconstructionPipeline::new(raw.nrows(), config)?.reconstruct(raw)
}
