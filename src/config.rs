use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ReconError, Result};
use crate::spectral::WindowKey;

/// How many zeros are prepended before the depth-axis FFT.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ZeroPadMode {
    /// Prepend `depth` zeros; FFT length is `2·depth`.
    #[default]
    FixedDouble,
    /// Pad to the smallest power of two not below `depth`.
    NextPowerOfTwo,
}

impl ZeroPadMode {
    pub fn padded_length(self, depth: usize) -> usize {
        match self {
            ZeroPadMode::FixedDouble => 2 * depth,
            ZeroPadMode::NextPowerOfTwo => depth.next_power_of_two(),
        }
    }

    pub fn half_length(self, depth: usize) -> usize {
        self.padded_length(depth) / 2
    }
}

impl fmt::Display for ZeroPadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZeroPadMode::FixedDouble => write!(f, "fixed-double"),
            ZeroPadMode::NextPowerOfTwo => write!(f, "next-power-of-two"),
        }
    }
}

/// Reconstruction parameters for one job. Built once, never mutated mid-stream.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconstructionConfig {
    /// Cubic dispersion polynomial, highest degree first.
    pub dispersion_coeffs: [f64; 4],
    pub window: WindowKey,
    pub zero_pad: ZeroPadMode,
    pub dc_crop_samples: usize,
    pub hf_crop_samples: usize,
    pub black_level: f64,
    pub display_scale: f64,
    pub background_subtract: bool,
    pub scale_for_display: bool,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            dispersion_coeffs: [0.0; 4],
            window: WindowKey::Hann,
            zero_pad: ZeroPadMode::FixedDouble,
            dc_crop_samples: 0,
            hf_crop_samples: 0,
            black_level: 77.0,
            display_scale: 65.0,
            background_subtract: false,
            scale_for_display: true,
        }
    }
}

impl ReconstructionConfig {
    /// Loads and validates the JSON parameter document.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: ReconParamsFile = serde_json::from_str(text)?;
        Self::try_from(raw)
    }

    /// Checks values that do not depend on the volume depth.
    pub fn validate(&self) -> Result<()> {
        if !self.display_scale.is_finite() || self.display_scale == 0.0 {
            return Err(ReconError::InvalidConfig(format!(
                "display scale must be finite and non-zero, got {}",
                self.display_scale
            )));
        }
        if !self.black_level.is_finite() {
            return Err(ReconError::InvalidConfig(
                "black level must be finite".into(),
            ));
        }
        if self.dispersion_coeffs.iter().any(|c| !c.is_finite()) {
            return Err(ReconError::InvalidConfig(
                "dispersion coefficients must be finite".into(),
            ));
        }
        match self.window {
            WindowKey::Kaiser { sigma: Some(s) } | WindowKey::Gaussian { sigma: Some(s) }
                if !s.is_finite() || s < 0.0 =>
            {
                Err(ReconError::InvalidConfig(format!(
                    "window sigma must be non-negative, got {s}"
                )))
            }
            WindowKey::Gaussian { sigma: Some(s) } if s == 0.0 => Err(
                ReconError::InvalidConfig("gaussian window sigma must be positive".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Depth of one reconstructed A-scan, or `InvalidCrop` when the crop eats it all.
    pub fn cropped_depth(&self, depth_samples: usize) -> Result<usize> {
        let half_length = self.zero_pad.half_length(depth_samples);
        match self.dc_crop_samples.checked_add(self.hf_crop_samples) {
            Some(cropped) if cropped < half_length => Ok(half_length - cropped),
            _ => Err(ReconError::InvalidCrop {
                dc: self.dc_crop_samples,
                hf: self.hf_crop_samples,
                half_length,
            }),
        }
    }

    /// Bytes per reconstructed sample on disk.
    pub fn output_sample_bytes(&self) -> usize {
        if self.scale_for_display {
            1
        } else {
            8
        }
    }
}

/// On-disk layout of the parameter document written by the acquisition GUI.
#[derive(Debug, Deserialize)]
pub struct ReconParamsFile {
    pub dispersion_coefficients: [f64; 4],
    pub windowing_key: String,
    #[serde(default)]
    pub window_sigma: Option<f64>,
    pub dc_crop_samples: usize,
    pub hf_crop_samples: usize,
    pub black_lvl_for_dis: f64,
    pub disp_scale_factor: f64,
    pub is_substract_background: bool,
    pub is_scale_data_for_display: bool,
    pub zeros_to_pad: u8,
}

impl TryFrom<ReconParamsFile> for ReconstructionConfig {
    type Error = ReconError;

    fn try_from(raw: ReconParamsFile) -> Result<Self> {
        let mut window: WindowKey = raw.windowing_key.parse()?;
        if let Some(sigma) = raw.window_sigma {
            window = window.with_sigma(sigma);
        }
        let zero_pad = match raw.zeros_to_pad {
            0 => ZeroPadMode::FixedDouble,
            1 => ZeroPadMode::NextPowerOfTwo,
            other => {
                return Err(ReconError::InvalidConfig(format!(
                    "zeros_to_pad must be 0 or 1, got {other}"
                )))
            }
        };
        let config = ReconstructionConfig {
            dispersion_coeffs: raw.dispersion_coefficients,
            window,
            zero_pad,
            dc_crop_samples: raw.dc_crop_samples,
            hf_crop_samples: raw.hf_crop_samples,
            black_level: raw.black_lvl_for_dis,
            display_scale: raw.disp_scale_factor,
            background_subtract: raw.is_substract_background,
            scale_for_display: raw.is_scale_data_for_display,
        };
        config.validate()?;
        Ok(config)
    }
}
