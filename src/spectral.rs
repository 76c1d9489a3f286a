use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use num_complex::Complex;

use crate::error::ReconError;

/// Spectral shaping window applied together with the dispersion phase.
///
/// `None` sigma means "use the default", `depth / 10` as in the acquisition software.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum WindowKey {
    #[default]
    Hann,
    Hamming,
    Kaiser { sigma: Option<f64> },
    Gaussian { sigma: Option<f64> },
}

impl FromStr for WindowKey {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hann" | "hanning" => Ok(WindowKey::Hann),
            "hamm" | "hamming" => Ok(WindowKey::Hamming),
            "kaiser" => Ok(WindowKey::Kaiser { sigma: None }),
            "gauss" | "gaussian" => Ok(WindowKey::Gaussian { sigma: None }),
            _ => Err(ReconError::UnknownWindowKey(s.to_string())),
        }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowKey::Hann => write!(f, "hann"),
            WindowKey::Hamming => write!(f, "hamming"),
            WindowKey::Kaiser { sigma: Some(s) } => write!(f, "kaiser(beta={s})"),
            WindowKey::Kaiser { sigma: None } => write!(f, "kaiser"),
            WindowKey::Gaussian { sigma: Some(s) } => write!(f, "gauss(sigma={s})"),
            WindowKey::Gaussian { sigma: None } => write!(f, "gauss"),
        }
    }
}

impl WindowKey {
    /// Same key with an explicit shape parameter (ignored by Hann and Hamming).
    pub fn with_sigma(self, sigma: f64) -> Self {
        match self {
            WindowKey::Kaiser { .. } => WindowKey::Kaiser { sigma: Some(sigma) },
            WindowKey::Gaussian { .. } => WindowKey::Gaussian { sigma: Some(sigma) },
            other => other,
        }
    }
}

/// `len / 10`, never below one sample.
fn default_sigma(len: usize) -> f64 {
    (len / 10).max(1) as f64
}

/// `ln I0(x)`, the log of the zeroth-order modified Bessel function of the
/// first kind. The power series is renormalised as it grows so that shape
/// parameters in the thousands stay finite.
fn ln_bessel_i0(x: f64) -> f64 {
    const RESCALE: f64 = 1e280;
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    let mut log_scale = 0.0;
    let mut k = 1.0;
    loop {
        term *= (half / k) * (half / k);
        sum += term;
        if sum > RESCALE {
            sum /= RESCALE;
            term /= RESCALE;
            log_scale += RESCALE.ln();
        }
        if term < sum * 1e-17 || !sum.is_finite() {
            break;
        }
        k += 1.0;
    }
    sum.ln() + log_scale
}

fn cosine_window(len: usize, a0: f64) -> Vec<f64> {
    let denom = (len - 1) as f64;
    (0..len)
        .map(|n| a0 - (1.0 - a0) * (2.0 * PI * n as f64 / denom).cos())
        .collect()
}

/// Real-valued spectral window of `len` samples (symmetric, numpy/scipy conventions).
pub fn build_window(len: usize, key: WindowKey) -> Vec<f64> {
    if len == 0 {
        return Vec::new();
    }
    if len == 1 {
        return vec![1.0];
    }
    match key {
        WindowKey::Hann => cosine_window(len, 0.5),
        WindowKey::Hamming => cosine_window(len, 0.54),
        WindowKey::Kaiser { sigma } => {
            let beta = sigma.unwrap_or_else(|| default_sigma(len));
            let denom = (len - 1) as f64;
            let ln_norm = ln_bessel_i0(beta);
            (0..len)
                .map(|n| {
                    let r = 2.0 * n as f64 / denom - 1.0;
                    (ln_bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) - ln_norm).exp()
                })
                .collect()
        }
        WindowKey::Gaussian { sigma } => {
            let sigma = sigma.unwrap_or_else(|| default_sigma(len));
            let centre = (len - 1) as f64 / 2.0;
            (0..len)
                .map(|n| {
                    let d = (n as f64 - centre) / sigma;
                    (-0.5 * d * d).exp()
                })
                .collect()
        }
    }
}

/// Cubic `c0·t³ + c1·t² + c2·t + c3` on `len` points spanning `[-0.5, 0.5]`.
pub fn build_dispersion_phase(len: usize, coeffs: &[f64; 4]) -> Vec<f64> {
    let step = if len > 1 { 1.0 / (len - 1) as f64 } else { 0.0 };
    (0..len)
        .map(|i| {
            let t = if len > 1 { -0.5 + i as f64 * step } else { -0.5 };
            // Horner, highest degree first.
            coeffs.iter().fold(0.0, |acc, &c| acc * t + c)
        })
        .collect()
}

/// Windowed correction vector: `re = phase·win`, `im = cos(phase)·win`.
///
/// Note this is not `win·exp(i·phase)`.
pub fn build_complex_correction(len: usize, coeffs: &[f64; 4], key: WindowKey) -> Vec<Complex<f64>> {
    let phase = build_dispersion_phase(len, coeffs);
    let window = build_window(len, key);
    phase
        .iter()
        .zip(window.iter())
        .map(|(&p, &w)| Complex::new(p * w, p.cos() * w))
        .collect()
}
