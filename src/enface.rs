use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2};

use crate::error::{ReconError, Result};

/// How a cross-section is collapsed along depth into one enface column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EnfaceProjection {
    #[default]
    Max,
    Mean,
    Median,
}

impl FromStr for EnfaceProjection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "max" => Ok(Self::Max),
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            other => Err(format!("unknown enface projection {other:?}")),
        }
    }
}

impl fmt::Display for EnfaceProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Max => write!(f, "max"),
            Self::Mean => write!(f, "mean"),
            Self::Median => write!(f, "median"),
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

/// Projects each column of a `(depth, width)` buffer; returns `width` values.
pub fn project_columns(buffer: ArrayView2<'_, f64>, kind: EnfaceProjection) -> Vec<f64> {
    buffer
        .columns()
        .into_iter()
        .map(|col| match kind {
            EnfaceProjection::Max => col.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            EnfaceProjection::Mean => col.mean().unwrap_or(f64::NAN),
            EnfaceProjection::Median => median(&mut col.to_vec()),
        })
        .collect()
}

/// `(lateral_width, lateral_count)` map filled one column per processed slice.
#[derive(Clone, Debug)]
pub struct EnfaceAccumulator {
    map: Array2<f64>,
    kind: EnfaceProjection,
    columns_written: usize,
}

impl EnfaceAccumulator {
    pub fn new(lateral_width: usize, lateral_count: usize, kind: EnfaceProjection) -> Self {
        Self {
            map: Array2::zeros((lateral_width, lateral_count)),
            kind,
            columns_written: 0,
        }
    }

    pub fn kind(&self) -> EnfaceProjection {
        self.kind
    }

    pub fn columns_written(&self) -> usize {
        self.columns_written
    }

    pub fn write_column(&mut self, slice_index: usize, projection: &[f64]) -> Result<()> {
        let (width, count) = self.map.dim();
        if slice_index >= count || projection.len() != width {
            return Err(ReconError::InvalidConfig(format!(
                "enface column {slice_index} with {} values does not fit a {width}x{count} map",
                projection.len()
            )));
        }
        for (dst, &src) in self.map.column_mut(slice_index).iter_mut().zip(projection) {
            *dst = src;
        }
        self.columns_written += 1;
        Ok(())
    }

    pub fn into_map(self) -> Array2<f64> {
        self.map
    }
}
