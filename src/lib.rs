//! Streaming reconstruction of Fourier-domain OCT volumes stored as flat
//! `u16` binaries.
//!
//! [`shape::resolve`] reads the dimensions from the file name,
//! [`ReconstructionPipeline`] turns one raw cross-section into a depth image,
//! and [`volume::process`] drives it over a whole volume on disk.

pub mod config;
pub mod enface;
pub mod error;
pub mod pipeline;
pub mod shape;
pub mod spectral;
pub mod utils;
pub mod volume;
pub mod writer;

pub use config::{ReconstructionConfig, ZeroPadMode};
pub use enface::{EnfaceAccumulator, EnfaceProjection};
pub use error::{ReconError, Result};
pub use pipeline::{reconstruct, ReconstructedCrossSection, ReconstructionPipeline};
pub use shape::{parse_dimensions, resolve, VolumeDescriptor};
pub use spectral::WindowKey;
pub use utils::Endianness;
pub use volume::{
    process, raw_enface, CancelToken, ColumnCapture, PostReadTransform, ProcessOptions,
    ProcessOutcome, RasterRoll,
};
pub use writer::{recon_output_path, write_cross_section, write_flat_f64};
