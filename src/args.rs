use std::path::PathBuf;

use clap::Parser;

use oct_recon::{EnfaceProjection, Endianness};

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Streaming reconstruction of raw Fourier-domain OCT volumes",
    long_about = None,
    arg_required_else_help = true,
    after_help = "Examples:\n  oct-recon --input scans/rasterVol04_13312x512x512.bin --config recon.json --endian little --save\n  oct-recon --input vol_2048x512x256.bin --endian big --enface --enface-out enface.bin --no-progress\n  oct-recon --input vol_2048x512x256.bin --endian little --raster-roll --capture 128,256 --capture-radius 2 --workers 8\n"
)]
pub struct Args {
    /// Raw volume; its name must carry the dimensions, e.g. scan_13312x512x512.bin
    #[arg(long, short = 'i')]
    pub input: PathBuf,

    /// Reconstruction parameters (JSON). Built-in defaults are used when omitted.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Byte order of the raw samples (little or big)
    #[arg(long)]
    pub endian: Endianness,

    /// Slice index processed first; wraps around the slow axis
    #[arg(long, allow_hyphen_values = true, default_value_t = 0)]
    pub start_offset: i64,

    /// Write the reconstructed volume to this file
    #[arg(long, short = 'o', conflicts_with = "save")]
    pub output: Option<PathBuf>,

    /// Write the reconstructed volume next to the input as recon_<name>_<DxWxC>.bin
    #[arg(long)]
    pub save: bool,

    /// Accumulate an enface projection
    #[arg(long)]
    pub enface: bool,

    /// Projection along depth used for the enface map
    #[arg(long, default_value_t = EnfaceProjection::Max)]
    pub enface_projection: EnfaceProjection,

    /// Export the enface map (f64, shape appended to the name); implies --enface
    #[arg(long)]
    pub enface_out: Option<PathBuf>,

    /// Export the middle reconstructed cross-section (shape appended to the name)
    #[arg(long)]
    pub middle_out: Option<PathBuf>,

    /// Copy raw A-scans of SLICE,LATERAL into <input stem>_RawAscans.bin
    #[arg(long, value_parser = parse_capture)]
    pub capture: Option<(usize, usize)>,

    /// Neighbouring A-scans captured on each side of --capture
    #[arg(long, default_value_t = 0, requires = "capture")]
    pub capture_radius: usize,

    /// Undo the bidirectional raster pattern before reconstruction
    #[arg(long)]
    pub raster_roll: bool,

    /// Export the mean raw intensity map (f64, shape appended to the name)
    #[arg(long)]
    pub raw_enface_out: Option<PathBuf>,

    /// Number of slices reconstructed in parallel
    #[arg(long, short = 'w', default_value_t = 1)]
    pub workers: usize,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Verbose per-slice logging
    #[arg(long)]
    pub debug: bool,
}

/// Parses `SLICE,LATERAL`.
pub fn parse_capture(s: &str) -> Result<(usize, usize), String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [slice, lateral] = parts.as_slice() else {
        return Err(format!("expected SLICE,LATERAL, got {s:?}"));
    };
    let slice = slice
        .parse::<usize>()
        .map_err(|e| format!("invalid capture slice {slice:?}: {e}"))?;
    let lateral = lateral
        .parse::<usize>()
        .map_err(|e| format!("invalid capture column {lateral:?}: {e}"))?;
    Ok((slice, lateral))
}
