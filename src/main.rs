mod args;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;

use oct_recon::writer::raw_ascan_path;
use oct_recon::{
    process, raw_enface, recon_output_path, resolve, write_cross_section, write_flat_f64,
    ColumnCapture, ProcessOptions, RasterRoll, ReconstructionConfig, VolumeDescriptor,
};

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));
    builder.format_timestamp_secs();
    builder.init();
}

fn available_cores() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 {
        n as usize
    } else {
        1
    }
}

fn load_config(path: Option<&Path>) -> Result<ReconstructionConfig> {
    match path {
        Some(path) => ReconstructionConfig::from_json_file(path)
            .with_context(|| format!("failed to load reconstruction parameters from {}", path.display())),
        None => {
            info!("no parameter file given; using built-in defaults");
            Ok(ReconstructionConfig::default())
        }
    }
}

fn main() -> Result<()> {
    let args = args::Args::parse();
    init_logging(args.debug);

    if args.workers == 0 {
        bail!("--workers must be at least 1");
    }
    let cores = available_cores();
    if args.workers > cores {
        bail!(
            "--workers value ({}) exceeds the number of available cores ({})",
            args.workers,
            cores
        );
    }

    let config = load_config(args.config.as_deref())?;
    let descriptor = resolve(&args.input)
        .with_context(|| format!("cannot use {} as a raw volume", args.input.display()))?;
    let cropped_depth = config.cropped_depth(descriptor.depth_samples)?;
    info!(
        "{}: {descriptor}, window {}, reconstructed depth {cropped_depth}",
        args.input.display(),
        config.window
    );

    let output_path = if args.save {
        Some(recon_output_path(
            &args.input,
            &VolumeDescriptor::new(cropped_depth, descriptor.lateral_width, descriptor.lateral_count),
        ))
    } else {
        args.output.clone()
    };

    let mut options = ProcessOptions::new(args.endian);
    options.start_offset_index = args.start_offset;
    options.output_path = output_path;
    options.compute_enface = args.enface || args.enface_out.is_some();
    options.enface_projection = args.enface_projection;
    options.capture = args.capture.map(|(slice, lateral)| ColumnCapture {
        slice,
        lateral,
        radius: args.capture_radius,
    });
    if args.raster_roll {
        options.post_read = Some(Arc::new(RasterRoll));
    }
    options.workers = args.workers;
    options.show_progress = !args.no_progress;

    let outcome = process(&descriptor, &config, &args.input, &options)
        .with_context(|| format!("reconstruction of {} failed", args.input.display()))?;

    if let Some(path) = &outcome.output_path {
        info!("reconstructed volume written to {}", path.display());
    }
    if options.capture.is_some() {
        info!("raw A-scans appended to {}", raw_ascan_path(&args.input).display());
    }
    if let Some(path) = &args.enface_out {
        if let Some(map) = &outcome.enface {
            let written = write_flat_f64(path, map, args.endian)?;
            info!("{} enface written to {}", args.enface_projection, written.display());
        }
    }
    if let Some(path) = &args.middle_out {
        match &outcome.middle_cross_section {
            Some(slice) => {
                let written = write_cross_section(path, slice, args.endian)?;
                info!("middle cross-section written to {}", written.display());
            }
            None => log::warn!("volume has fewer than two slices; no middle cross-section"),
        }
    }
    if let Some(path) = &args.raw_enface_out {
        let map = raw_enface(&descriptor, &args.input, args.endian, args.start_offset)
            .context("raw enface pass failed")?;
        let written = write_flat_f64(path, &map, args.endian)?;
        info!("raw enface written to {}", written.display());
    }
    Ok(())
}
