//! Streams a raw volume from disk one cross-section at a time.
//!
//! A producer thread reads batches of slices at their circular offsets and a
//! rayon pool reconstructs each batch. Results are sunk strictly in slice order.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, Axis};
use rayon::prelude::*;

use crate::config::ReconstructionConfig;
use crate::enface::{EnfaceAccumulator, EnfaceProjection};
use crate::error::{ReconError, Result};
use crate::pipeline::{ReconstructedCrossSection, ReconstructionPipeline};
use crate::shape::VolumeDescriptor;
use crate::utils::{advise, read_block_partial, Endianness, ReadAdvice};
use crate::writer::{append_raw_columns, raw_ascan_path, CrossSectionWriter};

/// Raw batches buffered between the reader thread and the workers.
const CHANNEL_BUFFER_SIZE: usize = 4;

/// Applied to every raw `(depth, width)` cross-section before reconstruction.
pub trait PostReadTransform: Send + Sync {
    fn apply(&self, slice_index: usize, raw: &mut Array2<u16>);
}

/// Undoes the bidirectional raster pattern: rolls the lateral axis by
/// `width/2 - 1`, plus another `width/2` on even slices.
#[derive(Clone, Copy, Debug, Default)]
pub struct RasterRoll;

impl RasterRoll {
    pub fn shift(slice_index: usize, width: usize) -> usize {
        if width == 0 {
            return 0;
        }
        let mut shift = (width / 2).saturating_sub(1);
        if slice_index % 2 == 0 {
            shift += width / 2;
        }
        shift % width
    }
}

impl PostReadTransform for RasterRoll {
    fn apply(&self, slice_index: usize, raw: &mut Array2<u16>) {
        let width = raw.ncols();
        let shift = Self::shift(slice_index, width);
        if shift == 0 {
            return;
        }
        let source = raw.clone();
        for (col, mut dst) in raw.axis_iter_mut(Axis(1)).enumerate() {
            dst.assign(&source.column((col + width - shift) % width));
        }
    }
}

/// Cooperative stop flag shared with whoever drives the job.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raw A-scans to copy into the side-car file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnCapture {
    /// Processing index of the slice.
    pub slice: usize,
    pub lateral: usize,
    pub radius: usize,
}

/// Per-job knobs. The byte order has no default and must always be given.
#[derive(Clone)]
pub struct ProcessOptions {
    pub endianness: Endianness,
    pub start_offset_index: i64,
    pub output_path: Option<PathBuf>,
    pub compute_enface: bool,
    pub enface_projection: EnfaceProjection,
    pub capture: Option<ColumnCapture>,
    pub post_read: Option<Arc<dyn PostReadTransform>>,
    pub workers: usize,
    pub cancel: CancelToken,
    pub show_progress: bool,
}

impl ProcessOptions {
    pub fn new(endianness: Endianness) -> Self {
        Self {
            endianness,
            start_offset_index: 0,
            output_path: None,
            compute_enface: false,
            enface_projection: EnfaceProjection::default(),
            capture: None,
            post_read: None,
            workers: 1,
            cancel: CancelToken::new(),
            show_progress: false,
        }
    }
}

/// What a completed job hands back.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub middle_cross_section: Option<ReconstructedCrossSection>,
    /// `(lateral_width, lateral_count)` when requested.
    pub enface: Option<Array2<f64>>,
    pub slices_processed: usize,
    pub bytes_processed: u64,
    pub elapsed: Duration,
    pub output_path: Option<PathBuf>,
}

/// Byte offset of processing index `i` with the start offset applied circularly.
pub fn slice_offset(descriptor: &VolumeDescriptor, start_offset_index: i64, i: usize) -> u64 {
    let count = descriptor.lateral_count as i64;
    let file_index = (start_offset_index.rem_euclid(count) + i as i64).rem_euclid(count);
    file_index as u64 * descriptor.slice_bytes() as u64
}

struct RawSlice {
    index: usize,
    bytes: Vec<u8>,
}

enum ReadFailure {
    Short { slice: usize, actual: usize },
    Io(std::io::Error),
}

type RawBatch = std::result::Result<Vec<RawSlice>, ReadFailure>;

fn spawn_reader(
    mut file: File,
    descriptor: VolumeDescriptor,
    start_offset_index: i64,
    batch_size: usize,
) -> (Receiver<RawBatch>, JoinHandle<()>) {
    let (tx, rx) = mpsc::sync_channel::<RawBatch>(CHANNEL_BUFFER_SIZE);
    let handle = thread::spawn(move || {
        advise(&file, None, ReadAdvice::Sequential);
        let count = descriptor.lateral_count;
        let slice_bytes = descriptor.slice_bytes();
        let mut next = 0usize;
        while next < count {
            let end = (next + batch_size).min(count);
            let mut batch = Vec::with_capacity(end - next);
            let mut failure = None;
            for index in next..end {
                let offset = slice_offset(&descriptor, start_offset_index, index);
                log::debug!("slice {index}: reading {slice_bytes} bytes at offset {offset}");
                let mut bytes = vec![0u8; slice_bytes];
                let read = file
                    .seek(SeekFrom::Start(offset))
                    .map_err(ReconError::from)
                    .and_then(|_| read_block_partial(&mut file, &mut bytes));
                match read {
                    Ok(n) if n == slice_bytes => {
                        let consumed = offset..offset + slice_bytes as u64;
                        advise(&file, Some(consumed), ReadAdvice::Consumed);
                        batch.push(RawSlice { index, bytes });
                    }
                    Ok(actual) => {
                        failure = Some(ReadFailure::Short { slice: index, actual });
                        break;
                    }
                    Err(ReconError::Io(e)) => {
                        failure = Some(ReadFailure::Io(e));
                        break;
                    }
                    Err(e) => {
                        failure = Some(ReadFailure::Io(std::io::Error::other(e.to_string())));
                        break;
                    }
                }
            }
            if !batch.is_empty() && tx.send(Ok(batch)).is_err() {
                // Receiver has hung up.
                return;
            }
            if let Some(failure) = failure {
                let _ = tx.send(Err(failure));
                return;
            }
            next = end;
        }
    });
    (rx, handle)
}

/// Decodes one slice (stored lateral-major) into a `(depth, width)` array.
fn decode_slice(
    bytes: &[u8],
    descriptor: &VolumeDescriptor,
    endianness: Endianness,
) -> Result<Array2<u16>> {
    let mut samples = Vec::new();
    endianness.decode_u16(bytes, &mut samples);
    let lateral_major =
        Array2::from_shape_vec((descriptor.lateral_width, descriptor.depth_samples), samples)?;
    Ok(lateral_major.reversed_axes())
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}

fn read_failure_error(failure: ReadFailure, expected: usize, completed: usize) -> ReconError {
    match failure {
        ReadFailure::Short { slice, actual } => ReconError::TruncatedRead {
            slice,
            expected,
            actual,
            completed,
        },
        ReadFailure::Io(e) => ReconError::Io(e),
    }
}

struct Reconstructed {
    index: usize,
    raw: Option<Array2<u16>>,
    slice: ReconstructedCrossSection,
}

/// Ordered consumer of reconstructed slices.
struct SliceSink<'a> {
    descriptor: VolumeDescriptor,
    options: &'a ProcessOptions,
    middle_index: Option<usize>,
    expected_slice_bytes: usize,
    middle: Option<ReconstructedCrossSection>,
    enface: Option<EnfaceAccumulator>,
    writer: Option<CrossSectionWriter>,
    sidecar: Option<PathBuf>,
    slices_processed: usize,
    bytes_processed: u64,
    encoded: Vec<u8>,
}

impl SliceSink<'_> {
    fn accept(&mut self, item: Reconstructed) -> Result<()> {
        let Reconstructed { index, raw, slice } = item;
        if slice.byte_len() != self.expected_slice_bytes {
            log::warn!(
                "slice {index}: reconstructed {} bytes, expected {}",
                slice.byte_len(),
                self.expected_slice_bytes
            );
        }
        if let Some(acc) = self.enface.as_mut() {
            let column = slice.project(acc.kind());
            acc.write_column(index, &column)?;
        }
        if let Some(writer) = self.writer.as_mut() {
            self.encoded.clear();
            slice.encode_into(self.options.endianness, &mut self.encoded);
            writer.append_slice(&self.encoded)?;
        }
        if let (Some(capture), Some(raw), Some(path)) =
            (self.options.capture, raw.as_ref(), self.sidecar.as_ref())
        {
            let columns = append_raw_columns(
                path,
                raw.view(),
                capture.lateral,
                capture.radius,
                self.options.endianness,
            )?;
            log::info!(
                "captured {columns} raw A-scans around column {} of slice {index} into {}",
                capture.lateral,
                path.display()
            );
        }
        if self.middle_index == Some(index) {
            self.middle = Some(slice);
        }
        self.slices_processed += 1;
        self.bytes_processed += self.descriptor.slice_bytes() as u64;
        Ok(())
    }

    fn abandon(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let path = writer.abandon()?;
            log::warn!(
                "{} truncated to {} complete slices",
                path.display(),
                self.slices_processed
            );
        }
        Ok(())
    }
}

fn check_capture(descriptor: &VolumeDescriptor, capture: &ColumnCapture) -> Result<()> {
    if capture.lateral >= descriptor.lateral_width {
        return Err(ReconError::InvalidConfig(format!(
            "capture column {} is outside a {}-wide cross-section",
            capture.lateral, descriptor.lateral_width
        )));
    }
    if capture.slice >= descriptor.lateral_count {
        log::warn!(
            "capture slice {} is beyond the {} slices of the volume and will never be reached",
            capture.slice,
            descriptor.lateral_count
        );
    }
    Ok(())
}

/// Reconstructs every cross-section of `input` in processing order.
///
/// Parameters are validated before the input is opened. On cancellation or a
/// short read the output file is left holding only the slices sunk so far.
pub fn process(
    descriptor: &VolumeDescriptor,
    config: &ReconstructionConfig,
    input: &Path,
    options: &ProcessOptions,
) -> Result<ProcessOutcome> {
    let pipeline = ReconstructionPipeline::new(descriptor.depth_samples, config)?;
    if options.workers == 0 {
        return Err(ReconError::InvalidConfig("at least one worker is required".into()));
    }
    if let Some(capture) = &options.capture {
        check_capture(descriptor, capture)?;
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers)
        .build()?;

    let file = File::open(input)?;
    let file_bytes = file.metadata()?.len();
    if file_bytes != descriptor.volume_bytes() {
        log::warn!(
            "{} holds {file_bytes} bytes, {descriptor} implies {}",
            input.display(),
            descriptor.volume_bytes()
        );
    }

    let started = Instant::now();
    log::info!(
        "reconstructing {} ({descriptor}) with {} worker(s), start offset {}, {} zero padding to {}",
        input.display(),
        options.workers,
        options.start_offset_index,
        config.zero_pad,
        pipeline.padded_length()
    );

    let writer = match &options.output_path {
        Some(path) => Some(CrossSectionWriter::create(path)?),
        None => None,
    };
    let mut sink = SliceSink {
        descriptor: *descriptor,
        options,
        middle_index: descriptor.middle_slice_index(),
        expected_slice_bytes: pipeline.expected_slice_bytes(descriptor.lateral_width),
        middle: None,
        enface: options.compute_enface.then(|| {
            EnfaceAccumulator::new(
                descriptor.lateral_width,
                descriptor.lateral_count,
                options.enface_projection,
            )
        }),
        writer,
        sidecar: options.capture.map(|_| raw_ascan_path(input)),
        slices_processed: 0,
        bytes_processed: 0,
        encoded: Vec::with_capacity(pipeline.expected_slice_bytes(descriptor.lateral_width)),
    };

    let (rx, producer) = spawn_reader(
        file,
        *descriptor,
        options.start_offset_index,
        options.workers,
    );
    let pb = progress_bar(descriptor.lateral_count, options.show_progress);
    let capture_slice = options.capture.map(|c| c.slice);

    let result = (|| -> Result<()> {
        for received in rx {
            let batch = match received {
                Ok(batch) => batch,
                Err(failure) => {
                    return Err(read_failure_error(
                        failure,
                        descriptor.slice_bytes(),
                        sink.slices_processed,
                    ))
                }
            };
            let reconstructed: Vec<Reconstructed> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|raw_slice| {
                        let mut raw = decode_slice(&raw_slice.bytes, descriptor, options.endianness)?;
                        if let Some(transform) = &options.post_read {
                            transform.apply(raw_slice.index, &mut raw);
                        }
                        let slice = pipeline.reconstruct(raw.view())?;
                        let keep_raw = capture_slice == Some(raw_slice.index);
                        Ok(Reconstructed {
                            index: raw_slice.index,
                            raw: keep_raw.then_some(raw),
                            slice,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })?;
            for item in reconstructed {
                if options.cancel.is_cancelled() {
                    return Err(ReconError::Cancelled {
                        completed: sink.slices_processed,
                    });
                }
                sink.accept(item)?;
                pb.inc(1);
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        pb.abandon();
        if let Err(trunc) = sink.abandon() {
            log::error!("could not cut the output back to whole slices: {trunc}");
        }
        // Dropping the receiver above unblocks the reader.
        let _ = producer.join();
        return Err(e);
    }
    let _ = producer.join();
    pb.finish_and_clear();

    let output_path = match sink.writer.take() {
        Some(writer) => Some(writer.finalize()?),
        None => None,
    };
    let elapsed = started.elapsed();
    log::info!(
        "processed {} slices ({} bytes) in {:.2?}",
        sink.slices_processed,
        sink.bytes_processed,
        elapsed
    );
    Ok(ProcessOutcome {
        middle_cross_section: sink.middle,
        enface: sink.enface.map(EnfaceAccumulator::into_map),
        slices_processed: sink.slices_processed,
        bytes_processed: sink.bytes_processed,
        elapsed,
        output_path,
    })
}

/// Mean raw intensity of every A-scan, as a `(lateral_width, lateral_count)` map.
pub fn raw_enface(
    descriptor: &VolumeDescriptor,
    input: &Path,
    endianness: Endianness,
    start_offset_index: i64,
) -> Result<Array2<f64>> {
    let file = File::open(input)?;
    let (rx, producer) = spawn_reader(file, *descriptor, start_offset_index, 1);
    let mut map = Array2::zeros((descriptor.lateral_width, descriptor.lateral_count));
    let mut completed = 0usize;
    let mut failure = None;
    for received in rx {
        match received {
            Ok(batch) => {
                for raw_slice in batch {
                    let raw = decode_slice(&raw_slice.bytes, descriptor, endianness)?;
                    if let Some(mean) = raw.mapv(f64::from).mean_axis(Axis(0)) {
                        map.column_mut(raw_slice.index).assign(&mean);
                    }
                    completed += 1;
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    let _ = producer.join();
    match failure {
        Some(f) => Err(read_failure_error(f, descriptor.slice_bytes(), completed)),
        None => Ok(map),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::reconstruct;

    const DEPTH: usize = 16;
    const WIDTH: usize = 4;
    const COUNT: usize = 6;

    fn descriptor() -> VolumeDescriptor {
        VolumeDescriptor::new(DEPTH, WIDTH, COUNT)
    }

    fn sample(slice: usize, lateral: usize, depth: usize) -> u16 {
        let phase = 2.0 * std::f64::consts::PI * depth as f64 * (1.0 + lateral as f64 + slice as f64)
            / DEPTH as f64;
        (2000.0 + 100.0 * slice as f64 + 900.0 * phase.cos()) as u16
    }

    /// Writes a volume stored lateral-major per slice.
    fn write_volume_as(dir: &Path, prefix: &str, endianness: Endianness) -> PathBuf {
        let path = dir.join(format!("{prefix}_{DEPTH}x{WIDTH}x{COUNT}.bin"));
        let mut bytes = Vec::new();
        for s in 0..COUNT {
            for l in 0..WIDTH {
                endianness.encode_u16((0..DEPTH).map(|d| sample(s, l, d)), &mut bytes);
            }
        }
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn write_volume(dir: &Path) -> PathBuf {
        write_volume_as(dir, "synthetic", Endianness::Little)
    }

    fn raw_slice(slice: usize) -> Array2<u16> {
        Array2::from_shape_fn((DEPTH, WIDTH), |(d, l)| sample(slice, l, d))
    }

    fn options() -> ProcessOptions {
        ProcessOptions::new(Endianness::Little)
    }

    #[test]
    fn decodes_lateral_major_slices() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_volume(dir.path());
        let bytes = std::fs::read(path).unwrap();
        let d = descriptor();
        let raw = decode_slice(&bytes[d.slice_bytes()..2 * d.slice_bytes()], &d, Endianness::Little)
            .unwrap();
        assert_eq!(raw, raw_slice(1));
    }

    #[test]
    fn start_offset_equal_to_count_matches_zero() {
        let d = descriptor();
        for i in 0..COUNT {
            assert_eq!(slice_offset(&d, COUNT as i64, i), slice_offset(&d, 0, i));
        }
        assert_eq!(slice_offset(&d, -1, 0), 5 * d.slice_bytes() as u64);

        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let cfg = ReconstructionConfig::default();
        let mut a = options();
        a.output_path = Some(dir.path().join("a.bin"));
        let mut b = options();
        b.output_path = Some(dir.path().join("b.bin"));
        b.start_offset_index = COUNT as i64;
        process(&d, &cfg, &input, &a).unwrap();
        process(&d, &cfg, &input, &b).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("a.bin")).unwrap(),
            std::fs::read(dir.path().join("b.bin")).unwrap()
        );
    }

    #[test]
    fn extreme_start_offsets_wrap() {
        let d = descriptor();
        let last = COUNT - 1;
        let max_first = (i64::MAX % COUNT as i64) as u64;
        assert_eq!(slice_offset(&d, i64::MAX, 0), max_first * d.slice_bytes() as u64);
        assert!(slice_offset(&d, i64::MAX, last) < d.volume_bytes());
        assert!(slice_offset(&d, i64::MIN, last) < d.volume_bytes());
        assert_eq!(
            slice_offset(&d, i64::MIN, 0),
            (i64::MIN.rem_euclid(COUNT as i64) as u64) * d.slice_bytes() as u64
        );
    }

    #[test]
    fn big_endian_volume_matches_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let le_input = write_volume_as(dir.path(), "le", Endianness::Little);
        let be_input = write_volume_as(dir.path(), "be", Endianness::Big);
        let cfg = ReconstructionConfig::default();

        let mut le = options();
        le.output_path = Some(dir.path().join("le_out.bin"));
        le.compute_enface = true;
        let mut be = ProcessOptions::new(Endianness::Big);
        be.output_path = Some(dir.path().join("be_out.bin"));
        be.compute_enface = true;

        let a = process(&descriptor(), &cfg, &le_input, &le).unwrap();
        let b = process(&descriptor(), &cfg, &be_input, &be).unwrap();
        assert_eq!(a.enface, b.enface);
        assert_eq!(a.middle_cross_section, b.middle_cross_section);
        assert_eq!(
            std::fs::read(dir.path().join("le_out.bin")).unwrap(),
            std::fs::read(dir.path().join("be_out.bin")).unwrap()
        );
        assert_eq!(
            raw_enface(&descriptor(), &be_input, Endianness::Big, 0).unwrap(),
            raw_enface(&descriptor(), &le_input, Endianness::Little, 0).unwrap()
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn cancel_is_reported_even_if_output_cannot_be_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let mut opts = options();
        // Character devices refuse ftruncate.
        opts.output_path = Some(PathBuf::from("/dev/null"));
        opts.cancel.cancel();
        let err = process(&descriptor(), &ReconstructionConfig::default(), &input, &opts)
            .unwrap_err();
        assert!(matches!(err, ReconError::Cancelled { completed: 0 }), "{err:?}");
    }

    #[test]
    fn output_holds_every_slice_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let cfg = ReconstructionConfig::default();
        let out = dir.path().join("recon.bin");
        let mut opts = options();
        opts.output_path = Some(out.clone());
        opts.start_offset_index = 2;
        let outcome = process(&descriptor(), &cfg, &input, &opts).unwrap();

        assert_eq!(outcome.slices_processed, COUNT);
        assert_eq!(outcome.bytes_processed, descriptor().volume_bytes());
        assert_eq!(outcome.output_path.as_deref(), Some(out.as_path()));
        let bytes = std::fs::read(&out).unwrap();
        let per_slice = DEPTH * WIDTH;
        assert_eq!(bytes.len(), per_slice * COUNT);

        let mut expected = Vec::new();
        reconstruct(raw_slice(2).view(), &cfg)
            .unwrap()
            .encode_into(Endianness::Little, &mut expected);
        assert_eq!(&bytes[..per_slice], expected.as_slice());
    }

    #[test]
    fn parallel_workers_keep_slice_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let cfg = ReconstructionConfig {
            scale_for_display: false,
            ..Default::default()
        };
        let mut serial = options();
        serial.output_path = Some(dir.path().join("serial.bin"));
        serial.compute_enface = true;
        let mut parallel = serial.clone();
        parallel.output_path = Some(dir.path().join("parallel.bin"));
        parallel.workers = 4;

        let a = process(&descriptor(), &cfg, &input, &serial).unwrap();
        let b = process(&descriptor(), &cfg, &input, &parallel).unwrap();
        assert_eq!(a.enface, b.enface);
        assert_eq!(a.middle_cross_section, b.middle_cross_section);
        assert_eq!(
            std::fs::read(dir.path().join("serial.bin")).unwrap(),
            std::fs::read(dir.path().join("parallel.bin")).unwrap()
        );
    }

    #[test]
    fn middle_slice_and_enface_are_captured() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let cfg = ReconstructionConfig::default();
        let mut opts = options();
        opts.compute_enface = true;
        let outcome = process(&descriptor(), &cfg, &input, &opts).unwrap();

        let expected_middle = reconstruct(raw_slice(COUNT / 2 - 1).view(), &cfg).unwrap();
        assert_eq!(outcome.middle_cross_section, Some(expected_middle.clone()));
        let enface = outcome.enface.unwrap();
        assert_eq!(enface.dim(), (WIDTH, COUNT));
        assert_eq!(
            enface.column(COUNT / 2 - 1).to_vec(),
            expected_middle.project(EnfaceProjection::Max)
        );
        assert!(outcome.output_path.is_none());
    }

    #[test]
    fn truncated_volume_reports_completed_slices() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let full = std::fs::read(&input).unwrap();
        let d = descriptor();
        std::fs::write(&input, &full[..3 * d.slice_bytes() + 10]).unwrap();

        let out = dir.path().join("recon.bin");
        let mut opts = options();
        opts.output_path = Some(out.clone());
        let err = process(&d, &ReconstructionConfig::default(), &input, &opts).unwrap_err();
        match err {
            ReconError::TruncatedRead {
                slice,
                expected,
                actual,
                completed,
            } => {
                assert_eq!(slice, 3);
                assert_eq!(expected, d.slice_bytes());
                assert_eq!(actual, 10);
                assert_eq!(completed, 3);
            }
            other => panic!("expected a truncated read, got {other:?}"),
        }
        assert_eq!(std::fs::read(&out).unwrap().len(), 3 * DEPTH * WIDTH);
    }

    #[test]
    fn cancelled_job_leaves_whole_slices() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let out = dir.path().join("recon.bin");
        let mut opts = options();
        opts.output_path = Some(out.clone());
        opts.cancel.cancel();
        let err = process(&descriptor(), &ReconstructionConfig::default(), &input, &opts)
            .unwrap_err();
        assert!(matches!(err, ReconError::Cancelled { completed: 0 }));
        assert_eq!(std::fs::read(&out).unwrap().len(), 0);
    }

    #[test]
    fn invalid_crop_fails_before_output_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let out = dir.path().join("recon.bin");
        let cfg = ReconstructionConfig {
            dc_crop_samples: DEPTH,
            ..Default::default()
        };
        let mut opts = options();
        opts.output_path = Some(out.clone());
        assert!(matches!(
            process(&descriptor(), &cfg, &input, &opts),
            Err(ReconError::InvalidCrop { .. })
        ));
        assert!(!out.exists());
    }

    #[test]
    fn capture_appends_raw_columns_to_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let mut opts = options();
        opts.capture = Some(ColumnCapture {
            slice: 1,
            lateral: 3,
            radius: 1,
        });
        process(&descriptor(), &ReconstructionConfig::default(), &input, &opts).unwrap();

        let sidecar = raw_ascan_path(&input);
        let bytes = std::fs::read(sidecar).unwrap();
        let mut expected = Vec::new();
        let raw = raw_slice(1);
        Endianness::Little.encode_u16(raw.column(2).iter().copied(), &mut expected);
        Endianness::Little.encode_u16(raw.column(3).iter().copied(), &mut expected);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn capture_outside_slice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let mut opts = options();
        opts.capture = Some(ColumnCapture {
            slice: 0,
            lateral: WIDTH,
            radius: 0,
        });
        assert!(matches!(
            process(&descriptor(), &ReconstructionConfig::default(), &input, &opts),
            Err(ReconError::InvalidConfig(_))
        ));
    }

    #[test]
    fn raster_roll_shifts_by_parity() {
        assert_eq!(RasterRoll::shift(1, 8), 3);
        assert_eq!(RasterRoll::shift(0, 8), 7);
        let mut raw = Array2::from_shape_fn((1, 4), |(_, l)| l as u16);
        RasterRoll.apply(1, &mut raw);
        assert_eq!(raw.row(0).to_vec(), vec![3, 0, 1, 2]);
        let mut raw = Array2::from_shape_fn((1, 4), |(_, l)| l as u16);
        RasterRoll.apply(0, &mut raw);
        assert_eq!(raw.row(0).to_vec(), vec![1, 2, 3, 0]);
    }

    #[test]
    fn post_read_transform_runs_before_reconstruction() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let cfg = ReconstructionConfig::default();
        let mut opts = options();
        opts.post_read = Some(Arc::new(RasterRoll));
        let outcome = process(&descriptor(), &cfg, &input, &opts).unwrap();

        let middle = COUNT / 2 - 1;
        let mut raw = raw_slice(middle);
        RasterRoll.apply(middle, &mut raw);
        assert_eq!(
            outcome.middle_cross_section,
            Some(reconstruct(raw.view(), &cfg).unwrap())
        );
    }

    #[test]
    fn raw_enface_is_column_mean() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_volume(dir.path());
        let map = raw_enface(&descriptor(), &input, Endianness::Little, 0).unwrap();
        assert_eq!(map.dim(), (WIDTH, COUNT));
        let raw = raw_slice(4).mapv(f64::from);
        let mean = raw.mean_axis(Axis(0)).unwrap();
        assert_eq!(map.column(4), mean);
    }
}
