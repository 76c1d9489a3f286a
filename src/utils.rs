use std::fs::File;
use std::io::{ErrorKind, Read};
use std::ops::Range;
#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;
use std::str::FromStr;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{ReconError, Result};

/// Forward complex FFT plan for one fixed A-scan length.
#[derive(Clone)]
pub struct FftHelper {
    len: usize,
    forward_c2c: Arc<dyn Fft<f64>>,
}

impl FftHelper {
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward_c2c = planner.plan_fft_forward(len);
        Self { len, forward_c2c }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Unnormalised forward transform, matching `numpy.fft.fft`.
    pub fn forward_c2c(&self, buffer: &mut [Complex<f64>]) -> Result<()> {
        if buffer.len() != self.len {
            return Err(ReconError::InvalidConfig(format!(
                "FFT buffer holds {} samples, plan expects {}",
                buffer.len(),
                self.len
            )));
        }
        self.forward_c2c.process(buffer);
        Ok(())
    }
}

/// Byte order of the samples in a flat binary file. There is deliberately no default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl FromStr for Endianness {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "little" | "le" | "<" => Ok(Endianness::Little),
            "big" | "be" | ">" => Ok(Endianness::Big),
            other => Err(format!("unknown endianness {other:?} (use little or big)")),
        }
    }
}

impl Endianness {
    pub fn decode_u16(self, raw: &[u8], out: &mut Vec<u16>) {
        out.clear();
        out.reserve(raw.len() / 2);
        match self {
            Endianness::Little => out.extend(
                raw.chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
            ),
            Endianness::Big => out.extend(
                raw.chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]])),
            ),
        }
    }

    pub fn encode_u16(self, values: impl IntoIterator<Item = u16>, out: &mut Vec<u8>) {
        for v in values {
            match self {
                Endianness::Little => out.extend_from_slice(&v.to_le_bytes()),
                Endianness::Big => out.extend_from_slice(&v.to_be_bytes()),
            }
        }
    }

    pub fn encode_f64(self, values: impl IntoIterator<Item = f64>, out: &mut Vec<u8>) {
        for v in values {
            match self {
                Endianness::Little => out.extend_from_slice(&v.to_le_bytes()),
                Endianness::Big => out.extend_from_slice(&v.to_be_bytes()),
            }
        }
    }
}

/// Reads until `buffer` is full or the file ends; returns the number of bytes read.
pub fn read_block_partial(reader: &mut File, buffer: &mut [u8]) -> Result<usize> {
    let mut total_read = 0usize;
    while total_read < buffer.len() {
        match reader.read(&mut buffer[total_read..]) {
            Ok(0) => break,
            Ok(n) => total_read += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total_read)
}

/// Page-cache hint for a byte range of the input volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadAdvice {
    /// The range will be read front to back.
    Sequential,
    /// The range has been consumed and will not be read again.
    Consumed,
}

/// Passes `advice` for `range` (`None` is the whole file) to the kernel.
/// Failures are ignored; this never changes what is read.
#[cfg(target_os = "linux")]
pub fn advise(file: &File, range: Option<Range<u64>>, advice: ReadAdvice) {
    let (offset, len) = match range {
        Some(r) => {
            let len = r.end.saturating_sub(r.start);
            match (libc::off_t::try_from(r.start), libc::off_t::try_from(len)) {
                (Ok(offset), Ok(len)) => (offset, len),
                _ => return,
            }
        }
        None => (0, 0),
    };
    let flag = match advice {
        ReadAdvice::Sequential => libc::POSIX_FADV_SEQUENTIAL,
        ReadAdvice::Consumed => libc::POSIX_FADV_DONTNEED,
    };
    unsafe {
        let _ = libc::posix_fadvise(file.as_raw_fd(), offset, len, flag);
    }
}

#[cfg(not(target_os = "linux"))]
pub fn advise(_file: &File, _range: Option<Range<u64>>, _advice: ReadAdvice) {}
