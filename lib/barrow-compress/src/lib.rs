//! Streaming compression pipeline.
//!
//! A [`Compressor`] owns two fixed-capacity ring buffers and a codec
//! back-end. In deflate mode the producer writes plain bytes into the
//! `data` ring and reads compressed bytes from the `compress` ring; in
//! inflate mode the rings swap roles. [`Compressor::run`] performs one
//! codec step, moving as many bytes as possible and reporting whether
//! it needs more input, more output space, or has reached the end of
//! the stream.
//!
//! Concatenating two compressed streams produced by independent
//! contexts is not required to round-trip; every stream is decoded by a
//! fresh context.

use std::fmt;
use std::str::FromStr;

use enum_dispatch::enum_dispatch;

mod deflate;
mod error;
mod lz4;
mod lzma;
pub mod ring;
mod zstd;

pub use error::CompressError;
pub use ring::RingBuffer;

use self::lz4::Lz4Coder;
use self::zstd::ZstdCoder;
use deflate::DeflateCoder;
use lzma::LzmaCoder;

/// Default capacity of each ring buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Direction of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressMode {
    Deflate,
    Inflate,
}

/// Codec selection with its per-algorithm level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressAlgorithm {
    None,
    /// Deflate (zlib container), levels 0..=9.
    Zip(u32),
    /// LZMA (xz container), levels 1..=9.
    Lzma(u32),
    /// LZ4 with length-prefixed chunk framing, levels 0..=16.
    Lz4(u32),
    /// Zstandard, levels 0..=19 (0 selects the library default).
    Zstd(u32),
}

impl CompressAlgorithm {
    pub fn validate(self) -> Result<Self, CompressError> {
        let (algorithm, level, max, min) = match self {
            CompressAlgorithm::None => return Ok(self),
            CompressAlgorithm::Zip(level) => ("zip", level, 9, 0),
            CompressAlgorithm::Lzma(level) => ("lzma", level, 9, 1),
            CompressAlgorithm::Lz4(level) => ("lz4", level, 16, 0),
            CompressAlgorithm::Zstd(level) => ("zstd", level, 19, 0),
        };
        if level < min || level > max {
            return error::InvalidLevelSnafu { algorithm, level }.fail();
        }
        Ok(self)
    }
}

impl FromStr for CompressAlgorithm {
    type Err = CompressError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let unknown = || error::UnknownAlgorithmSnafu { name }.build();
        if name == "none" {
            return Ok(CompressAlgorithm::None);
        }
        let algorithm = if let Some(level) = name.strip_prefix("zip") {
            CompressAlgorithm::Zip(level.parse().map_err(|_| unknown())?)
        } else if let Some(level) = name.strip_prefix("lzma") {
            CompressAlgorithm::Lzma(level.parse().map_err(|_| unknown())?)
        } else if let Some(level) = name.strip_prefix("lz4-") {
            CompressAlgorithm::Lz4(level.parse().map_err(|_| unknown())?)
        } else if let Some(level) = name.strip_prefix("zstd") {
            CompressAlgorithm::Zstd(level.parse().map_err(|_| unknown())?)
        } else {
            return Err(unknown());
        };
        algorithm.validate()
    }
}

impl fmt::Display for CompressAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressAlgorithm::None => write!(f, "none"),
            CompressAlgorithm::Zip(level) => write!(f, "zip{level}"),
            CompressAlgorithm::Lzma(level) => write!(f, "lzma{level}"),
            CompressAlgorithm::Lz4(level) => write!(f, "lz4-{level}"),
            CompressAlgorithm::Zstd(level) => write!(f, "zstd{level}"),
        }
    }
}

/// Outcome of one codec step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressStatus {
    /// Bytes were moved; call again.
    Progress,
    /// The input ring is starved.
    NeedsInput,
    /// The output ring is full.
    NeedsOutput,
    /// The final byte of the stream has been emitted.
    End,
}

/// Codec back-end contract: one step moves as many bytes as possible
/// between the rings.
#[enum_dispatch]
trait Coder {
    fn step(
        &mut self,
        data: &mut RingBuffer,
        compress: &mut RingBuffer,
        flush: bool,
    ) -> Result<CompressStatus, CompressError>;

    fn reset(&mut self) -> Result<(), CompressError>;
}

#[enum_dispatch(Coder)]
enum Codec {
    Identity(IdentityCoder),
    Deflate(DeflateCoder),
    Lzma(LzmaCoder),
    Lz4(Lz4Coder),
    Zstd(ZstdCoder),
}

pub struct Compressor {
    mode: CompressMode,
    algorithm: CompressAlgorithm,
    codec: Codec,
    data: RingBuffer,
    compress: RingBuffer,
    flush: bool,
    end_of_data: bool,
    total_in: u64,
    total_out: u64,
}

impl Compressor {
    pub fn new(mode: CompressMode, algorithm: CompressAlgorithm) -> Result<Self, CompressError> {
        Self::with_capacity(mode, algorithm, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(
        mode: CompressMode,
        algorithm: CompressAlgorithm,
        capacity: usize,
    ) -> Result<Self, CompressError> {
        let algorithm = algorithm.validate()?;
        let codec = match algorithm {
            CompressAlgorithm::None => Codec::Identity(IdentityCoder { mode }),
            CompressAlgorithm::Zip(level) => Codec::Deflate(DeflateCoder::new(mode, level)),
            CompressAlgorithm::Lzma(level) => Codec::Lzma(LzmaCoder::new(mode, level)?),
            CompressAlgorithm::Lz4(level) => Codec::Lz4(Lz4Coder::new(mode, level)),
            CompressAlgorithm::Zstd(level) => Codec::Zstd(ZstdCoder::new(mode, level)?),
        };
        Ok(Compressor {
            mode,
            algorithm,
            codec,
            data: RingBuffer::with_capacity(capacity),
            compress: RingBuffer::with_capacity(capacity),
            flush: false,
            end_of_data: false,
            total_in: 0,
            total_out: 0,
        })
    }

    pub fn mode(&self) -> CompressMode {
        self.mode
    }

    pub fn algorithm(&self) -> CompressAlgorithm {
        self.algorithm
    }

    /// Feed bytes into the pipeline. Returns how many were accepted;
    /// fewer than `bytes.len()` means the input ring is full and the
    /// caller should [`run`](Self::run) and drain before retrying.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let ring = match self.mode {
            CompressMode::Deflate => &mut self.data,
            CompressMode::Inflate => &mut self.compress,
        };
        let accepted = ring.put(bytes);
        self.total_in += accepted as u64;
        accepted
    }

    /// Take processed bytes out of the pipeline.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let ring = match self.mode {
            CompressMode::Deflate => &mut self.compress,
            CompressMode::Inflate => &mut self.data,
        };
        let taken = ring.get(out);
        self.total_out += taken as u64;
        taken
    }

    /// Announce that no further input will be written.
    pub fn flush(&mut self) {
        self.flush = true;
    }

    /// Perform one codec step.
    pub fn run(&mut self) -> Result<CompressStatus, CompressError> {
        if self.end_of_data {
            return Ok(CompressStatus::End);
        }
        let status = self
            .codec
            .step(&mut self.data, &mut self.compress, self.flush)?;
        if status == CompressStatus::End {
            self.end_of_data = true;
        }
        Ok(status)
    }

    /// Run codec steps until the codec stalls or the stream ends.
    pub fn pump(&mut self) -> Result<CompressStatus, CompressError> {
        loop {
            match self.run()? {
                CompressStatus::Progress => continue,
                status => return Ok(status),
            }
        }
    }

    /// Bytes buffered and ready for [`read`](Self::read).
    pub fn pending_output(&self) -> usize {
        match self.mode {
            CompressMode::Deflate => self.compress.len(),
            CompressMode::Inflate => self.data.len(),
        }
    }

    pub fn is_flushed(&self) -> bool {
        self.flush
    }

    /// Whether the codec has emitted the final byte of the stream.
    /// Buffered output may still be pending.
    pub fn is_end_of_data(&self) -> bool {
        self.end_of_data
    }

    pub fn input_length(&self) -> u64 {
        self.total_in
    }

    pub fn output_length(&self) -> u64 {
        self.total_out
    }

    /// Restore the codec to its initial state and empty both rings.
    pub fn reset(&mut self) -> Result<(), CompressError> {
        self.codec.reset()?;
        self.data.clear();
        self.compress.clear();
        self.flush = false;
        self.end_of_data = false;
        self.total_in = 0;
        self.total_out = 0;
        Ok(())
    }
}

impl fmt::Debug for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compressor")
            .field("mode", &self.mode)
            .field("algorithm", &self.algorithm)
            .field("flush", &self.flush)
            .field("end_of_data", &self.end_of_data)
            .field("total_in", &self.total_in)
            .field("total_out", &self.total_out)
            .finish()
    }
}

/// One-shot helper: push a whole buffer through a fresh deflate
/// context.
pub fn compress_buffer(
    algorithm: CompressAlgorithm,
    input: &[u8],
) -> Result<Vec<u8>, CompressError> {
    let mut compressor = Compressor::new(CompressMode::Deflate, algorithm)?;
    pump_through(&mut compressor, input)
}

/// One-shot helper: push a whole compressed buffer through a fresh
/// inflate context.
pub fn decompress_buffer(
    algorithm: CompressAlgorithm,
    input: &[u8],
) -> Result<Vec<u8>, CompressError> {
    let mut compressor = Compressor::new(CompressMode::Inflate, algorithm)?;
    pump_through(&mut compressor, input)
}

fn pump_through(compressor: &mut Compressor, input: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut output = Vec::new();
    let mut offset = 0;
    let mut scratch = [0u8; 4096];
    loop {
        if offset < input.len() {
            offset += compressor.write(&input[offset..]);
            if offset == input.len() {
                compressor.flush();
            }
        } else if !compressor.is_flushed() {
            compressor.flush();
        }
        let status = compressor.pump()?;
        loop {
            let taken = compressor.read(&mut scratch);
            if taken == 0 {
                break;
            }
            output.extend_from_slice(&scratch[..taken]);
        }
        if status == CompressStatus::End && compressor.pending_output() == 0 {
            return Ok(output);
        }
        if status == CompressStatus::NeedsInput && offset == input.len() && compressor.is_flushed()
        {
            // The codec is starved but the stream never terminated.
            return Err(CompressError::TruncatedStream);
        }
    }
}

/// Pass-through codec for `CompressAlgorithm::None`.
struct IdentityCoder {
    mode: CompressMode,
}

impl Coder for IdentityCoder {
    fn step(
        &mut self,
        data: &mut RingBuffer,
        compress: &mut RingBuffer,
        flush: bool,
    ) -> Result<CompressStatus, CompressError> {
        let (input, output) = match self.mode {
            CompressMode::Deflate => (data, compress),
            CompressMode::Inflate => (compress, data),
        };
        let mut moved = 0;
        loop {
            let chunk = input.head_slice();
            if chunk.is_empty() {
                break;
            }
            let accepted = output.put(chunk);
            input.discard(accepted);
            moved += accepted;
            if accepted == 0 {
                break;
            }
        }
        if input.is_empty() && flush {
            Ok(CompressStatus::End)
        } else if moved > 0 {
            Ok(CompressStatus::Progress)
        } else if output.free() == 0 {
            Ok(CompressStatus::NeedsOutput)
        } else {
            Ok(CompressStatus::NeedsInput)
        }
    }

    fn reset(&mut self) -> Result<(), CompressError> {
        Ok(())
    }
}
