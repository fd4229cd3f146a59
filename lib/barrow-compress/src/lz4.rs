//! LZ4 back-end with length-prefixed chunk framing, levels 0..=16.
//!
//! Every chunk on the wire starts with a 32-bit little-endian header.
//! The low 24 bits carry the payload length; the top bits flag the last
//! chunk of the stream, whether the payload is block-compressed, and
//! whether dictionary streaming was used. Chunks never exceed 64 KiB
//! uncompressed, and a chunk that would not shrink is stored verbatim.
//! The framing is archived data, so it is bit-exact and version-stable.

use ::lz4::block::{compress, decompress, CompressionMode};
use snafu::ResultExt;

use crate::error::{self, CompressError};
use crate::ring::RingBuffer;
use crate::{Coder, CompressMode, CompressStatus};

/// Maximum uncompressed bytes per chunk.
const BLOCK_SIZE: usize = 64 * 1024;

const LENGTH_MASK: u32 = 0x00FF_FFFF;
/// Set iff this is the last chunk of the stream.
const END_OF_DATA_FLAG: u32 = 0x8000_0000;
/// Set iff the payload is block-compressed.
const COMPRESSED_FLAG: u32 = 0x4000_0000;
/// Set iff dictionary streaming was used (never produced here).
const STREAM_FLAG: u32 = 0x2000_0000;

pub(crate) struct Lz4Coder {
    mode: CompressMode,
    level: u32,

    // Deflate: staged uncompressed block and the encoded chunk still
    // being copied out.
    block: Vec<u8>,
    encoded: Vec<u8>,
    encoded_pos: usize,
    finished: bool,

    // Inflate: header accumulator, payload accumulator and the decoded
    // chunk still being copied out.
    header: [u8; 4],
    header_fill: usize,
    payload: Vec<u8>,
    chunk_header: Option<u32>,
    decoded: Vec<u8>,
    decoded_pos: usize,
    last_chunk: bool,
}

impl Lz4Coder {
    pub(crate) fn new(mode: CompressMode, level: u32) -> Self {
        Lz4Coder {
            mode,
            level,
            block: Vec::with_capacity(BLOCK_SIZE),
            encoded: Vec::new(),
            encoded_pos: 0,
            finished: false,
            header: [0; 4],
            header_fill: 0,
            payload: Vec::new(),
            chunk_header: None,
            decoded: Vec::new(),
            decoded_pos: 0,
            last_chunk: false,
        }
    }

    fn compression_mode(&self) -> Option<CompressionMode> {
        match self.level {
            0 => Some(CompressionMode::DEFAULT),
            level => Some(CompressionMode::HIGHCOMPRESSION(level as i32)),
        }
    }

    fn deflate_step(
        &mut self,
        data: &mut RingBuffer,
        compress_ring: &mut RingBuffer,
        flush: bool,
    ) -> Result<CompressStatus, CompressError> {
        let mut progress = false;

        // Drain a previously encoded chunk first.
        if self.encoded_pos < self.encoded.len() {
            let accepted = compress_ring.put(&self.encoded[self.encoded_pos..]);
            self.encoded_pos += accepted;
            progress |= accepted > 0;
            if self.encoded_pos < self.encoded.len() {
                return Ok(if progress {
                    CompressStatus::Progress
                } else {
                    CompressStatus::NeedsOutput
                });
            }
            self.encoded.clear();
            self.encoded_pos = 0;
        }

        if self.finished {
            return Ok(CompressStatus::End);
        }

        // Stage input into the block.
        while self.block.len() < BLOCK_SIZE && !data.is_empty() {
            let chunk = data.head_slice();
            let take = chunk.len().min(BLOCK_SIZE - self.block.len());
            self.block.extend_from_slice(&chunk[..take]);
            data.discard(take);
            progress = true;
        }

        if self.block.len() == BLOCK_SIZE || (flush && !self.block.is_empty()) {
            let last = flush && data.is_empty();
            self.encode_chunk(last)?;
            return Ok(CompressStatus::Progress);
        }
        if flush && self.block.is_empty() {
            // Nothing buffered at all: terminate with an empty last
            // chunk.
            self.encoded.extend_from_slice(&END_OF_DATA_FLAG.to_le_bytes());
            self.finished = true;
            return Ok(CompressStatus::Progress);
        }
        Ok(if progress {
            CompressStatus::Progress
        } else {
            CompressStatus::NeedsInput
        })
    }

    fn encode_chunk(&mut self, last: bool) -> Result<(), CompressError> {
        debug_assert!(!self.block.is_empty());
        let compressed = compress(&self.block, self.compression_mode(), false)
            .context(error::Lz4Snafu)?;

        let mut flags = 0u32;
        let payload: &[u8] = if compressed.len() < self.block.len() {
            flags |= COMPRESSED_FLAG;
            &compressed
        } else {
            // Incompressible chunks are stored verbatim.
            &self.block
        };
        if last {
            flags |= END_OF_DATA_FLAG;
            self.finished = true;
        }
        let header = flags | (payload.len() as u32 & LENGTH_MASK);

        self.encoded.extend_from_slice(&header.to_le_bytes());
        self.encoded.extend_from_slice(payload);
        self.block.clear();
        Ok(())
    }

    fn inflate_step(
        &mut self,
        data: &mut RingBuffer,
        compress_ring: &mut RingBuffer,
        flush: bool,
    ) -> Result<CompressStatus, CompressError> {
        let mut progress = false;

        // Drain a previously decoded chunk first.
        if self.decoded_pos < self.decoded.len() {
            let accepted = data.put(&self.decoded[self.decoded_pos..]);
            self.decoded_pos += accepted;
            progress |= accepted > 0;
            if self.decoded_pos < self.decoded.len() {
                return Ok(if progress {
                    CompressStatus::Progress
                } else {
                    CompressStatus::NeedsOutput
                });
            }
            self.decoded.clear();
            self.decoded_pos = 0;
        }

        if self.last_chunk {
            return Ok(CompressStatus::End);
        }

        // Accumulate the 4-byte chunk header.
        let header = match self.chunk_header {
            Some(header) => header,
            None => {
                while self.header_fill < 4 && !compress_ring.is_empty() {
                    let chunk = compress_ring.head_slice();
                    let take = chunk.len().min(4 - self.header_fill);
                    self.header[self.header_fill..self.header_fill + take]
                        .copy_from_slice(&chunk[..take]);
                    compress_ring.discard(take);
                    self.header_fill += take;
                    progress = true;
                }
                if self.header_fill < 4 {
                    if flush {
                        return Err(CompressError::TruncatedStream);
                    }
                    return Ok(if progress {
                        CompressStatus::Progress
                    } else {
                        CompressStatus::NeedsInput
                    });
                }
                let header = u32::from_le_bytes(self.header);
                if header & STREAM_FLAG != 0 {
                    return Err(CompressError::CorruptChunk {
                        reason: "dictionary-streamed chunk without a configured dictionary",
                    });
                }
                if (header & LENGTH_MASK) as usize > BLOCK_SIZE {
                    return Err(CompressError::CorruptChunk {
                        reason: "chunk payload exceeds the 64 KiB block size",
                    });
                }
                self.chunk_header = Some(header);
                header
            }
        };

        // Accumulate the payload.
        let length = (header & LENGTH_MASK) as usize;
        while self.payload.len() < length && !compress_ring.is_empty() {
            let chunk = compress_ring.head_slice();
            let take = chunk.len().min(length - self.payload.len());
            self.payload.extend_from_slice(&chunk[..take]);
            compress_ring.discard(take);
            progress = true;
        }
        if self.payload.len() < length {
            if flush {
                return Err(CompressError::TruncatedStream);
            }
            return Ok(if progress {
                CompressStatus::Progress
            } else {
                CompressStatus::NeedsInput
            });
        }

        // Decode the completed chunk.
        if header & COMPRESSED_FLAG != 0 {
            self.decoded = decompress(&self.payload, Some(BLOCK_SIZE as i32))
                .context(error::Lz4Snafu)?;
            if self.decoded.len() > BLOCK_SIZE {
                return Err(CompressError::CorruptChunk {
                    reason: "chunk decodes past the 64 KiB block size",
                });
            }
        } else {
            self.decoded = std::mem::take(&mut self.payload);
        }
        self.decoded_pos = 0;
        self.payload.clear();
        self.chunk_header = None;
        self.header_fill = 0;
        if header & END_OF_DATA_FLAG != 0 {
            self.last_chunk = true;
        }
        Ok(CompressStatus::Progress)
    }
}

impl Coder for Lz4Coder {
    fn step(
        &mut self,
        data: &mut RingBuffer,
        compress: &mut RingBuffer,
        flush: bool,
    ) -> Result<CompressStatus, CompressError> {
        match self.mode {
            CompressMode::Deflate => self.deflate_step(data, compress, flush),
            CompressMode::Inflate => self.inflate_step(data, compress, flush),
        }
    }

    fn reset(&mut self) -> Result<(), CompressError> {
        self.block.clear();
        self.encoded.clear();
        self.encoded_pos = 0;
        self.finished = false;
        self.header_fill = 0;
        self.payload.clear();
        self.chunk_header = None;
        self.decoded.clear();
        self.decoded_pos = 0;
        self.last_chunk = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compress_buffer, decompress_buffer, CompressAlgorithm};

    fn header_of(stream: &[u8]) -> u32 {
        u32::from_le_bytes(stream[..4].try_into().unwrap())
    }

    #[test]
    fn empty_stream_is_a_bare_last_chunk_header() {
        let stream = compress_buffer(CompressAlgorithm::Lz4(1), b"").unwrap();
        assert_eq!(stream.len(), 4);
        assert_eq!(header_of(&stream), END_OF_DATA_FLAG);
    }

    #[test]
    fn single_chunk_stream_sets_end_flag_and_length() {
        let input = vec![b'a'; 10_000];
        let stream = compress_buffer(CompressAlgorithm::Lz4(1), &input).unwrap();
        let header = header_of(&stream);
        assert_ne!(header & END_OF_DATA_FLAG, 0);
        assert_ne!(header & COMPRESSED_FLAG, 0);
        assert_eq!(header & STREAM_FLAG, 0);
        let length = (header & LENGTH_MASK) as usize;
        assert_eq!(stream.len(), 4 + length);
        assert!(length < input.len());
    }

    #[test]
    fn incompressible_chunk_is_stored_verbatim() {
        use rand::{rngs::SmallRng, RngCore, SeedableRng};
        let mut input = vec![0u8; 32 * 1024];
        SmallRng::seed_from_u64(11).fill_bytes(&mut input);

        let stream = compress_buffer(CompressAlgorithm::Lz4(1), &input).unwrap();
        let header = header_of(&stream);
        assert_eq!(header & COMPRESSED_FLAG, 0);
        assert_eq!((header & LENGTH_MASK) as usize, input.len());
        assert_eq!(&stream[4..4 + input.len()], &input[..]);
    }

    #[test]
    fn chunks_never_exceed_block_size() {
        let input = vec![b'z'; 5 * BLOCK_SIZE + 123];
        let stream = compress_buffer(CompressAlgorithm::Lz4(4), &input).unwrap();

        let mut offset = 0;
        let mut total = 0;
        let mut saw_last = false;
        while offset < stream.len() {
            assert!(!saw_last, "chunk after the last-chunk flag");
            let header = u32::from_le_bytes(stream[offset..offset + 4].try_into().unwrap());
            let length = (header & LENGTH_MASK) as usize;
            assert!(length <= BLOCK_SIZE);
            let payload = &stream[offset + 4..offset + 4 + length];
            let decoded = if header & COMPRESSED_FLAG != 0 {
                decompress(payload, Some(BLOCK_SIZE as i32)).unwrap()
            } else {
                payload.to_vec()
            };
            assert!(decoded.len() <= BLOCK_SIZE);
            total += decoded.len();
            saw_last = header & END_OF_DATA_FLAG != 0;
            offset += 4 + length;
        }
        assert!(saw_last);
        assert_eq!(total, input.len());
    }

    #[test]
    fn stream_flag_is_rejected() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&(STREAM_FLAG | END_OF_DATA_FLAG).to_le_bytes());
        let result = decompress_buffer(CompressAlgorithm::Lz4(1), &stream);
        assert!(result.is_err());
    }

    #[test]
    fn hand_built_stored_stream_decodes() {
        let payload = b"stored bytes";
        let mut stream = Vec::new();
        let header = END_OF_DATA_FLAG | payload.len() as u32;
        stream.extend_from_slice(&header.to_le_bytes());
        stream.extend_from_slice(payload);

        let decoded = decompress_buffer(CompressAlgorithm::Lz4(1), &stream).unwrap();
        assert_eq!(decoded, payload);
    }
}
