//! Deflate (zlib container) back-end, levels 0..=9.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use snafu::ResultExt;

use crate::error::{self, CompressError};
use crate::ring::RingBuffer;
use crate::{Coder, CompressMode, CompressStatus};

const SCRATCH_SIZE: usize = 16 * 1024;

enum State {
    Compress(Compress),
    Decompress(Decompress),
}

pub(crate) struct DeflateCoder {
    state: State,
}

impl DeflateCoder {
    pub(crate) fn new(mode: CompressMode, level: u32) -> Self {
        let state = match mode {
            CompressMode::Deflate => State::Compress(Compress::new(Compression::new(level), true)),
            CompressMode::Inflate => State::Decompress(Decompress::new(true)),
        };
        DeflateCoder { state }
    }
}

impl Coder for DeflateCoder {
    fn step(
        &mut self,
        data: &mut RingBuffer,
        compress: &mut RingBuffer,
        flush: bool,
    ) -> Result<CompressStatus, CompressError> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        match &mut self.state {
            State::Compress(codec) => {
                let input = data.head_slice();
                // Finish only once every remaining input byte is
                // visible in this contiguous run.
                let action = if flush && input.len() == data.len() {
                    FlushCompress::Finish
                } else {
                    FlushCompress::None
                };
                if input.is_empty() && !flush {
                    return Ok(CompressStatus::NeedsInput);
                }
                let out_limit = scratch.len().min(compress.free());
                let before_in = codec.total_in();
                let before_out = codec.total_out();
                let status = codec
                    .compress(input, &mut scratch[..out_limit], action)
                    .context(error::DeflateSnafu)?;
                let consumed = (codec.total_in() - before_in) as usize;
                let produced = (codec.total_out() - before_out) as usize;
                data.discard(consumed);
                compress.put(&scratch[..produced]);
                Ok(map_status(status, consumed, produced, compress.free()))
            }
            State::Decompress(codec) => {
                let input = compress.head_slice();
                let action = if flush && input.len() == compress.len() {
                    FlushDecompress::Finish
                } else {
                    FlushDecompress::None
                };
                if input.is_empty() && !flush {
                    return Ok(CompressStatus::NeedsInput);
                }
                let out_limit = scratch.len().min(data.free());
                let before_in = codec.total_in();
                let before_out = codec.total_out();
                let status = codec
                    .decompress(input, &mut scratch[..out_limit], action)
                    .context(error::InflateSnafu)?;
                let consumed = (codec.total_in() - before_in) as usize;
                let produced = (codec.total_out() - before_out) as usize;
                compress.discard(consumed);
                data.put(&scratch[..produced]);
                Ok(map_status(status, consumed, produced, data.free()))
            }
        }
    }

    fn reset(&mut self) -> Result<(), CompressError> {
        match &mut self.state {
            State::Compress(codec) => codec.reset(),
            State::Decompress(codec) => codec.reset(true),
        }
        Ok(())
    }
}

fn map_status(
    status: Status,
    consumed: usize,
    produced: usize,
    output_free: usize,
) -> CompressStatus {
    match status {
        Status::StreamEnd => CompressStatus::End,
        Status::Ok | Status::BufError => {
            if consumed > 0 || produced > 0 {
                CompressStatus::Progress
            } else if output_free == 0 {
                CompressStatus::NeedsOutput
            } else {
                CompressStatus::NeedsInput
            }
        }
    }
}
