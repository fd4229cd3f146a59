//! LZMA (xz container) back-end, levels 1..=9.

use snafu::ResultExt;
use xz2::stream::{Action, Check, Status, Stream};

use crate::error::{self, CompressError};
use crate::ring::RingBuffer;
use crate::{Coder, CompressMode, CompressStatus};

const SCRATCH_SIZE: usize = 16 * 1024;

pub(crate) struct LzmaCoder {
    mode: CompressMode,
    level: u32,
    stream: Stream,
}

impl LzmaCoder {
    pub(crate) fn new(mode: CompressMode, level: u32) -> Result<Self, CompressError> {
        Ok(LzmaCoder {
            mode,
            level,
            stream: new_stream(mode, level)?,
        })
    }
}

fn new_stream(mode: CompressMode, level: u32) -> Result<Stream, CompressError> {
    match mode {
        CompressMode::Deflate => {
            Stream::new_easy_encoder(level, Check::Crc64).context(error::LzmaSnafu)
        }
        CompressMode::Inflate => Stream::new_stream_decoder(u64::MAX, 0).context(error::LzmaSnafu),
    }
}

impl Coder for LzmaCoder {
    fn step(
        &mut self,
        data: &mut RingBuffer,
        compress: &mut RingBuffer,
        flush: bool,
    ) -> Result<CompressStatus, CompressError> {
        let (input_ring, output_ring) = match self.mode {
            CompressMode::Deflate => (data, compress),
            CompressMode::Inflate => (compress, data),
        };

        let input = input_ring.head_slice();
        if input.is_empty() && !flush {
            return Ok(CompressStatus::NeedsInput);
        }
        let action = if flush && input.len() == input_ring.len() {
            Action::Finish
        } else {
            Action::Run
        };

        let mut scratch = [0u8; SCRATCH_SIZE];
        let out_limit = scratch.len().min(output_ring.free());
        let before_in = self.stream.total_in();
        let before_out = self.stream.total_out();
        let status = self
            .stream
            .process(input, &mut scratch[..out_limit], action)
            .context(error::LzmaSnafu)?;
        let consumed = (self.stream.total_in() - before_in) as usize;
        let produced = (self.stream.total_out() - before_out) as usize;
        input_ring.discard(consumed);
        output_ring.put(&scratch[..produced]);

        Ok(match status {
            Status::StreamEnd => CompressStatus::End,
            Status::Ok | Status::GetCheck | Status::MemNeeded => {
                if consumed > 0 || produced > 0 {
                    CompressStatus::Progress
                } else if output_ring.free() == 0 {
                    CompressStatus::NeedsOutput
                } else {
                    CompressStatus::NeedsInput
                }
            }
        })
    }

    fn reset(&mut self) -> Result<(), CompressError> {
        self.stream = new_stream(self.mode, self.level)?;
        Ok(())
    }
}
