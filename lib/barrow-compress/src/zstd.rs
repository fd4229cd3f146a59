//! Zstandard back-end, levels 0..=19.

use snafu::ResultExt;
use ::zstd::stream::raw::{Decoder, Encoder, InBuffer, Operation, OutBuffer};

use crate::error::{self, CompressError};
use crate::ring::RingBuffer;
use crate::{Coder, CompressMode, CompressStatus};

const SCRATCH_SIZE: usize = 16 * 1024;

enum State {
    Encoder(Encoder<'static>),
    Decoder(Decoder<'static>),
}

pub(crate) struct ZstdCoder {
    level: u32,
    state: State,
    frame_done: bool,
}

impl ZstdCoder {
    pub(crate) fn new(mode: CompressMode, level: u32) -> Result<Self, CompressError> {
        Ok(ZstdCoder {
            level,
            state: new_state(mode, level)?,
            frame_done: false,
        })
    }
}

fn new_state(mode: CompressMode, level: u32) -> Result<State, CompressError> {
    match mode {
        CompressMode::Deflate => Ok(State::Encoder(
            Encoder::new(level as i32).context(error::ZstdSnafu)?,
        )),
        CompressMode::Inflate => Ok(State::Decoder(Decoder::new().context(error::ZstdSnafu)?)),
    }
}

impl Coder for ZstdCoder {
    fn step(
        &mut self,
        data: &mut RingBuffer,
        compress: &mut RingBuffer,
        flush: bool,
    ) -> Result<CompressStatus, CompressError> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        match &mut self.state {
            State::Encoder(codec) => {
                let input = data.head_slice();
                if input.is_empty() && !flush {
                    return Ok(CompressStatus::NeedsInput);
                }
                let out_limit = scratch.len().min(compress.free());
                if out_limit == 0 {
                    return Ok(CompressStatus::NeedsOutput);
                }
                let mut output = OutBuffer::around(&mut scratch[..out_limit]);

                let mut consumed = 0;
                if !input.is_empty() {
                    let mut in_buffer = InBuffer::around(input);
                    codec
                        .run(&mut in_buffer, &mut output)
                        .context(error::ZstdSnafu)?;
                    consumed = in_buffer.pos;
                }

                // Terminate the frame once every input byte has been
                // handed to the codec.
                let mut end = false;
                if flush && consumed == input.len() && input.len() == data.len() {
                    let remaining = codec.finish(&mut output, true).context(error::ZstdSnafu)?;
                    end = remaining == 0;
                }

                let produced = output.pos();
                data.discard(consumed);
                compress.put(&scratch[..produced]);

                Ok(if end {
                    CompressStatus::End
                } else if consumed > 0 || produced > 0 {
                    CompressStatus::Progress
                } else if compress.free() == 0 {
                    CompressStatus::NeedsOutput
                } else {
                    CompressStatus::NeedsInput
                })
            }
            State::Decoder(codec) => {
                if self.frame_done {
                    return Ok(CompressStatus::End);
                }
                let input = compress.head_slice();
                if input.is_empty() && !flush {
                    return Ok(CompressStatus::NeedsInput);
                }
                if input.is_empty() && flush {
                    // No more bytes will arrive but the frame never
                    // completed.
                    return Err(CompressError::TruncatedStream);
                }
                let out_limit = scratch.len().min(data.free());
                if out_limit == 0 {
                    return Ok(CompressStatus::NeedsOutput);
                }
                let mut output = OutBuffer::around(&mut scratch[..out_limit]);
                let mut in_buffer = InBuffer::around(input);
                let hint = codec
                    .run(&mut in_buffer, &mut output)
                    .context(error::ZstdSnafu)?;
                let consumed = in_buffer.pos;
                let produced = output.pos();
                compress.discard(consumed);
                data.put(&scratch[..produced]);

                if hint == 0 {
                    self.frame_done = true;
                    return Ok(CompressStatus::End);
                }
                Ok(if consumed > 0 || produced > 0 {
                    CompressStatus::Progress
                } else if data.free() == 0 {
                    CompressStatus::NeedsOutput
                } else {
                    CompressStatus::NeedsInput
                })
            }
        }
    }

    fn reset(&mut self) -> Result<(), CompressError> {
        let mode = match self.state {
            State::Encoder(_) => CompressMode::Deflate,
            State::Decoder(_) => CompressMode::Inflate,
        };
        self.state = new_state(mode, self.level)?;
        self.frame_done = false;
        Ok(())
    }
}
