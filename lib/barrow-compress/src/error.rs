use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompressError {
    #[snafu(display("unknown compression algorithm '{name}'"))]
    UnknownAlgorithm { name: String },

    #[snafu(display("compression level {level} out of range for {algorithm}"))]
    InvalidLevel { algorithm: &'static str, level: u32 },

    #[snafu(display("deflate failed: {source}"))]
    Deflate { source: flate2::CompressError },

    #[snafu(display("inflate failed: {source}"))]
    Inflate { source: flate2::DecompressError },

    #[snafu(display("lzma failed: {source}"))]
    Lzma { source: xz2::stream::Error },

    #[snafu(display("lz4 failed: {source}"))]
    Lz4 { source: std::io::Error },

    #[snafu(display("zstd failed: {source}"))]
    Zstd { source: std::io::Error },

    #[snafu(display("corrupt compressed chunk: {reason}"))]
    CorruptChunk { reason: &'static str },

    #[snafu(display("compressed stream ended before the final chunk"))]
    TruncatedStream,
}
