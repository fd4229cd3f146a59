//! Cross-crate compression scenarios: a deflate context feeding a
//! fresh inflate context through the streaming interface.

use barrow_compress::{
    CompressAlgorithm, CompressMode, CompressStatus, Compressor,
};
use rand::{rngs::SmallRng, RngCore, SeedableRng};

fn deflate_all(compressor: &mut Compressor, input: &[u8]) -> Vec<u8> {
    let mut output = Vec::new();
    let mut offset = 0;
    let mut scratch = [0u8; 8 * 1024];
    loop {
        if offset < input.len() {
            offset += compressor.write(&input[offset..]);
            if offset == input.len() {
                compressor.flush();
            }
        }
        let status = compressor.pump().unwrap();
        loop {
            let taken = compressor.read(&mut scratch);
            if taken == 0 {
                break;
            }
            output.extend_from_slice(&scratch[..taken]);
        }
        if status == CompressStatus::End && compressor.pending_output() == 0 {
            return output;
        }
    }
}

#[test]
fn lzma_round_trip_with_matching_totals() {
    let mut input = vec![0u8; 1024 * 1024];
    SmallRng::seed_from_u64(42).fill_bytes(&mut input);

    let mut deflater = Compressor::new(CompressMode::Deflate, CompressAlgorithm::Lzma(6)).unwrap();
    let compressed = deflate_all(&mut deflater, &input);
    assert_eq!(deflater.input_length(), input.len() as u64);
    assert_eq!(deflater.output_length(), compressed.len() as u64);

    let mut inflater = Compressor::new(CompressMode::Inflate, CompressAlgorithm::Lzma(6)).unwrap();
    let restored = deflate_all(&mut inflater, &compressed);
    assert_eq!(restored, input);

    // Compressed bytes out of the deflater equal bytes into the
    // inflater.
    assert_eq!(deflater.output_length(), inflater.input_length());
    assert_eq!(inflater.output_length(), input.len() as u64);
}

#[test]
fn every_backend_survives_a_byte_at_a_time_consumer() {
    let input: Vec<u8> = (0..40_000u32).map(|i| (i / 7 % 256) as u8).collect();
    for algorithm in [
        CompressAlgorithm::Zip(6),
        CompressAlgorithm::Lzma(2),
        CompressAlgorithm::Lz4(1),
        CompressAlgorithm::Zstd(3),
    ] {
        let compressed = barrow_compress::compress_buffer(algorithm, &input).unwrap();

        // Drip the compressed stream into a tiny-ring inflater.
        let mut inflater =
            Compressor::with_capacity(CompressMode::Inflate, algorithm, 512).unwrap();
        let mut restored = Vec::new();
        let mut offset = 0;
        let mut byte = [0u8; 1];
        loop {
            if offset < compressed.len() {
                offset += inflater.write(&compressed[offset..offset + 1]);
                if offset == compressed.len() {
                    inflater.flush();
                }
            }
            let status = inflater.pump().unwrap();
            while inflater.read(&mut byte) == 1 {
                restored.push(byte[0]);
            }
            if status == CompressStatus::End && inflater.pending_output() == 0 {
                break;
            }
        }
        assert_eq!(restored, input, "{algorithm}");
    }
}
