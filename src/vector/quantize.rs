//! Lossy float32 <-> int8 conversion of embedding vectors.
//!
//! Components are expected to come from normalized embeddings in `[-1, 1]`.
//! Anything outside that range is clamped before mapping.

/// Largest quantized magnitude; `-128` is never produced.
pub const QUANTIZED_MAX: f32 = 127.0;

/// Maps each component from `[-1, 1]` to `[-127, 127]`.
///
/// Rounds to the nearest step instead of truncating, which keeps the ranking
/// of quantized dot products closer to the float ranking.
pub fn quantize(input: &[f32]) -> Vec<i8> {
    input
        .iter()
        .map(|&value| (value.clamp(-1.0, 1.0) * QUANTIZED_MAX).round() as i8)
        .collect()
}

/// Inverse of [`quantize`]. Never reconstructs the original precision, so
/// callers must not treat the output as the original embedding.
pub fn dequantize(input: &[i8]) -> Vec<f32> {
    input
        .iter()
        .map(|&value| f32::from(value) / QUANTIZED_MAX)
        .collect()
}
