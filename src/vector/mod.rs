//! Numeric core of the engine: quantization, dot-product kernels and
//! brute-force similarity search.
//!
//! # Architecture
//! Embeddings are stored as `i8` after linear quantization from normalized
//! `f32` vectors. Similarity is the integer dot product, computed by a kernel
//! chosen once per process (AVX2 where available, a portable unrolled loop
//! otherwise). Search scans every row and keeps the best `k` in a bounded
//! heap; no approximate index structure is involved.

pub mod kernel;
mod quantize;
mod search;
mod types;

// Re-export core types for public API
pub use kernel::{DotKernel, dot, dot_f32};
pub use quantize::{dequantize, quantize};
pub use types::{SearchHit, SearchOptions, WorkerOptions};
