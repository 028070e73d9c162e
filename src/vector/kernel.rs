//! Dot-product kernels for quantized and float embeddings.
//!
//! Inputs are split into a block whose length is the largest multiple of
//! [`BLOCK_SIZE`] and a short remainder. The block goes to the kernel selected
//! at startup, the remainder always to the portable loop.
//!
//! # Overflow
//!
//! Accumulation happens in 32-bit signed integers and wraps. Long vectors with
//! large-magnitude components (roughly 130k elements at ±128) overflow; the
//! result is then meaningless but the call never panics. Ranking code depends
//! on this exact arithmetic, so it is not widened.

use std::sync::OnceLock;

/// Elements handed to the architecture kernel per block.
pub const BLOCK_SIZE: usize = 64;

/// Implementation used for the block part of [`dot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DotKernel {
    /// 4-wide unrolled scalar loop, always available.
    Portable,
    /// AVX2 sign-extend + multiply-add, x86_64 only.
    Avx2,
}

static SELECTED_KERNEL: OnceLock<DotKernel> = OnceLock::new();

impl DotKernel {
    /// Checks the CPU and returns the fastest kernel allowed by `simd_enabled`.
    pub fn detect(simd_enabled: bool) -> Self {
        if simd_enabled && avx2_available() {
            Self::Avx2
        } else {
            Self::Portable
        }
    }

    /// Whether this kernel can run on the current CPU.
    pub fn is_supported(self) -> bool {
        match self {
            Self::Portable => true,
            Self::Avx2 => avx2_available(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Portable => "portable",
            Self::Avx2 => "avx2",
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn avx2_available() -> bool {
    is_x86_feature_detected!("avx2")
}

#[cfg(not(target_arch = "x86_64"))]
fn avx2_available() -> bool {
    false
}

/// Selects the process-wide kernel. The first call wins (including an
/// implicit one through [`selected`]); later calls return the kernel that is
/// already in effect and warn if they asked for a different one.
pub fn configure(simd_enabled: bool) -> DotKernel {
    match select_once(&SELECTED_KERNEL, simd_enabled) {
        Selection::Initialized(kernel) => {
            tracing::info!("[kernel] using {} dot-product kernel", kernel.name());
            kernel
        }
        Selection::Kept(kernel) => kernel,
        Selection::Ignored { kernel, requested } => {
            tracing::warn!(
                "[kernel] {} kernel already in effect, ignoring request for {}",
                kernel.name(),
                requested.name()
            );
            kernel
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Selection {
    Initialized(DotKernel),
    Kept(DotKernel),
    Ignored {
        kernel: DotKernel,
        requested: DotKernel,
    },
}

fn select_once(cell: &OnceLock<DotKernel>, simd_enabled: bool) -> Selection {
    let mut initialized = false;
    let kernel = *cell.get_or_init(|| {
        initialized = true;
        DotKernel::detect(simd_enabled)
    });
    let requested = DotKernel::detect(simd_enabled);
    if initialized {
        Selection::Initialized(kernel)
    } else if requested == kernel {
        Selection::Kept(kernel)
    } else {
        Selection::Ignored { kernel, requested }
    }
}

/// The kernel in effect, selecting with SIMD allowed if nothing was configured.
pub fn selected() -> DotKernel {
    *SELECTED_KERNEL.get_or_init(|| DotKernel::detect(true))
}

/// Integer dot product of two quantized vectors.
///
/// # Panics
/// Panics if the vectors have different lengths.
#[inline]
pub fn dot(a: &[i8], b: &[i8]) -> i32 {
    dot_with(selected(), a, b)
}

/// [`dot`] with an explicit kernel. Falls back to the portable loop when the
/// requested kernel is not supported by the CPU.
///
/// # Panics
/// Panics if the vectors have different lengths.
pub fn dot_with(kernel: DotKernel, a: &[i8], b: &[i8]) -> i32 {
    assert_eq!(
        a.len(),
        b.len(),
        "dot product of vectors with different lengths"
    );

    let block_len = a.len() - a.len() % BLOCK_SIZE;
    let (a_block, a_rest) = a.split_at(block_len);
    let (b_block, b_rest) = b.split_at(block_len);

    let block = match kernel {
        DotKernel::Portable => dot_portable(a_block, b_block),
        DotKernel::Avx2 => dot_block_avx2(a_block, b_block),
    };
    block.wrapping_add(dot_portable(a_rest, b_rest))
}

/// Portable 4-wide unrolled integer dot product.
pub fn dot_portable(a: &[i8], b: &[i8]) -> i32 {
    debug_assert_eq!(a.len(), b.len());

    let mut sum0: i32 = 0;
    let mut sum1: i32 = 0;
    let mut sum2: i32 = 0;
    let mut sum3: i32 = 0;

    let chunks_a = a.chunks_exact(4);
    let chunks_b = b.chunks_exact(4);
    let rest_a = chunks_a.remainder();
    let rest_b = chunks_b.remainder();

    for (x, y) in chunks_a.zip(chunks_b) {
        sum0 = sum0.wrapping_add(i32::from(x[0]) * i32::from(y[0]));
        sum1 = sum1.wrapping_add(i32::from(x[1]) * i32::from(y[1]));
        sum2 = sum2.wrapping_add(i32::from(x[2]) * i32::from(y[2]));
        sum3 = sum3.wrapping_add(i32::from(x[3]) * i32::from(y[3]));
    }
    for (x, y) in rest_a.iter().zip(rest_b) {
        sum0 = sum0.wrapping_add(i32::from(*x) * i32::from(*y));
    }

    sum0.wrapping_add(sum1)
        .wrapping_add(sum2)
        .wrapping_add(sum3)
}

#[cfg(target_arch = "x86_64")]
fn dot_block_avx2(a: &[i8], b: &[i8]) -> i32 {
    if avx2_available() {
        // SAFETY: AVX2 support was checked at runtime.
        unsafe { avx2::dot_blocks(a, b) }
    } else {
        dot_portable(a, b)
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn dot_block_avx2(a: &[i8], b: &[i8]) -> i32 {
    dot_portable(a, b)
}

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use super::BLOCK_SIZE;
    use std::arch::x86_64::*;

    /// Dot product over slices whose length is a multiple of `BLOCK_SIZE`.
    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn dot_blocks(a: &[i8], b: &[i8]) -> i32 {
        debug_assert_eq!(a.len() % BLOCK_SIZE, 0);
        debug_assert_eq!(a.len(), b.len());

        let mut lanes = [0i32; 8];
        // SAFETY: AVX2 is enabled for this function and every load reads 16
        // bytes at `start + 16 <= len`, since len is a multiple of BLOCK_SIZE.
        unsafe {
            let mut acc = _mm256_setzero_si256();
            let mut offset = 0;
            while offset < a.len() {
                // Four 16-lane halves per 64-element block.
                for lane in 0..BLOCK_SIZE / 16 {
                    let start = offset + lane * 16;
                    let va = _mm_loadu_si128(a.as_ptr().add(start) as *const __m128i);
                    let vb = _mm_loadu_si128(b.as_ptr().add(start) as *const __m128i);
                    let wa = _mm256_cvtepi8_epi16(va);
                    let wb = _mm256_cvtepi8_epi16(vb);
                    // Pairwise i16 products summed into i32 lanes; max |pair| is 2^15.
                    acc = _mm256_add_epi32(acc, _mm256_madd_epi16(wa, wb));
                }
                offset += BLOCK_SIZE;
            }
            _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, acc);
        }
        lanes.iter().fold(0i32, |sum, lane| sum.wrapping_add(*lane))
    }
}

/// Float dot product, used where embeddings are compared unquantized.
///
/// # Panics
/// Panics if the vectors have different lengths.
pub fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(
        a.len(),
        b.len(),
        "dot product of vectors with different lengths"
    );

    let mut sums = [0.0f32; 4];
    let chunks_a = a.chunks_exact(4);
    let chunks_b = b.chunks_exact(4);
    let rest_a = chunks_a.remainder();
    let rest_b = chunks_b.remainder();

    for (x, y) in chunks_a.zip(chunks_b) {
        sums[0] += x[0] * y[0];
        sums[1] += x[1] * y[1];
        sums[2] += x[2] * y[2];
        sums[3] += x[3] * y[3];
    }
    let mut tail = 0.0f32;
    for (x, y) in rest_a.iter().zip(rest_b) {
        tail += x * y;
    }

    sums[0] + sums[1] + sums[2] + sums[3] + tail
}
