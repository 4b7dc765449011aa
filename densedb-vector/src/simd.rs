// SPDX-License-Identifier: AGPL-3.0-or-later
// DenseDB - Embedded Exact Vector Search Engine
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! SIMD Dot-Product Kernels
//!
//! The brute-force scan is one dot product per stored vector, so this is
//! where the cycles go. Kernels are written with `core::arch` intrinsics,
//! selected once at runtime and cached:
//!
//! - AVX2 + FMA: 8 floats per register, four accumulators for ILP
//! - SSE4.1: 4 floats per register
//! - NEON: 4 floats per register (always present on aarch64)
//! - Scalar: universal fallback
//!
//! With embeddings pre-normalized at finalize and a normalized query, the
//! dot product *is* the cosine similarity.

use std::sync::OnceLock;

/// Detected SIMD capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdCapability {
    Scalar,
    /// SSE4.1 (x86_64)
    Sse41,
    /// AVX2 + FMA (x86_64)
    Avx2,
    /// NEON (aarch64)
    Neon,
}

impl SimdCapability {
    /// Detect CPU SIMD capabilities at runtime.
    #[allow(unreachable_code)]
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                return SimdCapability::Avx2;
            }
            if is_x86_feature_detected!("sse4.1") {
                return SimdCapability::Sse41;
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            // NEON is mandatory on aarch64.
            return SimdCapability::Neon;
        }

        SimdCapability::Scalar
    }

    /// Width in f32 lanes.
    pub fn width(&self) -> usize {
        match self {
            SimdCapability::Scalar => 1,
            SimdCapability::Sse41 | SimdCapability::Neon => 4,
            SimdCapability::Avx2 => 8,
        }
    }
}

static SIMD_CAPABILITY: OnceLock<SimdCapability> = OnceLock::new();

/// Process-wide cached capability.
pub fn simd_capability() -> SimdCapability {
    *SIMD_CAPABILITY.get_or_init(SimdCapability::detect)
}

/// Dot-product kernel with automatic dispatch.
#[derive(Debug, Clone, Copy)]
pub struct DotKernel {
    capability: SimdCapability,
}

impl DotKernel {
    pub fn detect() -> Self {
        DotKernel {
            capability: simd_capability(),
        }
    }

    /// Kernel with a fixed capability (for tests).
    pub fn with_capability(capability: SimdCapability) -> Self {
        DotKernel { capability }
    }

    pub fn capability(&self) -> SimdCapability {
        self.capability
    }

    /// Dot product of two equal-length vectors.
    #[inline]
    pub fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());

        match self.capability {
            #[cfg(target_arch = "x86_64")]
            SimdCapability::Avx2 => unsafe { dot_avx2(a, b) },
            #[cfg(target_arch = "x86_64")]
            SimdCapability::Sse41 => unsafe { dot_sse41(a, b) },
            #[cfg(target_arch = "aarch64")]
            SimdCapability::Neon => unsafe { dot_neon(a, b) },
            _ => dot_scalar(a, b),
        }
    }

    /// L2-normalizes `v` in place and returns its original norm.
    ///
    /// Vectors with `norm² <= 1e-10` are left untouched and report 0.0, so a
    /// zero vector stays a zero vector instead of turning into NaNs.
    pub fn normalize(&self, v: &mut [f32]) -> f32 {
        let norm_sq = self.dot(v, v);
        if norm_sq <= 1e-10 {
            return 0.0;
        }
        let norm = norm_sq.sqrt();
        let inv = 1.0 / norm;
        for x in v.iter_mut() {
            *x *= inv;
        }
        norm
    }
}

impl Default for DotKernel {
    fn default() -> Self {
        Self::detect()
    }
}

/// Scalar dot product (reference implementation).
#[inline]
pub fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// ============================================================================
// x86_64 Implementations
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
pub unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let mut sum0 = _mm256_setzero_ps();
    let mut sum1 = _mm256_setzero_ps();
    let mut sum2 = _mm256_setzero_ps();
    let mut sum3 = _mm256_setzero_ps();

    let chunks = n / 8;
    let chunks4 = chunks / 4;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks4 {
        let base = i * 32;

        let va0 = _mm256_loadu_ps(a_ptr.add(base));
        let vb0 = _mm256_loadu_ps(b_ptr.add(base));
        sum0 = _mm256_fmadd_ps(va0, vb0, sum0);

        let va1 = _mm256_loadu_ps(a_ptr.add(base + 8));
        let vb1 = _mm256_loadu_ps(b_ptr.add(base + 8));
        sum1 = _mm256_fmadd_ps(va1, vb1, sum1);

        let va2 = _mm256_loadu_ps(a_ptr.add(base + 16));
        let vb2 = _mm256_loadu_ps(b_ptr.add(base + 16));
        sum2 = _mm256_fmadd_ps(va2, vb2, sum2);

        let va3 = _mm256_loadu_ps(a_ptr.add(base + 24));
        let vb3 = _mm256_loadu_ps(b_ptr.add(base + 24));
        sum3 = _mm256_fmadd_ps(va3, vb3, sum3);
    }

    for i in (chunks4 * 4)..chunks {
        let offset = i * 8;
        let va = _mm256_loadu_ps(a_ptr.add(offset));
        let vb = _mm256_loadu_ps(b_ptr.add(offset));
        sum0 = _mm256_fmadd_ps(va, vb, sum0);
    }

    let sum01 = _mm256_add_ps(sum0, sum1);
    let sum23 = _mm256_add_ps(sum2, sum3);
    let sum = _mm256_add_ps(sum01, sum23);

    // Horizontal sum
    let sum_high = _mm256_extractf128_ps(sum, 1);
    let sum_low = _mm256_castps256_ps128(sum);
    let sum128 = _mm_add_ps(sum_low, sum_high);
    let sum64 = _mm_add_ps(sum128, _mm_movehl_ps(sum128, sum128));
    let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 1));

    let mut result = _mm_cvtss_f32(sum32);

    // Handle remainder
    for i in (chunks * 8)..n {
        result += *a.get_unchecked(i) * *b.get_unchecked(i);
    }

    result
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse4.1")]
#[inline]
pub unsafe fn dot_sse41(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let mut sum = _mm_setzero_ps();

    let chunks = n / 4;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let offset = i * 4;
        let va = _mm_loadu_ps(a_ptr.add(offset));
        let vb = _mm_loadu_ps(b_ptr.add(offset));
        sum = _mm_add_ps(sum, _mm_mul_ps(va, vb));
    }

    // Horizontal sum
    let sum64 = _mm_add_ps(sum, _mm_movehl_ps(sum, sum));
    let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 1));

    let mut result = _mm_cvtss_f32(sum32);

    for i in (chunks * 4)..n {
        result += *a.get_unchecked(i) * *b.get_unchecked(i);
    }

    result
}

// ============================================================================
// aarch64 NEON Implementation
// ============================================================================

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
#[inline]
pub unsafe fn dot_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let n = a.len();
    let mut sum0 = vdupq_n_f32(0.0);
    let mut sum1 = vdupq_n_f32(0.0);

    let chunks = n / 8;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let base = i * 8;
        let va0 = vld1q_f32(a_ptr.add(base));
        let vb0 = vld1q_f32(b_ptr.add(base));
        sum0 = vfmaq_f32(sum0, va0, vb0);

        let va1 = vld1q_f32(a_ptr.add(base + 4));
        let vb1 = vld1q_f32(b_ptr.add(base + 4));
        sum1 = vfmaq_f32(sum1, va1, vb1);
    }

    let mut result = vaddvq_f32(vaddq_f32(sum0, sum1));

    for i in (chunks * 8)..n {
        result += *a.get_unchecked(i) * *b.get_unchecked(i);
    }

    result
}
