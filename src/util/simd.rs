//! SIMD distance kernels using the wide crate for true vectorization.
//!
//! These are the inner loops of every distance computation in the engine.
//! Each kernel processes eight lanes at a time with `f32x8` and finishes the
//! tail with a scalar loop, so results are identical to the scalar reference
//! up to float summation order.

use wide::f32x8;

/// SIMD-optimized dot product for vectors.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut sum = f32x8::splat(0.0);
    let chunks = a.len() / 8;

    for i in 0..chunks {
        let start = i * 8;

        let a_vec = f32x8::new([
            a[start],
            a[start + 1],
            a[start + 2],
            a[start + 3],
            a[start + 4],
            a[start + 5],
            a[start + 6],
            a[start + 7],
        ]);

        let b_vec = f32x8::new([
            b[start],
            b[start + 1],
            b[start + 2],
            b[start + 3],
            b[start + 4],
            b[start + 5],
            b[start + 6],
            b[start + 7],
        ]);

        sum += a_vec * b_vec;
    }

    // Sum the SIMD register
    let sum_array = sum.to_array();
    let mut result = sum_array.iter().sum::<f32>();

    // Handle remaining elements
    let remainder = a.len() % 8;
    for i in (a.len() - remainder)..a.len() {
        result += a[i] * b[i];
    }

    result
}

/// SIMD-optimized squared Euclidean distance.
pub fn l2_distance_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut sum = f32x8::splat(0.0);
    let chunks = a.len() / 8;

    for i in 0..chunks {
        let start = i * 8;

        let a_vec = f32x8::new([
            a[start],
            a[start + 1],
            a[start + 2],
            a[start + 3],
            a[start + 4],
            a[start + 5],
            a[start + 6],
            a[start + 7],
        ]);

        let b_vec = f32x8::new([
            b[start],
            b[start + 1],
            b[start + 2],
            b[start + 3],
            b[start + 4],
            b[start + 5],
            b[start + 6],
            b[start + 7],
        ]);

        let diff = a_vec - b_vec;
        sum += diff * diff;
    }

    let sum_array = sum.to_array();
    let mut result = sum_array.iter().sum::<f32>();

    let remainder = a.len() % 8;
    for i in (a.len() - remainder)..a.len() {
        let diff = a[i] - b[i];
        result += diff * diff;
    }

    result
}

/// SIMD-optimized vector magnitude (L2 norm).
pub fn magnitude(vector: &[f32]) -> f32 {
    let mut sum_squares = f32x8::splat(0.0);
    let chunks = vector.len() / 8;

    for i in 0..chunks {
        let start = i * 8;

        let vec = f32x8::new([
            vector[start],
            vector[start + 1],
            vector[start + 2],
            vector[start + 3],
            vector[start + 4],
            vector[start + 5],
            vector[start + 6],
            vector[start + 7],
        ]);

        sum_squares += vec * vec;
    }

    let sum_array = sum_squares.to_array();
    let mut result = sum_array.iter().sum::<f32>();

    let remainder = vector.len() % 8;
    for &val in vector.iter().skip(vector.len() - remainder) {
        result += val * val;
    }

    result.sqrt()
}
