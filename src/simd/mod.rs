pub mod distance;
pub mod avx2;

pub type DistanceFunc = unsafe fn(&[f32], &[f32]) -> f32;

/// Squared L2 distance, dispatched to AVX2+FMA when the CPU has it.
pub fn get_squared_euclidean() -> DistanceFunc {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return avx2::squared_euclidean_avx2;
        }
    }

    // Fallback
    wrapper_scalar
}

unsafe fn wrapper_scalar(a: &[f32], b: &[f32]) -> f32 {
    distance::squared_euclidean(a, b)
}

/// Index of the closest centroid. Ties resolve to the lowest index.
pub fn nearest(point: &[f32], centroids: &[Vec<f32>], dist_func: DistanceFunc) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = unsafe { dist_func(point, centroid) };
        if dist < best.1 {
            best = (idx, dist);
        }
    }
    best
}
