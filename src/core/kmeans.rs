use crate::error::{Result, SemIdError};
use crate::simd::{get_squared_euclidean, nearest};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct KMeansConfig {
    pub k: usize,
    pub max_iterations: usize,
    /// Stop once no centroid moves further than this (squared L2).
    pub tolerance: f32,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct KMeansOutput {
    pub centroids: Vec<Vec<f32>>,
    pub assignments: Vec<usize>,
    pub iterations: usize,
    /// Mean squared distance of each point to its centroid.
    pub inertia: f32,
}

/// Lloyd's k-means with k-means++ seeding.
///
/// Always returns exactly `k` centroids. When there are fewer distinct points
/// than `k`, the surplus centroids duplicate existing points; empty clusters
/// keep their previous centroid.
pub fn kmeans(data: &[Vec<f32>], config: &KMeansConfig) -> Result<KMeansOutput> {
    if data.is_empty() {
        return Err(SemIdError::Config("k-means needs at least one point".into()));
    }
    if config.k == 0 {
        return Err(SemIdError::Config("k-means needs k > 0".into()));
    }
    let dim = data[0].len();
    if data.iter().any(|p| p.len() != dim) {
        return Err(SemIdError::Config("k-means points have mixed dimensions".into()));
    }

    let dist_func = get_squared_euclidean();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centroids = plusplus_init(data, config.k, &mut rng);
    let mut iterations = 0;

    for _ in 0..config.max_iterations {
        iterations += 1;

        // 1. Assignment
        let assignments: Vec<usize> = data
            .par_iter()
            .map(|point| nearest(point, &centroids, dist_func).0)
            .collect();

        // 2. Update
        let mut sums = vec![vec![0.0f32; dim]; config.k];
        let mut counts = vec![0usize; config.k];
        for (point, &c) in data.iter().zip(assignments.iter()) {
            counts[c] += 1;
            for (s, &v) in sums[c].iter_mut().zip(point.iter()) {
                *s += v;
            }
        }

        let mut max_shift = 0.0f32;
        for (c, (sum, &count)) in sums.into_iter().zip(counts.iter()).enumerate() {
            if count == 0 {
                continue;
            }
            let updated: Vec<f32> = sum.into_iter().map(|s| s / count as f32).collect();
            let shift = unsafe { dist_func(&updated, &centroids[c]) };
            max_shift = max_shift.max(shift);
            centroids[c] = updated;
        }

        if max_shift <= config.tolerance {
            break;
        }
    }

    // Final assignment against the converged centroids
    let (assignments, dists): (Vec<usize>, Vec<f32>) = data
        .par_iter()
        .map(|point| nearest(point, &centroids, dist_func))
        .unzip();
    let inertia = dists.iter().sum::<f32>() / data.len() as f32;

    Ok(KMeansOutput {
        centroids,
        assignments,
        iterations,
        inertia,
    })
}

fn plusplus_init(data: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let dist_func = get_squared_euclidean();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(data[rng.gen_range(0..data.len())].clone());

    while centroids.len() < k {
        let distances: Vec<f32> = data
            .par_iter()
            .map(|point| nearest(point, &centroids, dist_func).1)
            .collect();
        let total: f32 = distances.iter().sum();

        let chosen = if total > 0.0 {
            let mut r = rng.gen::<f32>() * total;
            let mut chosen = data.len() - 1;
            for (i, &d) in distances.iter().enumerate() {
                r -= d;
                if r <= 0.0 && d > 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            // Every point already coincides with a centroid
            rng.gen_range(0..data.len())
        };
        centroids.push(data[chosen].clone());
    }

    centroids
}
