//! Small vector and tensor helpers shared by the quantizer, the MLPs and
//! k-means.

use candle_core::{DType, Device, Tensor, Var, D};
use rand::Rng;

/// L2 Normalize a vector in-place.
/// x = x / ||x||
/// Uses 1.0 / sqrt(sum) multiplication for speed.
pub fn l2_normalize(vector: &mut [f32]) {
    let mut sum_sq = 0.0;
    for &val in vector.iter() {
        sum_sq += val * val;
    }

    if sum_sq > f32::EPSILON {
        let inv_norm = 1.0 / sum_sq.sqrt();
        for val in vector.iter_mut() {
            *val *= inv_norm;
        }
    }
}

/// Row norms of a `(rows, dim)` tensor, kept as `(rows, 1)`.
pub fn row_norms(x: &Tensor) -> candle_core::Result<Tensor> {
    x.sqr()?.sum_keepdim(D::Minus1)?.sqrt()
}

/// Row-wise L2 normalization. `eps` keeps zero rows at zero.
pub fn l2_normalize_rows(x: &Tensor, eps: f64) -> candle_core::Result<Tensor> {
    x.broadcast_div(&(row_norms(x)? + eps)?)
}

/// Row-wise dot product of two `(rows, dim)` tensors, as `(rows, 1)`.
pub fn row_dot(a: &Tensor, b: &Tensor) -> candle_core::Result<Tensor> {
    (a * b)?.sum_keepdim(D::Minus1)
}

/// Trainable `(rows, cols)` parameter drawn from U(-bound, bound).
pub fn uniform_var(
    rng: &mut impl Rng,
    rows: usize,
    cols: usize,
    bound: f32,
    device: &Device,
) -> candle_core::Result<Var> {
    let data: Vec<f32> = (0..rows * cols).map(|_| rng.gen_range(-bound..=bound)).collect();
    Var::from_tensor(&Tensor::from_vec(data, (rows, cols), device)?)
}

/// Copies a 2-D tensor out of the graph into host rows.
pub fn to_rows(x: &Tensor) -> candle_core::Result<Vec<Vec<f32>>> {
    x.detach().to_dtype(DType::F32)?.to_vec2::<f32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize_slice() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        // Zero vector is left untouched
        let mut zero = vec![0.0; 4];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 4]);
    }

    #[test]
    fn test_l2_normalize_rows_handles_zero_row() -> candle_core::Result<()> {
        let x = Tensor::new(&[[3.0f32, 4.0], [0.0, 0.0]], &Device::Cpu)?;
        let rows = l2_normalize_rows(&x, 1e-12)?.to_vec2::<f32>()?;
        assert!((rows[0][0] - 0.6).abs() < 1e-6);
        assert_eq!(rows[1], vec![0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_uniform_var_is_seeded() -> candle_core::Result<()> {
        use rand::SeedableRng;
        let a = uniform_var(&mut rand::rngs::StdRng::seed_from_u64(3), 4, 5, 0.5, &Device::Cpu)?;
        let b = uniform_var(&mut rand::rngs::StdRng::seed_from_u64(3), 4, 5, 0.5, &Device::Cpu)?;
        assert_eq!(to_rows(a.as_tensor())?, to_rows(b.as_tensor())?);
        assert!(to_rows(a.as_tensor())?.iter().flatten().all(|v| v.abs() <= 0.5));
        Ok(())
    }
}
