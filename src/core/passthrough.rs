//! Gradient passthrough for the discrete codeword selection.
//!
//! Every estimator here obeys the same contract: the forward value is the
//! selected codeword, and the gradient reaching the encoder output comes only
//! from a surrogate expression in `x`. The two halves are built separately and
//! joined by [`bind`]: the detached codeword carries the value and
//! `surrogate - sg(surrogate)`, which is exactly zero, carries the gradient.

use crate::core::ops::{l2_normalize_rows, row_dot, row_norms};
use candle_core::{Tensor, D};

const EPS: f64 = 1e-8;

/// `sg(codeword) + (surrogate - sg(surrogate))`.
pub fn bind(surrogate: &Tensor, codeword: &Tensor) -> candle_core::Result<Tensor> {
    codeword.detach() + (surrogate - surrogate.detach())?
}

/// Classic straight-through estimator: identity gradient.
pub fn straight_through(x: &Tensor, codeword: &Tensor) -> candle_core::Result<Tensor> {
    bind(x, codeword)
}

/// Rotation trick surrogate.
///
/// With `u = x/|x|`, `q = c/|c|` and `w = (u + q)/|u + q|` all held constant,
/// `R x = x - 2 (x.w) w + 2 (x.u) q` rotates `u` onto `q`. Scaling by the
/// constant `|c| / |x|` maps `x` onto `c`, so the backward pass sees the
/// linear map `(|c| / |x|) R` instead of an identity.
pub fn rotation_surrogate(x: &Tensor, codeword: &Tensor) -> candle_core::Result<Tensor> {
    let c = codeword.detach();
    let u = l2_normalize_rows(&x.detach(), EPS)?;
    let q = l2_normalize_rows(&c, EPS)?;
    let w = l2_normalize_rows(&(&u + &q)?, 1e-6)?.detach();

    let reflected = x.broadcast_sub(&row_dot(x, &w)?.affine(2.0, 0.0)?.broadcast_mul(&w)?)?;
    let rotated = reflected.broadcast_add(&row_dot(x, &u)?.affine(2.0, 0.0)?.broadcast_mul(&q)?)?;

    let scale = row_norms(&c)?.broadcast_div(&(row_norms(&x.detach())? + 1e-6)?)?;
    rotated.broadcast_mul(&scale)
}

pub fn rotation_trick(x: &Tensor, codeword: &Tensor) -> candle_core::Result<Tensor> {
    bind(&rotation_surrogate(x, codeword)?, codeword)
}

/// Straight-through Gumbel softmax.
///
/// `distances` is `(batch, K)`, `one_hot` the hard selection as `(batch, K)`
/// and `codebook` the `(K, dim)` table. The value is `one_hot @ codebook`;
/// gradients flow through the tempered softmax of the noisy negative
/// distances into both the encoder output and the codebook.
pub fn gumbel_straight_through(
    distances: &Tensor,
    one_hot: &Tensor,
    codebook: &Tensor,
    temperature: f64,
) -> candle_core::Result<Tensor> {
    let uniform = Tensor::rand(0f32, 1f32, distances.dims(), distances.device())?;
    let gumbel = ((uniform + EPS)?.log()?.neg()? + EPS)?.log()?.neg()?;
    let logits = ((distances.neg()? + gumbel)? / temperature.max(EPS))?;
    let soft = candle_nn::ops::softmax(&logits, D::Minus1)?;
    let weights = bind(&soft, one_hot)?;
    weights.matmul(codebook)
}
