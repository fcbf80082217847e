//! Training losses. Everything here returns one value per sample; callers
//! take the batch mean.

use crate::error::{Result, SemIdError};
use candle_core::{Tensor, D};

/// Reconstruction loss between decoded `x_hat` and input `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionLoss {
    /// Summed squared error over all features.
    Mse,
    /// Squared error on the leading numeric block plus binary cross-entropy
    /// (with logits) on the trailing `n_cat_features` columns.
    Categorical { n_cat_features: usize },
}

impl ReconstructionLoss {
    pub fn new(n_cat_features: usize) -> Self {
        if n_cat_features == 0 {
            Self::Mse
        } else {
            Self::Categorical { n_cat_features }
        }
    }

    pub fn per_sample(&self, x_hat: &Tensor, x: &Tensor) -> Result<Tensor> {
        match *self {
            Self::Mse => squared_error(x_hat, x),
            Self::Categorical { n_cat_features } => {
                let dim = x.dim(D::Minus1)?;
                let n_num = dim.saturating_sub(n_cat_features);
                let n_cat = dim - n_num;

                let cat = bce_with_logits(&x_hat.narrow(1, n_num, n_cat)?, &x.narrow(1, n_num, n_cat)?)?;
                if n_num == 0 {
                    return Ok(cat);
                }
                let num = squared_error(&x_hat.narrow(1, 0, n_num)?, &x.narrow(1, 0, n_num)?)?;
                Ok((num + cat)?)
            }
        }
    }
}

fn squared_error(x_hat: &Tensor, x: &Tensor) -> Result<Tensor> {
    Ok((x_hat - x)?.sqr()?.sum(D::Minus1)?)
}

/// `max(z, 0) - z * t + log(1 + exp(-|z|))`, summed per row.
fn bce_with_logits(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let softplus = ((logits.abs()?.neg()?.exp()? + 1.0)?).log()?;
    let loss = ((logits.relu()? - (logits * targets)?)? + softplus)?;
    Ok(loss.sum(D::Minus1)?)
}

/// Codebook + commitment loss for one layer.
///
/// `|sg(residual) - codeword|^2` moves the codeword toward the encoder output,
/// `commitment_weight * |residual - sg(codeword)|^2` moves the encoder output
/// toward the codeword.
pub fn quantize_loss(residual: &Tensor, codeword: &Tensor, commitment_weight: f64) -> Result<Tensor> {
    let emb_loss = (residual.detach() - codeword)?.sqr()?.sum(D::Minus1)?;
    let query_loss = (residual - codeword.detach())?.sqr()?.sum(D::Minus1)?;
    Ok((emb_loss + (query_loss * commitment_weight)?)?)
}

/// Sum of [`quantize_loss`] over every residual layer.
#[derive(Debug, Clone, Copy)]
pub struct RqVaeLoss {
    pub commitment_weight: f64,
}

impl RqVaeLoss {
    pub fn per_sample(&self, residuals: &[Tensor], codewords: &[Tensor]) -> Result<Tensor> {
        let mut total: Option<Tensor> = None;
        for (residual, codeword) in residuals.iter().zip(codewords.iter()) {
            let layer = quantize_loss(residual, codeword, self.commitment_weight)?;
            total = Some(match total {
                Some(t) => (t + layer)?,
                None => layer,
            });
        }
        match total {
            Some(t) => Ok(t),
            None => Err(SemIdError::Config("no residual layers".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};

    #[test]
    fn test_mse_per_sample() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::new(&[[1.0f32, 2.0], [0.0, 0.0]], &device)?;
        let x_hat = Tensor::new(&[[1.0f32, 0.0], [3.0, 4.0]], &device)?;
        let loss = ReconstructionLoss::new(0).per_sample(&x_hat, &x)?;
        assert_eq!(loss.to_vec1::<f32>()?, vec![4.0, 25.0]);
        Ok(())
    }

    #[test]
    fn test_categorical_block_uses_cross_entropy() -> Result<()> {
        let device = Device::Cpu;
        // One numeric column, two categorical columns
        let x = Tensor::new(&[[1.0f32, 1.0, 0.0]], &device)?;
        let x_hat = Tensor::new(&[[0.0f32, 0.0, 0.0]], &device)?;
        let loss = ReconstructionLoss::new(2).per_sample(&x_hat, &x)?.to_vec1::<f32>()?;
        // 1^2 + 2 * ln(2)
        let expected = 1.0 + 2.0 * std::f32::consts::LN_2;
        assert!((loss[0] - expected).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_bce_is_stable_for_large_logits() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[100.0f32, -100.0]], &device)?;
        let targets = Tensor::new(&[[1.0f32, 0.0]], &device)?;
        let loss = bce_with_logits(&logits, &targets)?.to_vec1::<f32>()?;
        assert!(loss[0].is_finite() && loss[0] >= 0.0 && loss[0] < 1e-6);
        Ok(())
    }

    #[test]
    fn test_quantize_loss_gradients_split_by_side() -> Result<()> {
        let device = Device::Cpu;
        let residual = Var::new(&[[1.0f32, 0.0]], &device)?;
        let codeword = Var::new(&[[0.0f32, 0.0]], &device)?;
        let loss = quantize_loss(residual.as_tensor(), codeword.as_tensor(), 0.25)?;
        assert_eq!(loss.to_vec1::<f32>()?, vec![1.25]);

        let grads = loss.sum_all()?.backward()?;
        // d/dr of 0.25 * |r - c|^2 = 0.5 * (r - c)
        let g_res = grads.get(residual.as_tensor()).expect("residual grad").to_vec2::<f32>()?;
        assert_eq!(g_res, vec![vec![0.5, 0.0]]);
        // d/dc of |r - c|^2 = -2 * (r - c)
        let g_cw = grads.get(codeword.as_tensor()).expect("codeword grad").to_vec2::<f32>()?;
        assert_eq!(g_cw, vec![vec![-2.0, 0.0]]);
        Ok(())
    }

    #[test]
    fn test_rqvae_loss_sums_layers() -> Result<()> {
        let device = Device::Cpu;
        let r = Tensor::new(&[[1.0f32]], &device)?;
        let c = Tensor::new(&[[0.0f32]], &device)?;
        let loss = RqVaeLoss { commitment_weight: 1.0 }.per_sample(&[r.clone(), r], &[c.clone(), c])?;
        assert_eq!(loss.to_vec1::<f32>()?, vec![4.0]);
        Ok(())
    }
}
