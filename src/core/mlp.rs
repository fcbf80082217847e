use crate::core::ops::{l2_normalize_rows, uniform_var};
use crate::error::Result;
use candle_core::{Device, Module, Tensor, Var};
use candle_nn::Linear;
use rand::rngs::StdRng;

/// Bias-free MLP with SiLU between layers and an optional L2-normalized
/// output.
pub struct Mlp {
    weights: Vec<Var>,
    layers: Vec<Linear>,
    normalize: bool,
}

impl Mlp {
    pub fn new(
        input_dim: usize,
        hidden_dims: &[usize],
        out_dim: usize,
        normalize: bool,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Self> {
        let dims: Vec<usize> = std::iter::once(input_dim)
            .chain(hidden_dims.iter().copied())
            .chain(std::iter::once(out_dim))
            .collect();

        let mut weights = Vec::with_capacity(dims.len() - 1);
        let mut layers = Vec::with_capacity(dims.len() - 1);
        for pair in dims.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            // Same bound as torch's default Linear init
            let weight = uniform_var(rng, fan_out, fan_in, 1.0 / (fan_in as f32).sqrt(), device)?;
            layers.push(Linear::new(weight.as_tensor().clone(), None));
            weights.push(weight);
        }

        Ok(Self {
            weights,
            layers,
            normalize,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut h = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            if i != last {
                h = candle_nn::ops::silu(&h)?;
            }
        }
        if self.normalize {
            h = l2_normalize_rows(&h, 1e-12)?;
        }
        Ok(h)
    }

    pub fn named_vars(&self, prefix: &str) -> Vec<(String, Var)> {
        self.weights
            .iter()
            .enumerate()
            .map(|(i, w)| (format!("{prefix}.layers.{i}.weight"), w.clone()))
            .collect()
    }
}
