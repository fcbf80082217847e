use crate::config::RqVaeConfig;
use crate::core::codebook::{CodebookLayer, InitState, QuantizeOptions, QuantizeOutput};
use crate::error::{Result, SemIdError};
use candle_core::{Device, Tensor, Var};
use rand::rngs::StdRng;

/// Per-layer results of a residual quantization pass over a batch.
#[derive(Debug, Clone)]
pub struct ResidualOutput {
    /// Passthrough embeddings, one `(batch, dim)` tensor per layer.
    pub embeddings: Vec<Tensor>,
    /// Residual entering each layer.
    pub residuals: Vec<Tensor>,
    /// Hard codewords selected by each layer.
    pub codewords: Vec<Tensor>,
    /// `[batch][layer]` slot ids.
    pub sem_ids: Vec<Vec<u32>>,
}

impl ResidualOutput {
    fn with_capacity(batch: usize, n_layers: usize) -> Self {
        Self {
            embeddings: Vec::with_capacity(n_layers),
            residuals: Vec::with_capacity(n_layers),
            codewords: Vec::with_capacity(n_layers),
            sem_ids: vec![Vec::with_capacity(n_layers); batch],
        }
    }

    /// Records one layer and returns the residual for the next:
    /// `residual - sg(codeword)`.
    fn push(&mut self, residual: Tensor, q: QuantizeOutput) -> Result<Tensor> {
        let next = (&residual - q.codewords.detach())?;
        for (row, id) in self.sem_ids.iter_mut().zip(q.ids) {
            row.push(id);
        }
        self.residuals.push(residual);
        self.embeddings.push(q.embeddings);
        self.codewords.push(q.codewords);
        Ok(next)
    }

    /// Sum of the per-layer embeddings, the decoder input.
    pub fn quantized(&self) -> Result<Tensor> {
        let stacked = Tensor::stack(&self.embeddings, 0)?;
        Ok(stacked.sum(0)?)
    }
}

/// Stack of codebook layers, each quantizing what the previous ones left.
pub struct ResidualQuantizer {
    layers: Vec<CodebookLayer>,
}

impl ResidualQuantizer {
    pub fn new(config: &RqVaeConfig, rng: &mut StdRng, device: &Device) -> Result<Self> {
        let layers = (0..config.n_layers)
            .map(|i| CodebookLayer::new(config, config.seed.wrapping_add(i as u64), rng, device))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[CodebookLayer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [CodebookLayer] {
        &mut self.layers
    }

    pub fn is_initialized(&self) -> bool {
        self.layers.iter().all(|l| l.state() == InitState::Initialized)
    }

    /// Runs k-means initialization for every pending layer, layer by layer,
    /// each on the residuals left by the already initialized ones.
    pub fn initialize(&mut self, latent: &Tensor) -> Result<()> {
        let mut residual = latent.detach();
        for layer in self.layers.iter_mut() {
            layer.initialize(&residual)?;
            let q = layer.quantize(&residual, QuantizeOptions::eval())?;
            residual = (&residual - q.codewords.detach())?;
        }
        Ok(())
    }

    /// Training-time pass: lazy initialization and usage tracking included.
    pub fn forward(&mut self, latent: &Tensor, opts: QuantizeOptions) -> Result<ResidualOutput> {
        let batch = latent.dim(0)?;
        let mut out = ResidualOutput::with_capacity(batch, self.layers.len());
        let mut residual = latent.clone();
        for layer in self.layers.iter_mut() {
            let q = layer.forward(&residual, opts)?;
            residual = out.push(residual, q)?;
        }
        Ok(out)
    }

    /// Side-effect free pass.
    pub fn quantize(&self, latent: &Tensor, opts: QuantizeOptions) -> Result<ResidualOutput> {
        let batch = latent.dim(0)?;
        let mut out = ResidualOutput::with_capacity(batch, self.layers.len());
        let mut residual = latent.clone();
        for layer in self.layers.iter() {
            let q = layer.quantize(&residual, opts)?;
            residual = out.push(residual, q)?;
        }
        Ok(out)
    }

    /// Reconstructs the quantized latent from `[batch][layer]` ids.
    pub fn decode_ids(&self, sem_ids: &[Vec<u32>]) -> Result<Tensor> {
        let mut total: Option<Tensor> = None;
        for (i, layer) in self.layers.iter().enumerate() {
            let column: Vec<u32> = sem_ids.iter().map(|row| row[i]).collect();
            let emb = layer.lookup(&column)?;
            total = Some(match total {
                Some(t) => (t + emb)?,
                None => emb,
            });
        }
        // n_layers >= 1 is enforced by the config
        total.ok_or_else(|| SemIdError::Config("quantizer has no layers".into()))
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.layers.iter_mut().for_each(|l| l.mark_initialized());
    }

    pub fn named_vars(&self, prefix: &str) -> Vec<(String, Var)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, l)| l.named_vars(&format!("{prefix}.layers.{i}")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn quantizer(kmeans: bool) -> ResidualQuantizer {
        let config = RqVaeConfig {
            embed_dim: 4,
            codebook_size: 8,
            n_layers: 3,
            codebook_kmeans_init: kmeans,
            ..RqVaeConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        ResidualQuantizer::new(&config, &mut rng, &Device::Cpu).unwrap()
    }

    fn random_latent(rows: usize) -> Tensor {
        let mut rng = StdRng::seed_from_u64(99);
        let data: Vec<f32> = (0..rows * 4).map(|_| rng.gen_range(-2.0..2.0)).collect();
        Tensor::from_vec(data, (rows, 4), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_residual_subtraction_invariant() -> Result<()> {
        let rq = quantizer(false);
        let out = rq.quantize(&random_latent(16), QuantizeOptions::eval())?;
        assert_eq!(out.residuals.len(), 3);

        for i in 0..2 {
            let lhs = (&out.codewords[i] + &out.residuals[i + 1])?.to_vec2::<f32>()?;
            let rhs = out.residuals[i].to_vec2::<f32>()?;
            for (a, b) in lhs.iter().flatten().zip(rhs.iter().flatten()) {
                assert!((a - b).abs() < 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn test_ids_are_deterministic() -> Result<()> {
        let rq = quantizer(false);
        let x = random_latent(32);
        let a = rq.quantize(&x, QuantizeOptions::eval())?.sem_ids;
        let b = rq.quantize(&x, QuantizeOptions::eval())?.sem_ids;
        assert_eq!(a, b);
        assert!(a.iter().all(|row| row.len() == 3 && row.iter().all(|&id| id < 8)));
        Ok(())
    }

    #[test]
    fn test_zero_latent_gets_valid_ids() -> Result<()> {
        let rq = quantizer(false);
        let zeros = Tensor::zeros((2, 4), candle_core::DType::F32, &Device::Cpu)?;
        let out = rq.quantize(&zeros, QuantizeOptions::train(0.5))?;
        assert_eq!(out.sem_ids[0], out.sem_ids[1]);
        assert_eq!(out.sem_ids, rq.quantize(&zeros, QuantizeOptions::eval())?.sem_ids);
        Ok(())
    }

    #[test]
    fn test_decode_ids_matches_quantized_sum() -> Result<()> {
        let rq = quantizer(false);
        let out = rq.quantize(&random_latent(5), QuantizeOptions::eval())?;
        let a = out.quantized()?.to_vec2::<f32>()?;
        let b = rq.decode_ids(&out.sem_ids)?.to_vec2::<f32>()?;
        for (x, y) in a.iter().flatten().zip(b.iter().flatten()) {
            assert!((x - y).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_explicit_initialize_matches_lazy_forward() -> Result<()> {
        let x = random_latent(64);

        let mut eager = quantizer(true);
        eager.initialize(&x)?;
        assert!(eager.is_initialized());

        let mut lazy = quantizer(true);
        assert!(!lazy.is_initialized());
        lazy.forward(&x, QuantizeOptions::eval())?;
        assert!(lazy.is_initialized());

        assert_eq!(
            eager.quantize(&x, QuantizeOptions::eval())?.sem_ids,
            lazy.quantize(&x, QuantizeOptions::eval())?.sem_ids
        );
        Ok(())
    }

    #[test]
    fn test_var_names() {
        let names: Vec<String> = quantizer(false).named_vars("quantizer").into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["quantizer.layers.0.codebook", "quantizer.layers.1.codebook", "quantizer.layers.2.codebook"]
        );
    }
}
