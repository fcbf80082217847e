use crate::config::{DistanceMode, ForwardMode, RqVaeConfig};
use crate::core::kmeans::{kmeans, KMeansConfig};
use crate::core::ops::{l2_normalize, l2_normalize_rows, to_rows, uniform_var};
use crate::core::passthrough::{gumbel_straight_through, rotation_trick, straight_through};
use crate::error::{Result, SemIdError};
use candle_core::{DType, Device, Tensor, Var};
use rand::rngs::StdRng;
use tracing::{debug, info};

/// Lifecycle of a codebook table with respect to k-means initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// Random table, waiting for the first batch to cluster.
    Uninitialized,
    Initialized,
}

/// Per-call knobs for a quantization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuantizeOptions {
    /// Use the gradient passthrough rule. Off means plain codeword lookup.
    pub train: bool,
    /// Gumbel softmax temperature. Only read in `ForwardMode::GumbelSoftmax`;
    /// without it that mode falls back to the straight-through estimator.
    pub temperature: Option<f64>,
}

impl QuantizeOptions {
    pub fn eval() -> Self {
        Self::default()
    }

    pub fn train(temperature: f64) -> Self {
        Self {
            train: true,
            temperature: Some(temperature),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuantizeOutput {
    /// Value equal to `codewords`, gradient routed to the input.
    pub embeddings: Tensor,
    /// Selected rows of the codebook, differentiable w.r.t. the table.
    pub codewords: Tensor,
    pub ids: Vec<u32>,
}

/// One learnable codebook with nearest-neighbour assignment.
pub struct CodebookLayer {
    weight: Var,
    proj: Option<Var>,
    codebook_size: usize,
    embed_dim: usize,
    normalize: bool,
    forward_mode: ForwardMode,
    distance: DistanceMode,
    kmeans_iters: usize,
    seed: u64,
    state: InitState,
    usage: Vec<u64>,
}

impl CodebookLayer {
    pub fn new(config: &RqVaeConfig, seed: u64, rng: &mut StdRng, device: &Device) -> Result<Self> {
        let (k, d) = (config.codebook_size, config.embed_dim);
        // U(-sqrt(3), sqrt(3)) has unit variance
        let weight = uniform_var(rng, k, d, 3f32.sqrt(), device)?;
        let proj = if config.codebook_sim_vq {
            Some(uniform_var(rng, d, d, 1.0 / (d as f32).sqrt(), device)?)
        } else {
            None
        };

        Ok(Self {
            weight,
            proj,
            codebook_size: k,
            embed_dim: d,
            normalize: config.codebook_normalize,
            forward_mode: config.forward_mode,
            distance: config.distance,
            kmeans_iters: config.kmeans_iters,
            seed,
            state: if config.codebook_kmeans_init {
                InitState::Uninitialized
            } else {
                InitState::Initialized
            },
            usage: vec![0; k],
        })
    }

    pub fn state(&self) -> InitState {
        self.state
    }

    pub fn codebook_size(&self) -> usize {
        self.codebook_size
    }

    pub fn usage(&self) -> &[u64] {
        &self.usage
    }

    pub fn reset_usage(&mut self) {
        self.usage.iter_mut().for_each(|u| *u = 0);
    }

    /// Effective `(K, dim)` table: raw weights, projected when SimVQ is on,
    /// then normalized when configured.
    pub fn codebook(&self) -> Result<Tensor> {
        let mut codebook = self.weight.as_tensor().clone();
        if let Some(proj) = &self.proj {
            codebook = codebook.matmul(&proj.as_tensor().t()?)?;
        }
        if self.normalize {
            codebook = l2_normalize_rows(&codebook, 1e-12)?;
        }
        Ok(codebook)
    }

    /// Embeddings for already known slot ids.
    pub fn lookup(&self, ids: &[u32]) -> Result<Tensor> {
        let codebook = self.codebook()?;
        let index = Tensor::from_vec(ids.to_vec(), ids.len(), codebook.device())?;
        Ok(codebook.index_select(&index, 0)?)
    }

    /// Replaces the raw table. Shape must be `(K, dim)`.
    pub fn set_codebook(&mut self, table: &Tensor) -> Result<()> {
        let expected = vec![self.codebook_size, self.embed_dim];
        if table.dims() != expected.as_slice() {
            return Err(SemIdError::ShapeMismatch {
                name: "codebook".into(),
                expected,
                found: table.dims().to_vec(),
            });
        }
        let table = table.to_dtype(DType::F32)?.to_device(self.weight.device())?;
        self.weight.set(&table)?;
        Ok(())
    }

    /// Clusters `sample` into K centers and installs them as the table.
    ///
    /// Returns `false` without touching anything once the layer is
    /// initialized, so it is safe to call on every forward pass.
    pub fn initialize(&mut self, sample: &Tensor) -> Result<bool> {
        if self.state == InitState::Initialized {
            return Ok(false);
        }

        let mut rows = to_rows(sample)?;
        if self.distance == DistanceMode::Cosine {
            rows.iter_mut().for_each(|row| l2_normalize(row));
        }
        let out = kmeans(
            &rows,
            &KMeansConfig {
                k: self.codebook_size,
                max_iterations: self.kmeans_iters,
                tolerance: 1e-8,
                seed: self.seed,
            },
        )?;
        info!(
            "k-means codebook init: {} points, {} iterations, inertia {:.6}",
            rows.len(),
            out.iterations,
            out.inertia
        );

        let flat: Vec<f32> = out.centroids.into_iter().flatten().collect();
        let table = Tensor::from_vec(flat, (self.codebook_size, self.embed_dim), self.weight.device())?;
        self.set_codebook(&table)?;
        self.state = InitState::Initialized;
        Ok(true)
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.state = InitState::Initialized;
    }

    /// `(batch, K)` distances between the rows of `x` and the codebook.
    fn distances(&self, x: &Tensor, codebook: &Tensor) -> Result<Tensor> {
        let dist = match self.distance {
            DistanceMode::L2 => {
                let x_sq = x.sqr()?.sum_keepdim(1)?;
                let c_sq = codebook.sqr()?.sum(1)?.unsqueeze(0)?;
                let cross = x.matmul(&codebook.t()?)?;
                x_sq.broadcast_add(&c_sq)?.broadcast_sub(&(cross * 2.0)?)?
            }
            DistanceMode::Cosine => {
                let xn = l2_normalize_rows(x, 1e-12)?;
                let cn = l2_normalize_rows(codebook, 1e-12)?;
                xn.matmul(&cn.t()?)?.neg()?
            }
        };
        Ok(dist)
    }

    fn one_hot(&self, ids: &[u32], device: &Device) -> Result<Tensor> {
        let mut data = vec![0f32; ids.len() * self.codebook_size];
        for (row, &id) in ids.iter().enumerate() {
            data[row * self.codebook_size + id as usize] = 1.0;
        }
        Ok(Tensor::from_vec(data, (ids.len(), self.codebook_size), device)?)
    }

    /// Quantizes a `(batch, dim)` tensor without side effects.
    pub fn quantize(&self, x: &Tensor, opts: QuantizeOptions) -> Result<QuantizeOutput> {
        let codebook = self.codebook()?;
        let distances = self.distances(x, &codebook)?;
        let ids = nearest_ids(&distances)?;
        let index = Tensor::from_vec(ids.clone(), ids.len(), x.device())?;
        let codewords = codebook.index_select(&index, 0)?;

        let embeddings = if !opts.train {
            codewords.clone()
        } else {
            match (self.forward_mode, opts.temperature) {
                (ForwardMode::RotationTrick, _) => rotation_trick(x, &codewords)?,
                (ForwardMode::GumbelSoftmax, Some(t)) => {
                    let one_hot = self.one_hot(&ids, x.device())?;
                    gumbel_straight_through(&distances, &one_hot, &codebook, t)?
                }
                (ForwardMode::Ste, _) | (ForwardMode::GumbelSoftmax, None) => {
                    straight_through(x, &codewords)?
                }
            }
        };

        Ok(QuantizeOutput {
            embeddings,
            codewords,
            ids,
        })
    }

    /// Quantization with the lazy k-means transition and usage tracking.
    pub fn forward(&mut self, x: &Tensor, opts: QuantizeOptions) -> Result<QuantizeOutput> {
        self.initialize(x)?;
        let out = self.quantize(x, opts)?;
        if opts.train {
            for &id in &out.ids {
                self.usage[id as usize] += 1;
            }
            debug!("codebook forward: batch {}", out.ids.len());
        }
        Ok(out)
    }

    pub fn named_vars(&self, prefix: &str) -> Vec<(String, Var)> {
        let mut vars = vec![(format!("{prefix}.codebook"), self.weight.clone())];
        if let Some(proj) = &self.proj {
            vars.push((format!("{prefix}.proj.weight"), proj.clone()));
        }
        vars
    }
}

/// Row-wise argmin. Ties, and rows of NaN, resolve to the lowest index.
pub fn nearest_ids(distances: &Tensor) -> Result<Vec<u32>> {
    let rows = to_rows(distances)?;
    Ok(rows
        .iter()
        .map(|row| {
            let mut best = (0usize, f32::INFINITY);
            for (idx, &d) in row.iter().enumerate() {
                if d < best.1 {
                    best = (idx, d);
                }
            }
            best.0 as u32
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn config(k: usize, d: usize) -> RqVaeConfig {
        RqVaeConfig {
            embed_dim: d,
            codebook_size: k,
            codebook_kmeans_init: false,
            ..RqVaeConfig::default()
        }
    }

    fn layer(config: &RqVaeConfig) -> CodebookLayer {
        let mut rng = StdRng::seed_from_u64(0);
        CodebookLayer::new(config, 0, &mut rng, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() -> Result<()> {
        let mut cb = layer(&config(4, 2));
        let table = Tensor::new(&[[5.0f32, 5.0], [1.0, 0.0], [1.0, 0.0], [-1.0, 0.0]], &Device::Cpu)?;
        cb.set_codebook(&table)?;

        // [0, 0] is equidistant from slots 1, 2 and 3
        let x = Tensor::new(&[[1.0f32, 0.1], [0.0, 0.0]], &Device::Cpu)?;
        let out = cb.quantize(&x, QuantizeOptions::eval())?;
        assert_eq!(out.ids, vec![1, 1]);
        Ok(())
    }

    #[test]
    fn test_eval_embeddings_equal_codewords() -> Result<()> {
        let cb = layer(&config(8, 3));
        let x = Tensor::new(&[[0.1f32, 0.2, 0.3], [0.0, 0.0, 0.0]], &Device::Cpu)?;
        let out = cb.quantize(&x, QuantizeOptions::eval())?;
        let expected = cb.lookup(&out.ids)?;
        assert_eq!(out.embeddings.to_vec2::<f32>()?, expected.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_train_modes_keep_codeword_value() -> Result<()> {
        for mode in [ForwardMode::Ste, ForwardMode::RotationTrick, ForwardMode::GumbelSoftmax] {
            let cfg = RqVaeConfig { forward_mode: mode, ..config(8, 3) };
            let cb = layer(&cfg);
            let x = Tensor::new(&[[0.5f32, -0.2, 0.3], [1.0, 1.0, 1.0]], &Device::Cpu)?;
            let out = cb.quantize(&x, QuantizeOptions::train(0.2))?;
            let value = out.embeddings.to_vec2::<f32>()?;
            let codewords = out.codewords.to_vec2::<f32>()?;
            for (a, b) in value.iter().flatten().zip(codewords.iter().flatten()) {
                assert!((a - b).abs() < 1e-5, "{mode:?}: {a} vs {b}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_lazy_kmeans_init_runs_once() -> Result<()> {
        let cfg = RqVaeConfig {
            codebook_kmeans_init: true,
            ..config(4, 2)
        };
        let mut cb = layer(&cfg);
        assert_eq!(cb.state(), InitState::Uninitialized);

        let x = Tensor::new(&[[1.0f32, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0]], &Device::Cpu)?;
        let out = cb.forward(&x, QuantizeOptions::train(1.0))?;
        assert_eq!(cb.state(), InitState::Initialized);

        // Four points, four centers: every point is its own codeword
        let mut ids = out.ids.clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(out.codewords.to_vec2::<f32>()?, x.to_vec2::<f32>()?);

        let before = cb.codebook()?.to_vec2::<f32>()?;
        let other = Tensor::new(&[[9.0f32, 9.0], [8.0, 8.0], [7.0, 7.0], [6.0, 6.0]], &Device::Cpu)?;
        assert!(!cb.initialize(&other)?);
        cb.forward(&other, QuantizeOptions::eval())?;
        assert_eq!(cb.codebook()?.to_vec2::<f32>()?, before);
        Ok(())
    }

    #[test]
    fn test_usage_counts_only_in_training() -> Result<()> {
        let mut cb = layer(&config(4, 2));
        let x = Tensor::new(&[[0.1f32, 0.1], [0.1, 0.1], [0.1, 0.1]], &Device::Cpu)?;
        cb.forward(&x, QuantizeOptions::eval())?;
        assert_eq!(cb.usage().iter().sum::<u64>(), 0);

        let out = cb.forward(&x, QuantizeOptions::train(1.0))?;
        assert_eq!(cb.usage()[out.ids[0] as usize], 3);
        cb.reset_usage();
        assert_eq!(cb.usage().iter().sum::<u64>(), 0);
        Ok(())
    }

    #[test]
    fn test_normalized_codebook_has_unit_rows() -> Result<()> {
        let cfg = RqVaeConfig {
            codebook_normalize: true,
            codebook_sim_vq: true,
            ..config(6, 4)
        };
        let cb = layer(&cfg);
        for row in cb.codebook()?.to_vec2::<f32>()? {
            let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
        assert_eq!(cb.named_vars("q").len(), 2);
        Ok(())
    }

    #[test]
    fn test_set_codebook_rejects_wrong_shape() {
        let mut cb = layer(&config(4, 2));
        let bad = Tensor::zeros((3, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(cb.set_codebook(&bad), Err(SemIdError::ShapeMismatch { .. })));
    }
}
