use crate::config::RqVaeConfig;
use crate::core::codebook::QuantizeOptions;
use crate::core::diagnostics::Diagnostics;
use crate::core::loss::{ReconstructionLoss, RqVaeLoss};
use crate::core::mlp::Mlp;
use crate::core::residual::{ResidualOutput, ResidualQuantizer};
use crate::error::{Result, SemIdError};
use candle_core::{DType, Device, Tensor, Var};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Losses and batch statistics of one training forward pass.
#[derive(Debug, Clone)]
pub struct RqVaeComputedLosses {
    /// `mean(reconstruction + codebook_loss_weight * rqvae)`.
    pub loss: Tensor,
    pub reconstruction_loss: Tensor,
    pub rqvae_loss: Tensor,
    /// Mean L2 norm of each layer's embeddings.
    pub embs_norm: Vec<f32>,
    /// Share of items whose id sequence is not repeated earlier in the batch.
    pub p_unique_ids: f32,
}

/// MLP encoder, residual quantizer and MLP decoder.
pub struct RqVae {
    config: RqVaeConfig,
    encoder: Mlp,
    decoder: Mlp,
    quantizer: ResidualQuantizer,
    reconstruction_loss: ReconstructionLoss,
    rqvae_loss: RqVaeLoss,
    device: Device,
}

impl RqVae {
    pub fn new(config: RqVaeConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let encoder = Mlp::new(
            config.input_dim,
            &config.hidden_dims,
            config.embed_dim,
            config.codebook_normalize,
            &mut rng,
            device,
        )?;
        let reversed: Vec<usize> = config.hidden_dims.iter().rev().copied().collect();
        let decoder = Mlp::new(config.embed_dim, &reversed, config.input_dim, false, &mut rng, device)?;
        let quantizer = ResidualQuantizer::new(&config, &mut rng, device)?;

        Ok(Self {
            reconstruction_loss: ReconstructionLoss::new(config.n_cat_features),
            rqvae_loss: RqVaeLoss {
                commitment_weight: config.commitment_weight,
            },
            config,
            encoder,
            decoder,
            quantizer,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &RqVaeConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn n_layers(&self) -> usize {
        self.quantizer.n_layers()
    }

    pub fn codebook_size(&self) -> usize {
        self.config.codebook_size
    }

    pub fn quantizer(&self) -> &ResidualQuantizer {
        &self.quantizer
    }

    pub fn quantizer_mut(&mut self) -> &mut ResidualQuantizer {
        &mut self.quantizer
    }

    pub fn encode(&self, x: &Tensor) -> Result<Tensor> {
        self.encoder.forward(x)
    }

    pub fn decode(&self, z: &Tensor) -> Result<Tensor> {
        self.decoder.forward(z)
    }

    /// Explicit one-shot k-means initialization of every codebook on the
    /// encoded `x`. Later calls do nothing.
    pub fn initialize_codebooks(&mut self, x: &Tensor) -> Result<()> {
        let latent = self.encode(x)?;
        self.quantizer.initialize(&latent)
    }

    /// Training-time quantization of a `(batch, input_dim)` feature tensor.
    pub fn get_semantic_ids(&mut self, x: &Tensor, opts: QuantizeOptions) -> Result<ResidualOutput> {
        let latent = self.encode(x)?;
        self.quantizer.forward(&latent, opts)
    }

    /// Deterministic `[batch][layer]` ids with hard assignment and no side
    /// effects.
    pub fn semantic_ids(&self, x: &Tensor) -> Result<Vec<Vec<u32>>> {
        let latent = self.encode(x)?;
        Ok(self.quantizer.quantize(&latent, QuantizeOptions::eval())?.sem_ids)
    }

    /// Reconstructs features from ids through the decoder.
    pub fn decode_ids(&self, sem_ids: &[Vec<u32>]) -> Result<Tensor> {
        self.decode(&self.quantizer.decode_ids(sem_ids)?)
    }

    pub fn forward(&mut self, x: &Tensor, gumbel_t: f64) -> Result<RqVaeComputedLosses> {
        let quantized = self.get_semantic_ids(x, QuantizeOptions::train(gumbel_t))?;
        let x_hat = self.decode(&quantized.quantized()?)?;

        let reconstruction = self.reconstruction_loss.per_sample(&x_hat, x)?;
        let rqvae = self.rqvae_loss.per_sample(&quantized.residuals, &quantized.codewords)?;
        let loss = (&reconstruction + (&rqvae * self.config.codebook_loss_weight)?)?.mean_all()?;

        let embs_norm = quantized
            .embeddings
            .iter()
            .map(|e| -> Result<f32> {
                let norms = e.detach().sqr()?.sum(1)?.sqrt()?;
                Ok(norms.mean_all()?.to_scalar::<f32>()?)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RqVaeComputedLosses {
            loss,
            reconstruction_loss: reconstruction.mean_all()?,
            rqvae_loss: rqvae.mean_all()?,
            embs_norm,
            p_unique_ids: Diagnostics::p_unique_ids(&quantized.sem_ids) as f32,
        })
    }

    /// Every trainable tensor under its checkpoint name.
    pub fn named_vars(&self) -> Vec<(String, Var)> {
        let mut vars = self.encoder.named_vars("encoder");
        vars.extend(self.decoder.named_vars("decoder"));
        vars.extend(self.quantizer.named_vars("quantizer"));
        vars
    }

    pub fn vars(&self) -> Vec<Var> {
        self.named_vars().into_iter().map(|(_, v)| v).collect()
    }

    /// Writes every parameter to a safetensors file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tensors: HashMap<String, Tensor> = self
            .named_vars()
            .into_iter()
            .map(|(name, var)| (name, var.as_tensor().clone()))
            .collect();
        candle_core::safetensors::save(&tensors, path)?;
        info!("Saved {} tensors to {:?}", tensors.len(), path);
        Ok(())
    }

    /// Restores parameters saved by [`RqVae::save`] onto this model's device.
    ///
    /// All names and shapes are checked before anything is written, so a
    /// failed load leaves the model untouched. Loaded codebooks count as
    /// initialized.
    pub fn load_pretrained(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(SemIdError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("checkpoint not found: {}", path.display()),
            )));
        }
        let mut state = candle_core::safetensors::load(path, &self.device)?;

        let mut staged = Vec::new();
        for (name, var) in self.named_vars() {
            let tensor = state.remove(&name).ok_or_else(|| SemIdError::MissingWeight(name.clone()))?;
            if tensor.dims() != var.dims() {
                return Err(SemIdError::ShapeMismatch {
                    name,
                    expected: var.dims().to_vec(),
                    found: tensor.dims().to_vec(),
                });
            }
            staged.push((var, tensor.to_dtype(DType::F32)?));
        }
        if let Some(extra) = state.keys().min() {
            return Err(SemIdError::UnexpectedWeight(extra.clone()));
        }

        for (var, tensor) in &staged {
            var.set(tensor)?;
        }
        self.quantizer.mark_initialized();
        info!("Loaded {} tensors from {:?}", staged.len(), path);
        Ok(())
    }
}
