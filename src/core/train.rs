use crate::config::TrainConfig;
use crate::core::rqvae::RqVae;
use crate::core::schedule::TemperatureScheduler;
use crate::error::Result;
use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use std::path::Path;
use tracing::{debug, info};

/// Scalars reported after one optimizer step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepMetrics {
    pub iteration: usize,
    pub temperature: f64,
    pub loss: f32,
    pub reconstruction_loss: f32,
    pub rqvae_loss: f32,
    pub p_unique_ids: f32,
    pub embs_norm: Vec<f32>,
}

/// Owns a model and its optimizer for the training phase.
pub struct Trainer {
    model: RqVae,
    optimizer: AdamW,
    scheduler: TemperatureScheduler,
    iteration: usize,
}

impl Trainer {
    pub fn new(model: RqVae, config: &TrainConfig) -> Result<Self> {
        config.validate()?;
        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..ParamsAdamW::default()
        };
        let optimizer = AdamW::new(model.vars(), params)?;
        Ok(Self {
            model,
            optimizer,
            scheduler: TemperatureScheduler::new(config.temperature.clone()),
            iteration: 0,
        })
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn model(&self) -> &RqVae {
        &self.model
    }

    pub fn into_model(self) -> RqVae {
        self.model
    }

    /// One forward/backward/update on a `(batch, input_dim)` tensor.
    pub fn step(&mut self, x: &Tensor) -> Result<StepMetrics> {
        let temperature = self.scheduler.get_t(self.iteration);
        let out = self.model.forward(x, temperature)?;
        self.optimizer.backward_step(&out.loss)?;

        let metrics = StepMetrics {
            iteration: self.iteration,
            temperature,
            loss: out.loss.to_scalar::<f32>()?,
            reconstruction_loss: out.reconstruction_loss.to_scalar::<f32>()?,
            rqvae_loss: out.rqvae_loss.to_scalar::<f32>()?,
            p_unique_ids: out.p_unique_ids,
            embs_norm: out.embs_norm,
        };
        debug!(
            "iter {} t={:.4} loss={:.5} recon={:.5} rqvae={:.5} unique={:.3}",
            metrics.iteration,
            metrics.temperature,
            metrics.loss,
            metrics.reconstruction_loss,
            metrics.rqvae_loss,
            metrics.p_unique_ids
        );
        self.iteration += 1;
        Ok(metrics)
    }

    /// Saves model weights. Optimizer moments are not persisted.
    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        self.model.save(path)?;
        info!("Checkpoint at iteration {} written to {:?}", self.iteration, path);
        Ok(())
    }
}
