use crate::config::TemperatureConfig;

/// Step-wise exponential annealing of the Gumbel softmax temperature.
#[derive(Debug, Clone)]
pub struct TemperatureScheduler {
    config: TemperatureConfig,
}

impl TemperatureScheduler {
    pub fn new(config: TemperatureConfig) -> Self {
        Self { config }
    }

    /// `max(min_t, t0 * exp(-anneal_rate * step_size * floor(iter / step_size)))`.
    pub fn get_t(&self, iteration: usize) -> f64 {
        let step = self.config.step_size.max(1);
        let decayed = (iteration / step * step) as f64;
        let t = self.config.t0 * (-self.config.anneal_rate * decayed).exp();
        t.max(self.config.min_t)
    }
}

impl Default for TemperatureScheduler {
    fn default() -> Self {
        Self::new(TemperatureConfig::default())
    }
}
