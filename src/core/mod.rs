pub mod codebook;
pub mod diagnostics;
pub mod kmeans;
pub mod loss;
pub mod mlp;
pub mod ops;
pub mod passthrough;
pub mod residual;
pub mod rqvae;
pub mod schedule;
pub mod train;
