use candle_core::Device;
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use semid_engine::config::EngineConfig;
use semid_engine::core::diagnostics::Diagnostics;
use semid_engine::core::rqvae::RqVae;
use semid_engine::core::train::Trainer;
use semid_engine::storage::FeatureFile;
use semid_engine::tokenizer::corpus::gather_features;
use semid_engine::tokenizer::ItemCorpus;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Trains an RQ-VAE on a feature file and writes a safetensors checkpoint.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "features.bin")]
    features: PathBuf,

    /// JSON config; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value_t = 20_000)]
    iterations: usize,

    #[arg(long, default_value_t = 1_000, value_parser = clap::value_parser!(u64).range(1..))]
    log_every: u64,

    #[arg(short, long, default_value = "rqvae.safetensors")]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let corpus = FeatureFile::open(&args.features)?;
    if corpus.is_empty() {
        return Err("feature file has no rows".into());
    }
    let max_dim = config.tokenizer.max_feature_dim;
    if corpus.dim().min(max_dim) != config.rqvae.input_dim {
        return Err(format!(
            "feature dimension {} does not match input_dim {}",
            corpus.dim().min(max_dim),
            config.rqvae.input_dim
        )
        .into());
    }

    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(config.rqvae.seed);
    let mut model = RqVae::new(config.rqvae.clone(), &device)?;

    let n_init = config.train.kmeans_init_samples.min(corpus.len());
    let init_ids: Vec<i64> = sample(&mut rng, corpus.len(), n_init).into_iter().map(|i| i as i64).collect();
    model.initialize_codebooks(&gather_features(&corpus, &init_ids, max_dim, &device)?)?;

    let mut trainer = Trainer::new(model, &config.train)?;
    let batch_size = config.train.batch_size.min(corpus.len());
    let start = Instant::now();
    for _ in 0..args.iterations {
        let ids: Vec<i64> = sample(&mut rng, corpus.len(), batch_size).into_iter().map(|i| i as i64).collect();
        let metrics = trainer.step(&gather_features(&corpus, &ids, max_dim, &device)?)?;
        if (metrics.iteration as u64 + 1) % args.log_every == 0 {
            info!(
                "iter {} loss {:.5} recon {:.5} rqvae {:.5} unique {:.3} t {:.3}",
                metrics.iteration + 1,
                metrics.loss,
                metrics.reconstruction_loss,
                metrics.rqvae_loss,
                metrics.p_unique_ids,
                metrics.temperature
            );
        }
    }
    println!("Trained {} iterations in {:.2?}", args.iterations, start.elapsed());

    for report in Diagnostics::codebook_usage(trainer.model().quantizer()) {
        println!(
            "Layer {}: {}/{} codes used, perplexity {:.1}",
            report.layer, report.used, report.codebook_size, report.perplexity
        );
    }
    trainer.save_checkpoint(&args.output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_every_must_be_positive() {
        assert!(Args::try_parse_from(["train", "--log-every", "0"]).is_err());
        let args = Args::try_parse_from(["train", "--log-every", "5"]).unwrap();
        assert_eq!(args.log_every, 5);
    }
}
