use candle_core::Device;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use semid_engine::config::{RqVaeConfig, TokenizerConfig, TrainConfig};
use semid_engine::core::diagnostics::Diagnostics;
use semid_engine::core::rqvae::RqVae;
use semid_engine::core::train::Trainer;
use semid_engine::tokenizer::corpus::gather_features;
use semid_engine::tokenizer::{FeatureMatrix, SemanticIdTokenizer, SeqBatch};
use semid_engine::SemIdError;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    println!("=== Semantic ID Demo ===");
    let device = Device::Cpu;

    // 1. Synthetic corpus
    println!("\n[1] Building synthetic corpus...");
    let mut rng = StdRng::seed_from_u64(7);
    let dim = 16;
    let data: Vec<f32> = (0..200 * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let corpus = FeatureMatrix::new(dim, data)?;
    println!("    200 items, dim {}", dim);

    // 2. Train a small RQ-VAE
    println!("\n[2] Training...");
    let config = RqVaeConfig {
        input_dim: dim,
        embed_dim: 4,
        hidden_dims: vec![12, 8],
        codebook_size: 32,
        n_layers: 3,
        n_cat_features: 0,
        ..RqVaeConfig::default()
    };
    let all: Vec<i64> = (0..200).collect();
    let x = gather_features(&corpus, &all, dim, &device)?;
    let train_config = TrainConfig {
        learning_rate: 1e-3,
        ..TrainConfig::default()
    };
    let mut trainer = Trainer::new(RqVae::new(config, &device)?, &train_config)?;
    for _ in 0..200 {
        let metrics = trainer.step(&x)?;
        if (metrics.iteration + 1) % 50 == 0 {
            println!("    iter {:>3}: loss {:.4}", metrics.iteration + 1, metrics.loss);
        }
    }

    // 3. Tokenize the corpus
    println!("\n[3] Precomputing corpus ids...");
    let mut tokenizer = SemanticIdTokenizer::from_model(trainer.into_model(), TokenizerConfig::default())?;
    let report = match tokenizer.precompute_corpus_ids(&corpus) {
        Ok(table) => Diagnostics::collisions(table),
        Err(e @ SemIdError::DisambiguationOverflow { .. }) => {
            println!("    {}", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!(
        "    {} distinct base sequences, largest group {}, max digit {}",
        report.distinct_base, report.largest_group, report.max_digit
    );

    // 4. Tokenize a user history
    println!("\n[4] Tokenizing a history...");
    let batch = SeqBatch::from_histories(vec![0], &[vec![3, 17, 42]], &corpus, dim, &device)?;
    let tokens = tokenizer.tokenize(&batch)?;
    println!("    kind: {:?}", tokens.kind);
    println!("    sem_ids: {:?}", tokens.sem_ids[0]);
    println!("    token types: {:?}", tokens.token_type_ids);

    println!("\n=== Demo Complete ===");
    Ok(())
}
