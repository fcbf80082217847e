use candle_core::Device;
use clap::Parser;
use semid_engine::config::EngineConfig;
use semid_engine::core::diagnostics::Diagnostics;
use semid_engine::storage::{save_table, FeatureFile};
use semid_engine::tokenizer::SemanticIdTokenizer;
use std::path::PathBuf;
use std::time::Instant;

/// Computes the deduplicated semantic ids of every item and writes the
/// corpus table.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "rqvae.safetensors")]
    weights: PathBuf,

    #[arg(short, long, default_value = "features.bin")]
    features: PathBuf,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "corpus_ids.bin")]
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
    let mut tokenizer =
        SemanticIdTokenizer::new(config.rqvae, config.tokenizer, Some(&args.weights), &Device::Cpu)?;

    let start = Instant::now();
    let table = tokenizer.precompute_corpus_ids(&corpus)?;
    println!("Tokenized {} items in {:.2?}", table.len(), start.elapsed());

    let report = Diagnostics::collisions(table);
    println!(
        "Unique base ids: {:.2}%, largest collision group {}, max digit {}",
        report.p_unique_ids * 100.0,
        report.largest_group,
        report.max_digit
    );
    save_table(table, &args.output)?;
    Ok(())
}
