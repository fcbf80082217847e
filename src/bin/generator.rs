use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use semid_engine::storage::write_features;
use semid_engine::tokenizer::FeatureMatrix;
use std::path::PathBuf;
use std::time::Instant;

/// Writes a synthetic clustered feature file with a trailing binary
/// categorical block.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 10_000)]
    num_items: usize,

    #[arg(short, long, default_value_t = 768)]
    dim: usize,

    #[arg(long, default_value_t = 18)]
    n_cat_features: usize,

    #[arg(long, default_value_t = 64)]
    clusters: usize,

    #[arg(short, long, default_value = "features.bin")]
    output: PathBuf,

    #[arg(short, long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if args.n_cat_features > args.dim || args.clusters == 0 {
        return Err("n_cat_features must not exceed dim and clusters must be positive".into());
    }

    println!("Generating {} items of dimension {}...", args.num_items, args.dim);
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let n_num = args.dim - args.n_cat_features;

    let centers: Vec<Vec<f32>> = (0..args.clusters)
        .map(|_| (0..n_num).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    let categories: Vec<Vec<f32>> = (0..args.clusters)
        .map(|_| (0..args.n_cat_features).map(|_| if rng.gen_bool(0.2) { 1.0 } else { 0.0 }).collect())
        .collect();

    let mut data = Vec::with_capacity(args.num_items * args.dim);
    for _ in 0..args.num_items {
        let c = rng.gen_range(0..args.clusters);
        data.extend(centers[c].iter().map(|&v| v + rng.gen_range(-0.1..0.1)));
        data.extend_from_slice(&categories[c]);
    }
    let matrix = FeatureMatrix::new(args.dim, data)?;
    println!("Generated in {:.2?}", start.elapsed());

    println!("Saving to {:?}...", args.output);
    write_features(&matrix, &args.output)?;
    Ok(())
}
