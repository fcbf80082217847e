use semid_engine::core::diagnostics::{CollisionReport, Diagnostics, HealthStatus};
use semid_engine::storage::load_table;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Serialize)]
struct TableExport {
    n_layers: usize,
    codebook_size: usize,
    health: HealthStatus,
    collisions: CollisionReport,
    items: Vec<ItemExport>,
}

#[derive(Serialize)]
struct ItemExport {
    id: usize,
    sem_ids: Vec<u32>,
}

const MAX_EXPORTED_ITEMS: usize = 1000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <table_path> [output.json]", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);
    let output = args.get(2).map_or("table.json", String::as_str);
    let table = load_table(path)?;

    println!("Loading table from {:?}", path);
    println!("Items: {}", table.len());
    println!("Layers: {} x {}", table.n_layers(), table.codebook_size());

    let export = TableExport {
        n_layers: table.n_layers(),
        codebook_size: table.codebook_size(),
        health: Diagnostics::check_table(&table),
        collisions: Diagnostics::collisions(&table),
        items: table
            .rows()
            .take(MAX_EXPORTED_ITEMS)
            .enumerate()
            .map(|(id, row)| ItemExport { id, sem_ids: row.to_vec() })
            .collect(),
    };
    println!("Health: {:?}", export.health);

    let json = serde_json::to_string_pretty(&export)?;
    let mut file = File::create(output)?;
    file.write_all(json.as_bytes())?;

    println!("Exported summary to {}", output);
    Ok(())
}
