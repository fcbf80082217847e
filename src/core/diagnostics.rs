use crate::core::residual::ResidualQuantizer;
use crate::tokenizer::dedup::DuplicateRanker;
use crate::tokenizer::table::CorpusIdTable;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Healthy,
    Corrupted(String),
    Suspicious(String),
}

/// Usage of one codebook layer since its counters were last reset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodebookReport {
    pub layer: usize,
    pub codebook_size: usize,
    pub assignments: u64,
    pub used: usize,
    pub dead: usize,
    /// `exp(entropy)` of the usage distribution; equals `codebook_size` for
    /// perfectly uniform use.
    pub perplexity: f64,
}

/// Collision statistics of a deduplicated corpus table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollisionReport {
    pub items: usize,
    pub distinct_base: usize,
    /// Share of items whose base sequence is unique in the corpus.
    pub p_unique_ids: f64,
    pub max_digit: u32,
    /// Size of the biggest group of items sharing a base sequence.
    pub largest_group: usize,
    /// Headroom left for the disambiguation digit.
    pub codebook_size: usize,
}

pub struct Diagnostics;

impl Diagnostics {
    pub fn codebook_usage(quantizer: &ResidualQuantizer) -> Vec<CodebookReport> {
        quantizer
            .layers()
            .iter()
            .enumerate()
            .map(|(layer, cb)| {
                let usage = cb.usage();
                let assignments: u64 = usage.iter().sum();
                let used = usage.iter().filter(|&&u| u > 0).count();
                let perplexity = if assignments == 0 {
                    0.0
                } else {
                    let entropy: f64 = usage
                        .iter()
                        .filter(|&&u| u > 0)
                        .map(|&u| {
                            let p = u as f64 / assignments as f64;
                            -p * p.ln()
                        })
                        .sum();
                    entropy.exp()
                };
                let dead = usage.len() - used;
                if assignments > 0 && dead > 0 {
                    warn!("Layer {}: {} of {} codes unused", layer, dead, usage.len());
                }
                CodebookReport {
                    layer,
                    codebook_size: usage.len(),
                    assignments,
                    used,
                    dead,
                    perplexity,
                }
            })
            .collect()
    }

    pub fn collisions(table: &CorpusIdTable) -> CollisionReport {
        let n_layers = table.n_layers();
        let rows: Vec<&[u32]> = table.rows().collect();
        let groups = rows
            .par_iter()
            .fold(HashMap::new, |mut acc: HashMap<&[u32], usize>, row| {
                *acc.entry(&row[..n_layers]).or_insert(0) += 1;
                acc
            })
            .reduce(HashMap::new, |mut a, b| {
                for (k, v) in b {
                    *a.entry(k).or_insert(0) += v;
                }
                a
            });

        let unique = groups.values().filter(|&&c| c == 1).count();
        CollisionReport {
            items: rows.len(),
            distinct_base: groups.len(),
            p_unique_ids: if rows.is_empty() {
                1.0
            } else {
                unique as f64 / rows.len() as f64
            },
            max_digit: table.max_digit().unwrap_or(0),
            largest_group: groups.values().copied().max().unwrap_or(0),
            codebook_size: table.codebook_size(),
        }
    }

    /// Share of batch items whose id sequence does not repeat an earlier one.
    pub fn p_unique_ids(sem_ids: &[Vec<u32>]) -> f64 {
        if sem_ids.is_empty() {
            return 1.0;
        }
        let mut ranker = DuplicateRanker::default();
        let firsts = ranker.rank_batch(sem_ids).iter().filter(|&&r| r == 0).count();
        firsts as f64 / sem_ids.len() as f64
    }

    /// Consistency check of a table about to be served.
    pub fn check_table(table: &CorpusIdTable) -> HealthStatus {
        let k = table.codebook_size() as u32;
        if let Some(pos) = table.rows().position(|r| r.iter().any(|&d| d >= k)) {
            return HealthStatus::Corrupted(format!("Item {} has a digit >= codebook size {}", pos, k));
        }

        let mut seen = HashSet::with_capacity(table.len());
        for (i, row) in table.rows().enumerate() {
            if !seen.insert(row) {
                return HealthStatus::Corrupted(format!("Item {} repeats an earlier id sequence", i));
            }
        }

        // Little headroom left for newly added items
        if let Some(max_digit) = table.max_digit() {
            if max_digit + 1 >= k {
                return HealthStatus::Suspicious(format!("Max disambiguation digit {} at codebook size {}", max_digit, k));
            }
        }
        HealthStatus::Healthy
    }
}
