use std::collections::HashMap;

/// Assigns each id sequence the number of identical sequences seen before it.
///
/// Sequences must be pushed in corpus order; the count carries across
/// batches, so an item's rank only depends on the items before it.
#[derive(Debug, Default)]
pub struct DuplicateRanker {
    seen: HashMap<Vec<u32>, u32>,
    max_rank: Option<u32>,
}

impl DuplicateRanker {
    pub fn push(&mut self, sequence: &[u32]) -> u32 {
        let count = self.seen.entry(sequence.to_vec()).or_insert(0);
        let rank = *count;
        *count += 1;
        self.max_rank = Some(self.max_rank.map_or(rank, |m| m.max(rank)));
        rank
    }

    pub fn rank_batch(&mut self, batch: &[Vec<u32>]) -> Vec<u32> {
        batch.iter().map(|s| self.push(s)).collect()
    }

    pub fn max_rank(&self) -> Option<u32> {
        self.max_rank
    }

    /// Number of distinct sequences pushed so far.
    pub fn distinct(&self) -> usize {
        self.seen.len()
    }
}
