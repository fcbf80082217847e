use crate::error::Result;
use crate::tokenizer::corpus::{feature_dim, gather_features, ItemCorpus};
use candle_core::{Device, Tensor};

/// Padded batch of user histories with their item features.
#[derive(Debug, Clone)]
pub struct SeqBatch {
    pub user_ids: Vec<i64>,
    /// `[batch][position]` item ordinals, `-1` for padding.
    pub ids: Vec<Vec<i64>>,
    /// `(batch, positions, dim)` features, `-1` at padding.
    pub x: Tensor,
    pub seq_mask: Vec<Vec<bool>>,
}

impl SeqBatch {
    /// Right-pads every history to the longest one and gathers features.
    pub fn from_histories(
        user_ids: Vec<i64>,
        histories: &[Vec<i64>],
        corpus: &dyn ItemCorpus,
        max_dim: usize,
        device: &Device,
    ) -> Result<Self> {
        let n = histories.iter().map(Vec::len).max().unwrap_or(0);
        let ids: Vec<Vec<i64>> = histories
            .iter()
            .map(|h| {
                let mut row = h.clone();
                row.resize(n, -1);
                row
            })
            .collect();

        let flat: Vec<i64> = ids.concat();
        let x = gather_features(corpus, &flat, max_dim, device)?;
        let x = x.reshape((ids.len(), n, feature_dim(corpus, max_dim)))?;
        let seq_mask = ids.iter().map(|row| row.iter().map(|&id| id >= 0).collect()).collect();

        Ok(Self {
            user_ids,
            ids,
            x,
            seq_mask,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.ids.len()
    }

    pub fn seq_len(&self) -> usize {
        self.ids.first().map_or(0, Vec::len)
    }
}

/// Which id layout a tokenized batch carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemIdKind {
    /// `n_layers` digits per item, quantized on the fly.
    Base,
    /// `n_layers + 1` digits per item, read from the corpus table.
    Deduplicated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedSeqBatch {
    pub user_ids: Vec<i64>,
    /// `[batch][position * digits + digit]`, `-1` at padding.
    pub sem_ids: Vec<Vec<i64>>,
    /// Same layout as `sem_ids`.
    pub seq_mask: Vec<Vec<bool>>,
    /// `0..digits` repeated once per position.
    pub token_type_ids: Vec<u32>,
    pub kind: SemIdKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::corpus::FeatureMatrix;

    #[test]
    fn test_histories_are_right_padded() -> Result<()> {
        let corpus = FeatureMatrix::from_rows(&[vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]])?;
        let batch = SeqBatch::from_histories(vec![7, 8], &[vec![0, 2], vec![1]], &corpus, 768, &Device::Cpu)?;

        assert_eq!(batch.ids, vec![vec![0, 2], vec![1, -1]]);
        assert_eq!(batch.seq_mask, vec![vec![true, true], vec![true, false]]);
        assert_eq!(batch.x.dims(), &[2, 2, 2]);
        let x = batch.x.to_vec3::<f32>()?;
        assert_eq!(x[1][1], vec![-1.0, -1.0]);
        assert_eq!(x[0][1], vec![3.0, 3.0]);
        Ok(())
    }
}
