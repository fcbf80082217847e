use crate::config::{RqVaeConfig, TokenizerConfig};
use crate::core::rqvae::RqVae;
use crate::error::{Result, SemIdError};
use crate::tokenizer::batch::{SemIdKind, SeqBatch, TokenizedSeqBatch};
use crate::tokenizer::corpus::{gather_features, ItemCorpus};
use crate::tokenizer::dedup::DuplicateRanker;
use crate::tokenizer::table::CorpusIdTable;
use candle_core::Device;
use std::path::Path;
use tracing::{debug, info, warn};

/// Maps item histories to deduplicated semantic id sequences with a frozen
/// RQ-VAE.
pub struct SemanticIdTokenizer {
    model: RqVae,
    config: TokenizerConfig,
    cached: Option<CorpusIdTable>,
}

impl SemanticIdTokenizer {
    /// Builds the model with k-means init disabled and optionally loads
    /// trained weights.
    pub fn new(
        rqvae: RqVaeConfig,
        config: TokenizerConfig,
        weights: Option<&Path>,
        device: &Device,
    ) -> Result<Self> {
        let mut model = RqVae::new(
            RqVaeConfig {
                codebook_kmeans_init: false,
                ..rqvae
            },
            device,
        )?;
        if let Some(path) = weights {
            model.load_pretrained(path)?;
        }
        Self::from_model(model, config)
    }

    pub fn from_model(model: RqVae, config: TokenizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            config,
            cached: None,
        })
    }

    pub fn model(&self) -> &RqVae {
        &self.model
    }

    /// Drops the corpus table.
    pub fn reset(&mut self) {
        self.cached = None;
    }

    /// Digits per item in a deduplicated sequence.
    pub fn sem_ids_dim(&self) -> usize {
        self.model.n_layers() + 1
    }

    pub fn cached_table(&self) -> Option<&CorpusIdTable> {
        self.cached.as_ref()
    }

    /// Installs a table built earlier, e.g. one loaded from disk.
    pub fn set_table(&mut self, table: CorpusIdTable) -> Result<()> {
        if table.n_layers() != self.model.n_layers() || table.codebook_size() != self.model.codebook_size() {
            return Err(SemIdError::TableMismatch(format!(
                "table has {} layers of size {}, model has {} of size {}",
                table.n_layers(),
                table.codebook_size(),
                self.model.n_layers(),
                self.model.codebook_size()
            )));
        }
        if let Some(max_digit) = table.max_digit() {
            if max_digit as usize >= table.codebook_size() {
                return Err(SemIdError::DisambiguationOverflow {
                    max_digit,
                    codebook_size: table.codebook_size(),
                });
            }
        }
        self.cached = Some(table);
        Ok(())
    }

    /// Quantizes the whole corpus in ordinal order and appends a
    /// disambiguation digit so every item gets a unique sequence.
    ///
    /// On error the previous table is dropped and nothing is cached.
    pub fn precompute_corpus_ids(&mut self, corpus: &dyn ItemCorpus) -> Result<&CorpusIdTable> {
        self.cached = None;
        let n_layers = self.model.n_layers();
        let codebook_size = self.model.codebook_size();
        let mut table = CorpusIdTable::new(n_layers, codebook_size);
        let mut ranker = DuplicateRanker::default();

        let ordinals: Vec<i64> = (0..corpus.len() as i64).collect();
        for (i, chunk) in ordinals.chunks(self.config.batch_size).enumerate() {
            let x = gather_features(corpus, chunk, self.config.max_feature_dim, self.model.device())?;
            let base = self.model.semantic_ids(&x)?;
            let ranks = ranker.rank_batch(&base);
            for (ids, rank) in base.iter().zip(ranks) {
                table.push_row(ids, rank);
            }
            debug!("precompute batch {}: {} items", i, chunk.len());
        }

        if let Some(max_digit) = ranker.max_rank() {
            if max_digit as usize >= codebook_size {
                return Err(SemIdError::DisambiguationOverflow {
                    max_digit,
                    codebook_size,
                });
            }
        }

        info!(
            "Precomputed semantic ids for {} items: {} distinct base sequences, max digit {}",
            table.len(),
            ranker.distinct(),
            ranker.max_rank().unwrap_or(0)
        );
        Ok(self.cached.insert(table))
    }

    /// Tokenizes a padded batch of histories.
    ///
    /// With a table covering every id the result is `Deduplicated`. Otherwise
    /// the batch features are quantized directly and the result is `Base`.
    pub fn tokenize(&self, batch: &SeqBatch) -> Result<TokenizedSeqBatch> {
        let corpus_size = self.cached.as_ref().map_or(0, CorpusIdTable::len);
        let flat: Vec<i64> = batch.ids.concat();
        if let Some(&id) = flat.iter().find(|&&id| id < -1) {
            return Err(SemIdError::InvalidItemId { id, corpus_size });
        }

        let max_id = flat.iter().copied().max().unwrap_or(-1);
        let lookup = self.cached.as_ref().filter(|t| max_id < t.len() as i64);
        if lookup.is_none() && self.cached.is_some() {
            warn!(
                "Item id {} outside cached corpus of {} items, quantizing batch directly",
                max_id, corpus_size
            );
        }

        let n = batch.seq_len();
        let (digits, kind, per_item): (usize, SemIdKind, Vec<Vec<u32>>) = match lookup {
            Some(table) => {
                let rows = flat
                    .iter()
                    .map(|&id| match usize::try_from(id).ok().and_then(|i| table.row(i)) {
                        Some(row) => row.to_vec(),
                        None => vec![0; table.width()],
                    })
                    .collect();
                (table.width(), SemIdKind::Deduplicated, rows)
            }
            None => {
                let dims = batch.x.dims();
                let x = batch.x.reshape((flat.len(), dims[dims.len() - 1]))?;
                (self.model.n_layers(), SemIdKind::Base, self.model.semantic_ids(&x)?)
            }
        };

        let mut sem_ids = Vec::with_capacity(batch.batch_size());
        let mut seq_mask = Vec::with_capacity(batch.batch_size());
        for (b, row_ids) in batch.ids.iter().enumerate() {
            let mut ids = Vec::with_capacity(n * digits);
            let mut mask = Vec::with_capacity(n * digits);
            for (p, &item) in row_ids.iter().enumerate() {
                let valid = item >= 0;
                for &digit in &per_item[b * n + p] {
                    ids.push(if valid { i64::from(digit) } else { -1 });
                    mask.push(valid);
                }
            }
            sem_ids.push(ids);
            seq_mask.push(mask);
        }

        Ok(TokenizedSeqBatch {
            user_ids: batch.user_ids.clone(),
            sem_ids,
            seq_mask,
            token_type_ids: (0..n).flat_map(|_| 0..digits as u32).collect(),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::corpus::FeatureMatrix;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn rqvae_config(codebook_size: usize) -> RqVaeConfig {
        RqVaeConfig {
            input_dim: 6,
            embed_dim: 4,
            hidden_dims: vec![8],
            codebook_size,
            n_layers: 3,
            n_cat_features: 0,
            ..RqVaeConfig::default()
        }
    }

    fn tokenizer(codebook_size: usize, batch_size: usize) -> SemanticIdTokenizer {
        let config = TokenizerConfig {
            batch_size,
            ..TokenizerConfig::default()
        };
        SemanticIdTokenizer::new(rqvae_config(codebook_size), config, None, &Device::Cpu).unwrap()
    }

    fn random_corpus(rows: usize) -> FeatureMatrix {
        let mut rng = StdRng::seed_from_u64(3);
        let data: Vec<f32> = (0..rows * 6).map(|_| rng.gen_range(-1.0..1.0)).collect();
        FeatureMatrix::new(6, data).unwrap()
    }

    fn constant_corpus(rows: usize) -> FeatureMatrix {
        FeatureMatrix::new(6, vec![0.5; rows * 6]).unwrap()
    }

    /// 40 random items followed by two more copies of items 0..5, so some
    /// base sequences collide for certain.
    fn corpus_with_duplicates() -> FeatureMatrix {
        let random = random_corpus(40);
        let mut data = random.as_slice().to_vec();
        for _ in 0..2 {
            data.extend_from_slice(&random.as_slice()[..5 * 6]);
        }
        FeatureMatrix::new(6, data).unwrap()
    }

    /// Tokenizer whose codebooks were fitted by k-means on `corpus`.
    fn fitted_tokenizer(corpus: &FeatureMatrix, codebook_size: usize, batch_size: usize) -> SemanticIdTokenizer {
        let config = RqVaeConfig {
            codebook_kmeans_init: true,
            ..rqvae_config(codebook_size)
        };
        let mut model = RqVae::new(config, &Device::Cpu).unwrap();
        let all: Vec<i64> = (0..corpus.len() as i64).collect();
        let x = gather_features(corpus, &all, 768, &Device::Cpu).unwrap();
        model.initialize_codebooks(&x).unwrap();
        let tokenizer_config = TokenizerConfig {
            batch_size,
            ..TokenizerConfig::default()
        };
        SemanticIdTokenizer::from_model(model, tokenizer_config).unwrap()
    }

    #[test]
    fn test_corpus_ids_are_unique() -> Result<()> {
        let corpus = corpus_with_duplicates();
        let mut tok = fitted_tokenizer(&corpus, 16, 7);
        let table = tok.precompute_corpus_ids(&corpus)?;
        assert_eq!(table.len(), 50);
        assert_eq!(table.width(), 4);
        let distinct: HashSet<&[u32]> = table.rows().collect();
        assert_eq!(distinct.len(), 50);

        // Copies share the base sequence of their original and count up
        for i in 0..5 {
            assert_eq!(table.base(i), table.base(40 + i));
            assert_eq!(table.base(i), table.base(45 + i));
            let first = table.digit(40 + i).unwrap();
            assert!(first >= 1);
            assert!(table.digit(45 + i) > Some(first));
        }

        // A base sequence seen once keeps digit 0
        for i in 0..table.len() {
            let base = table.base(i).unwrap();
            if table.rows().filter(|r| &r[..3] == base).count() == 1 {
                assert_eq!(table.digit(i), Some(0));
            }
        }
        Ok(())
    }

    #[test]
    fn test_precompute_is_idempotent() -> Result<()> {
        let corpus = corpus_with_duplicates();
        let mut tok = fitted_tokenizer(&corpus, 16, 8);
        let first = tok.precompute_corpus_ids(&corpus)?.clone();
        let second = tok.precompute_corpus_ids(&corpus)?.clone();
        assert_eq!(first, second);
        assert!(first.max_digit() >= Some(2));
        Ok(())
    }

    #[test]
    fn test_identical_items_across_batches_get_increasing_digits() -> Result<()> {
        let mut tok = tokenizer(8, 2);
        let table = tok.precompute_corpus_ids(&constant_corpus(5))?;
        let digits: Vec<u32> = (0..5).filter_map(|i| table.digit(i)).collect();
        assert_eq!(digits, vec![0, 1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_overflow_leaves_cache_empty() {
        let mut tok = tokenizer(4, 512);
        let err = tok.precompute_corpus_ids(&constant_corpus(5)).unwrap_err();
        assert!(matches!(
            err,
            SemIdError::DisambiguationOverflow {
                max_digit: 4,
                codebook_size: 4
            }
        ));
        assert!(tok.cached_table().is_none());
    }

    #[test]
    fn test_zero_vector_gets_valid_ids() -> Result<()> {
        let mut tok = tokenizer(8, 4);
        let corpus = FeatureMatrix::new(6, vec![0.0; 6])?;
        let row = tok.precompute_corpus_ids(&corpus)?.row(0).unwrap().to_vec();
        assert!(row[..3].iter().all(|&d| d < 8));
        assert_eq!(row[3], 0);
        Ok(())
    }

    #[test]
    fn test_tokenize_from_table_masks_padding() -> Result<()> {
        let corpus = random_corpus(10);
        let mut tok = tokenizer(16, 4);
        let table = tok.precompute_corpus_ids(&corpus)?.clone();

        let batch = SeqBatch::from_histories(vec![1, 2], &[vec![3, 4], vec![9]], &corpus, 768, &Device::Cpu)?;
        let out = tok.tokenize(&batch)?;

        assert_eq!(out.kind, SemIdKind::Deduplicated);
        assert_eq!(out.token_type_ids, vec![0, 1, 2, 3, 0, 1, 2, 3]);
        let expected: Vec<i64> = table.row(3).unwrap().iter().chain(table.row(4).unwrap()).map(|&d| d as i64).collect();
        assert_eq!(out.sem_ids[0], expected);
        assert_eq!(&out.sem_ids[1][4..], &[-1, -1, -1, -1]);
        assert_eq!(&out.seq_mask[1][..5], &[true, true, true, true, false]);
        Ok(())
    }

    #[test]
    fn test_stale_table_falls_back_to_base_ids() -> Result<()> {
        let corpus = random_corpus(10);
        let mut tok = tokenizer(16, 4);
        tok.precompute_corpus_ids(&FeatureMatrix::new(6, corpus.as_slice()[..5 * 6].to_vec())?)?;

        let batch = SeqBatch::from_histories(vec![1], &[vec![2, 8, -1]], &corpus, 768, &Device::Cpu)?;
        let out = tok.tokenize(&batch)?;
        assert_eq!(out.kind, SemIdKind::Base);
        assert_eq!(out.sem_ids[0].len(), 9);
        assert_eq!(out.token_type_ids, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
        assert_eq!(&out.sem_ids[0][6..], &[-1, -1, -1]);

        let x = gather_features(&corpus, &[2], 768, &Device::Cpu)?;
        let direct: Vec<i64> = tok.model().semantic_ids(&x)?[0].iter().map(|&d| d as i64).collect();
        assert_eq!(&out.sem_ids[0][..3], direct.as_slice());
        Ok(())
    }

    #[test]
    fn test_tokenize_rejects_negative_ids() -> Result<()> {
        let corpus = random_corpus(4);
        let tok = tokenizer(16, 4);
        let mut batch = SeqBatch::from_histories(vec![1], &[vec![0, 1]], &corpus, 768, &Device::Cpu)?;
        batch.ids[0][1] = -3;
        assert!(matches!(tok.tokenize(&batch), Err(SemIdError::InvalidItemId { id: -3, .. })));
        Ok(())
    }

    #[test]
    fn test_set_table_rejects_overflowing_digit() -> Result<()> {
        let mut tok = tokenizer(16, 4);
        let mut good = CorpusIdTable::new(3, 16);
        good.push_row(&[1, 2, 3], 0);
        tok.set_table(good.clone())?;

        let mut bad = CorpusIdTable::new(3, 16);
        bad.push_row(&[1, 2, 3], 16);
        let err = tok.set_table(bad).unwrap_err();
        assert!(matches!(
            err,
            SemIdError::DisambiguationOverflow {
                max_digit: 16,
                codebook_size: 16
            }
        ));
        assert_eq!(tok.cached_table(), Some(&good));
        Ok(())
    }

    #[test]
    fn test_set_table_checks_layout() {
        let mut tok = tokenizer(16, 4);
        assert!(tok.set_table(CorpusIdTable::new(2, 16)).is_err());
        assert!(tok.set_table(CorpusIdTable::new(3, 16)).is_ok());
        assert_eq!(tok.sem_ids_dim(), 4);
    }
}
