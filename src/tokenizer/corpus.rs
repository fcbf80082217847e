use crate::error::{Result, SemIdError};
use candle_core::{Device, Tensor};

/// Random access to item feature rows by ordinal.
pub trait ItemCorpus {
    fn len(&self) -> usize;

    fn dim(&self) -> usize;

    fn row(&self, ordinal: usize) -> Option<&[f32]>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owned row-major feature matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    dim: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn new(dim: usize, data: Vec<f32>) -> Result<Self> {
        if dim == 0 || data.len() % dim != 0 {
            return Err(SemIdError::Config(format!(
                "{} values do not form rows of dimension {}",
                data.len(),
                dim
            )));
        }
        Ok(Self { dim, data })
    }

    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let dim = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != dim) {
            return Err(SemIdError::Config("feature rows have different lengths".into()));
        }
        Self::new(dim, rows.concat())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

impl ItemCorpus for FeatureMatrix {
    fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn row(&self, ordinal: usize) -> Option<&[f32]> {
        self.data.get(ordinal * self.dim..(ordinal + 1) * self.dim)
    }
}

/// Feature width after truncation to `max_dim`.
pub fn feature_dim(corpus: &dyn ItemCorpus, max_dim: usize) -> usize {
    corpus.dim().min(max_dim)
}

/// Gathers `(ordinals.len(), min(dim, max_dim))` features. Ordinal `-1` is
/// padding and yields a row of `-1`; anything else outside the corpus is an
/// error.
pub fn gather_features(
    corpus: &dyn ItemCorpus,
    ordinals: &[i64],
    max_dim: usize,
    device: &Device,
) -> Result<Tensor> {
    let dim = feature_dim(corpus, max_dim);
    let mut data = Vec::with_capacity(ordinals.len() * dim);
    for &id in ordinals {
        if id == -1 {
            data.extend(std::iter::repeat(-1.0f32).take(dim));
            continue;
        }
        let row = usize::try_from(id)
            .ok()
            .and_then(|i| corpus.row(i))
            .ok_or(SemIdError::InvalidItemId {
                id,
                corpus_size: corpus.len(),
            })?;
        data.extend_from_slice(&row[..dim]);
    }
    Ok(Tensor::from_vec(data, (ordinals.len(), dim), device)?)
}
