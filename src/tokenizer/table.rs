use crate::error::{Result, SemIdError};

/// Deduplicated semantic ids of a whole corpus, indexed by item ordinal.
///
/// Each row holds `n_layers` base digits followed by one disambiguation
/// digit, stored flat in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusIdTable {
    n_layers: usize,
    codebook_size: usize,
    ids: Vec<u32>,
}

impl CorpusIdTable {
    pub fn new(n_layers: usize, codebook_size: usize) -> Self {
        Self {
            n_layers,
            codebook_size,
            ids: Vec::new(),
        }
    }

    /// Builds a table from flat row-major ids, checking the row width.
    pub fn from_flat(n_layers: usize, codebook_size: usize, ids: Vec<u32>) -> Result<Self> {
        let width = n_layers + 1;
        if ids.len() % width != 0 {
            return Err(SemIdError::TableMismatch(format!(
                "{} ids do not form rows of width {}",
                ids.len(),
                width
            )));
        }
        Ok(Self {
            n_layers,
            codebook_size,
            ids,
        })
    }

    pub fn push_row(&mut self, base: &[u32], digit: u32) {
        debug_assert_eq!(base.len(), self.n_layers);
        self.ids.extend_from_slice(base);
        self.ids.push(digit);
    }

    pub fn len(&self) -> usize {
        self.ids.len() / self.width()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn n_layers(&self) -> usize {
        self.n_layers
    }

    pub fn codebook_size(&self) -> usize {
        self.codebook_size
    }

    /// Columns per row, `n_layers + 1`.
    pub fn width(&self) -> usize {
        self.n_layers + 1
    }

    pub fn row(&self, ordinal: usize) -> Option<&[u32]> {
        let w = self.width();
        self.ids.get(ordinal * w..(ordinal + 1) * w)
    }

    pub fn base(&self, ordinal: usize) -> Option<&[u32]> {
        self.row(ordinal).map(|r| &r[..self.n_layers])
    }

    pub fn digit(&self, ordinal: usize) -> Option<u32> {
        self.row(ordinal).map(|r| r[self.n_layers])
    }

    pub fn max_digit(&self) -> Option<u32> {
        self.rows().map(|r| r[self.n_layers]).max()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u32]> {
        self.ids.chunks_exact(self.width())
    }

    pub fn as_flat(&self) -> &[u32] {
        &self.ids
    }
}
