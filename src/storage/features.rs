use crate::error::Result;
use crate::storage::format::{element_count, FeatureHeader, FEATURE_MAGIC, FORMAT_VERSION};
use crate::storage::mmap::{MappedFile, StorageError};
use crate::tokenizer::corpus::ItemCorpus;
use bytemuck::{bytes_of, Zeroable};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

/// Writes every row of `corpus` to a feature file.
pub fn write_features(corpus: &dyn ItemCorpus, path: &Path) -> Result<()> {
    let mut header = FeatureHeader {
        magic: FEATURE_MAGIC,
        version: FORMAT_VERSION,
        dim: corpus.dim() as u32,
        num_rows: corpus.len() as u64,
        ..FeatureHeader::zeroed()
    };

    let mut writer = BufWriter::new(std::fs::File::create(path)?);
    writer.write_all(bytes_of(&header))?;
    let mut hasher = crc32fast::Hasher::new();
    for row in (0..corpus.len()).filter_map(|i| corpus.row(i)) {
        let bytes: &[u8] = bytemuck::cast_slice(row);
        writer.write_all(bytes)?;
        hasher.update(bytes);
    }

    header.checksum = hasher.finalize() as u64;
    writer.seek(SeekFrom::Start(0))?;
    writer.write_all(bytes_of(&header))?;
    writer.flush()?;
    Ok(())
}

/// Memory-mapped feature file.
pub struct FeatureFile {
    file: MappedFile,
    dim: usize,
    rows: usize,
    len: usize,
}

impl FeatureFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = MappedFile::open(path, &FEATURE_MAGIC)?;
        let header = *file.header::<FeatureHeader>();
        let len = element_count(header.num_rows, u64::from(header.dim)).ok_or_else(|| {
            StorageError::InvalidHeader(format!("{} rows of dimension {}", header.num_rows, header.dim))
        })?;
        file.checked_body::<f32>(len, header.checksum)?;
        Ok(Self {
            file,
            dim: header.dim as usize,
            rows: header.num_rows as usize,
            len,
        })
    }

    fn values(&self) -> &[f32] {
        bytemuck::cast_slice(&self.file.body()[..self.len * std::mem::size_of::<f32>()])
    }
}

impl ItemCorpus for FeatureFile {
    fn len(&self) -> usize {
        self.rows
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn row(&self, ordinal: usize) -> Option<&[f32]> {
        if ordinal >= self.rows {
            return None;
        }
        self.values().get(ordinal * self.dim..(ordinal + 1) * self.dim)
    }
}
