use crate::error::{Result, SemIdError};
use crate::storage::format::{element_count, TableHeader, FORMAT_VERSION, TABLE_MAGIC};
use crate::storage::mmap::{MappedFile, StorageError};
use crate::tokenizer::table::CorpusIdTable;
use bytemuck::{bytes_of, Zeroable};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

pub fn save_table(table: &CorpusIdTable, path: &Path) -> Result<()> {
    let body: &[u8] = bytemuck::cast_slice(table.as_flat());
    let header = TableHeader {
        magic: TABLE_MAGIC,
        version: FORMAT_VERSION,
        n_layers: table.n_layers() as u32,
        codebook_size: table.codebook_size() as u32,
        width: table.width() as u32,
        num_items: table.len() as u64,
        checksum: crc32fast::hash(body) as u64,
        ..TableHeader::zeroed()
    };

    let mut writer = BufWriter::new(std::fs::File::create(path)?);
    writer.write_all(bytes_of(&header))?;
    writer.write_all(body)?;
    writer.flush()?;
    info!("Saved corpus table of {} items to {:?}", table.len(), path);
    Ok(())
}

/// Maps a table file, verifies it and copies it into memory.
pub fn load_table(path: &Path) -> Result<CorpusIdTable> {
    let file = MappedFile::open(path, &TABLE_MAGIC)?;
    let header = *file.header::<TableHeader>();
    if header.n_layers.checked_add(1) != Some(header.width) {
        return Err(SemIdError::TableMismatch(format!(
            "row width {} for {} layers",
            header.width, header.n_layers
        )));
    }
    let len = element_count(header.num_items, u64::from(header.width)).ok_or_else(|| {
        StorageError::InvalidHeader(format!("{} items of width {}", header.num_items, header.width))
    })?;
    let ids: &[u32] = file.checked_body(len, header.checksum)?;
    let table = CorpusIdTable::from_flat(header.n_layers as usize, header.codebook_size as usize, ids.to_vec())?;
    info!("Loaded corpus table of {} items from {:?}", table.len(), path);
    Ok(table)
}
