use crate::storage::format::{FORMAT_VERSION, HEADER_SIZE};
use bytemuck::Pod;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid magic bytes")]
    InvalidMagic,
    #[error("File too small")]
    FileTooSmall,
    #[error("Checksum mismatch")]
    ChecksumMismatch,
    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

/// Read-only memory map of a file made of a 256-byte header and a body.
pub struct MappedFile {
    mmap: Mmap,
}

impl MappedFile {
    /// Maps `path` and checks magic bytes and version. Every header starts
    /// with 8 magic bytes followed by a `u32` version.
    pub fn open(path: &Path, magic: &[u8; 8]) -> Result<Self, StorageError> {
        let file = File::open(path)?;
        // The file is not modified while mapped
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE {
            return Err(StorageError::FileTooSmall);
        }
        if &mmap[0..8] != magic {
            return Err(StorageError::InvalidMagic);
        }
        let version = u32::from_le_bytes([mmap[8], mmap[9], mmap[10], mmap[11]]);
        if version != FORMAT_VERSION {
            return Err(StorageError::UnsupportedVersion(version));
        }

        Ok(Self { mmap })
    }

    pub fn header<H: Pod>(&self) -> &H {
        bytemuck::from_bytes::<H>(&self.mmap[0..std::mem::size_of::<H>()])
    }

    pub fn body(&self) -> &[u8] {
        &self.mmap[HEADER_SIZE..]
    }

    /// Body as `len` values of `T`, after checking its size and checksum.
    pub fn checked_body<T: Pod>(&self, len: usize, checksum: u64) -> Result<&[T], StorageError> {
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| StorageError::InvalidHeader(format!("body of {} values overflows", len)))?;
        if self.body().len() < bytes {
            return Err(StorageError::FileTooSmall);
        }
        let body = &self.body()[..bytes];
        if crc32fast::hash(body) as u64 != checksum {
            return Err(StorageError::ChecksumMismatch);
        }
        Ok(bytemuck::cast_slice(body))
    }
}
