use crate::storage::mmap::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SemIdError {
    #[error("Invalid item id {id} (corpus size {corpus_size})")]
    InvalidItemId { id: i64, corpus_size: usize },
    #[error("Found {max_digit} max duplicates when codebook size is {codebook_size}")]
    DisambiguationOverflow { max_digit: u32, codebook_size: usize },
    #[error("Missing pretrained weight: {0}")]
    MissingWeight(String),
    #[error("Unexpected weight in checkpoint: {0}")]
    UnexpectedWeight(String),
    #[error("Shape mismatch for {name}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Corpus table does not match quantizer: {0}")]
    TableMismatch(String),
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SemIdError>;
