pub mod features;
pub mod format;
pub mod mmap;
pub mod table;

pub use features::{write_features, FeatureFile};
pub use mmap::StorageError;
pub use table::{load_table, save_table};
