pub mod batch;
pub mod corpus;
pub mod dedup;
pub mod semids;
pub mod table;

pub use batch::{SemIdKind, SeqBatch, TokenizedSeqBatch};
pub use corpus::{FeatureMatrix, ItemCorpus};
pub use semids::SemanticIdTokenizer;
pub use table::CorpusIdTable;
