use bytemuck::{Pod, Zeroable};

pub const TABLE_MAGIC: [u8; 8] = *b"SEMIDTB1";
pub const FEATURE_MAGIC: [u8; 8] = *b"SEMIDFT1";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 256;

/// Header of a corpus id table file. The body is `num_items * width`
/// little-endian `u32` ids, row-major in item order.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct TableHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub n_layers: u32,
    pub codebook_size: u32,
    pub width: u32,
    pub num_items: u64,
    pub checksum: u64, // CRC32 of the body
    pub padding: [u64; 27],
}

/// Header of a feature file. The body is `num_rows * dim` `f32` values.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct FeatureHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub dim: u32,
    pub num_rows: u64,
    pub checksum: u64,
    pub padding: [u64; 28],
}

const _: () = assert!(std::mem::size_of::<TableHeader>() == HEADER_SIZE);
const _: () = assert!(std::mem::size_of::<FeatureHeader>() == HEADER_SIZE);

/// `a * b` as a `usize`, or `None` when the product does not fit.
pub fn element_count(a: u64, b: u64) -> Option<usize> {
    a.checked_mul(b).and_then(|n| usize::try_from(n).ok())
}
