//! Storage types for quantized data.
//!
//! Bin values are stored at one of three widths (8/16/32 bits). The width is
//! encoded in the [`CompressedArray`] variant; hot loops are written once over
//! the [`BinValue`] trait and monomorphized per width.

use serde::{Deserialize, Serialize};

use crate::data::quantizer::ExternalColumn;

// =============================================================================
// Bit Width
// =============================================================================

/// Width of one stored bin value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum BitWidth {
    /// Up to 256 distinct values.
    #[default]
    U8,
    /// Up to 65536 distinct values.
    U16,
    U32,
}

impl BitWidth {
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            Self::U8 => 8,
            Self::U16 => 16,
            Self::U32 => 32,
        }
    }

    #[inline]
    pub const fn size_bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Smallest width holding every bin of a feature with `border_count` borders.
    #[inline]
    pub fn for_border_count(border_count: usize) -> Self {
        if border_count < 1 << 8 {
            Self::U8
        } else if border_count < 1 << 16 {
            Self::U16
        } else {
            Self::U32
        }
    }

    /// Smallest width holding `max_value`.
    #[inline]
    pub fn for_max_value(max_value: u32) -> Self {
        if max_value <= u8::MAX as u32 {
            Self::U8
        } else if max_value <= u16::MAX as u32 {
            Self::U16
        } else {
            Self::U32
        }
    }
}

/// Unsigned integer type usable as stored bin value.
pub trait BinValue: Copy + Default + Send + Sync + 'static {
    const WIDTH: BitWidth;

    /// Truncating conversion; callers guarantee `value` fits.
    fn from_u32(value: u32) -> Self;
    fn to_u32(self) -> u32;

    fn wrap(data: Box<[Self]>) -> CompressedArray;
    fn unwrap_ref(array: &CompressedArray) -> Option<&[Self]>;
}

macro_rules! impl_bin_value {
    ($ty:ty, $variant:ident) => {
        impl BinValue for $ty {
            const WIDTH: BitWidth = BitWidth::$variant;

            #[inline(always)]
            fn from_u32(value: u32) -> Self {
                value as $ty
            }

            #[inline(always)]
            fn to_u32(self) -> u32 {
                self as u32
            }

            fn wrap(data: Box<[Self]>) -> CompressedArray {
                CompressedArray::$variant(data)
            }

            fn unwrap_ref(array: &CompressedArray) -> Option<&[Self]> {
                match array {
                    CompressedArray::$variant(data) => Some(data),
                    _ => None,
                }
            }
        }
    };
}

impl_bin_value!(u8, U8);
impl_bin_value!(u16, U16);
impl_bin_value!(u32, U32);

// =============================================================================
// Compressed Array
// =============================================================================

/// Dense bin values with width-typed storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompressedArray {
    U8(Box<[u8]>),
    U16(Box<[u16]>),
    U32(Box<[u32]>),
}

impl CompressedArray {
    pub fn from_vec<T: BinValue>(data: Vec<T>) -> Self {
        T::wrap(data.into_boxed_slice())
    }

    #[inline]
    pub fn width(&self) -> BitWidth {
        match self {
            Self::U8(_) => BitWidth::U8,
            Self::U16(_) => BitWidth::U16,
            Self::U32(_) => BitWidth::U32,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::U8(data) => data.len(),
            Self::U16(data) => data.len(),
            Self::U32(data) => data.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `idx` widened to u32.
    ///
    /// # Panics
    /// Panics if index is out of bounds.
    #[inline]
    pub fn get(&self, idx: usize) -> u32 {
        match self {
            Self::U8(data) => data[idx] as u32,
            Self::U16(data) => data[idx] as u32,
            Self::U32(data) => data[idx],
        }
    }

    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.len() * self.width().size_bytes()
    }

    pub fn to_u32_vec(&self) -> Vec<u32> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    /// Typed view of the storage; `None` if `T` has a different width.
    pub fn as_slice<T: BinValue>(&self) -> Option<&[T]> {
        T::unwrap_ref(self)
    }
}

/// Run a generic block with `$T` bound to the integer type of `$width`.
macro_rules! dispatch_bit_width {
    ($width:expr, $T:ident => $body:expr) => {
        match $width {
            $crate::data::storage::BitWidth::U8 => {
                type $T = u8;
                $body
            }
            $crate::data::storage::BitWidth::U16 => {
                type $T = u16;
                $body
            }
            $crate::data::storage::BitWidth::U32 => {
                type $T = u32;
                $body
            }
        }
    };
}

pub(crate) use dispatch_bit_width;

// =============================================================================
// Sparse Storage
// =============================================================================

/// Encoding of the non-default positions of a sparse column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SparseArrayIndexingType {
    /// Sorted list of positions.
    #[default]
    Indices,
    /// Runs of consecutive positions (start, length).
    Blocks,
    /// Non-empty 64-position blocks with a bitmask each.
    HybridIndex,
}

/// Non-default positions of a sparse column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SparseIndex {
    Indices(Vec<u32>),
    Blocks {
        starts: Vec<u32>,
        lengths: Vec<u32>,
    },
    HybridIndex {
        block_indices: Vec<u32>,
        block_bitmasks: Vec<u64>,
    },
}

impl SparseIndex {
    /// Encode strictly increasing positions.
    pub fn from_sorted(indices: Vec<u32>, indexing_type: SparseArrayIndexingType) -> Self {
        match indexing_type {
            SparseArrayIndexingType::Indices => Self::Indices(indices),
            SparseArrayIndexingType::Blocks => {
                let mut starts: Vec<u32> = Vec::new();
                let mut lengths: Vec<u32> = Vec::new();
                for idx in indices {
                    let extends = matches!(
                        (starts.last(), lengths.last()),
                        (Some(&start), Some(&len)) if start + len == idx
                    );
                    match lengths.last_mut() {
                        Some(len) if extends => *len += 1,
                        _ => {
                            starts.push(idx);
                            lengths.push(1);
                        }
                    }
                }
                Self::Blocks { starts, lengths }
            }
            SparseArrayIndexingType::HybridIndex => {
                let mut block_indices: Vec<u32> = Vec::new();
                let mut block_bitmasks: Vec<u64> = Vec::new();
                for idx in indices {
                    let block = idx / 64;
                    let bit = 1u64 << (idx % 64);
                    let same_block = block_indices.last() == Some(&block);
                    match block_bitmasks.last_mut() {
                        Some(mask) if same_block => *mask |= bit,
                        _ => {
                            block_indices.push(block);
                            block_bitmasks.push(bit);
                        }
                    }
                }
                Self::HybridIndex {
                    block_indices,
                    block_bitmasks,
                }
            }
        }
    }

    pub fn indexing_type(&self) -> SparseArrayIndexingType {
        match self {
            Self::Indices(_) => SparseArrayIndexingType::Indices,
            Self::Blocks { .. } => SparseArrayIndexingType::Blocks,
            Self::HybridIndex { .. } => SparseArrayIndexingType::HybridIndex,
        }
    }

    pub fn non_default_count(&self) -> usize {
        match self {
            Self::Indices(indices) => indices.len(),
            Self::Blocks { lengths, .. } => lengths.iter().map(|&l| l as usize).sum(),
            Self::HybridIndex { block_bitmasks, .. } => {
                block_bitmasks.iter().map(|m| m.count_ones() as usize).sum()
            }
        }
    }

    /// Call `f(position)` for every non-default position, ascending.
    pub fn for_each(&self, mut f: impl FnMut(u32)) {
        match self {
            Self::Indices(indices) => indices.iter().for_each(|&idx| f(idx)),
            Self::Blocks { starts, lengths } => {
                for (&start, &len) in starts.iter().zip(lengths) {
                    (start..start + len).for_each(&mut f);
                }
            }
            Self::HybridIndex {
                block_indices,
                block_bitmasks,
            } => {
                for (&block, &mask) in block_indices.iter().zip(block_bitmasks) {
                    let mut mask = mask;
                    while mask != 0 {
                        let bit = mask.trailing_zeros();
                        f(block * 64 + bit);
                        mask &= mask - 1;
                    }
                }
            }
        }
    }
}

/// Quantized sparse column: non-default bins plus one shared default bin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SparseCompressedArray {
    pub index: SparseIndex,
    /// Bins of the non-default positions, in index order.
    pub values: CompressedArray,
    pub default_value: u32,
    pub size: u32,
}

impl SparseCompressedArray {
    #[inline]
    pub fn non_default_count(&self) -> usize {
        self.values.len()
    }

    /// Expand into one bin per object.
    pub fn to_dense_vec(&self) -> Vec<u32> {
        let mut result = vec![self.default_value; self.size as usize];
        let mut pos = 0;
        self.index.for_each(|idx| {
            result[idx as usize] = self.values.get(pos);
            pos += 1;
        });
        result
    }
}

// =============================================================================
// Quantized Columns
// =============================================================================

/// One quantized feature.
///
/// The view variants own no data: their bins are read out of the aggregate
/// store they point into.
#[derive(Clone, Debug)]
pub enum QuantizedColumn {
    Dense(CompressedArray),
    Sparse(SparseCompressedArray),
    /// Quantized on demand from shared raw data.
    External(ExternalColumn),
    /// Cell values `[begin, end)` of the bundle encode bins `1..=end-begin`.
    BundlePart { bundle_idx: usize, begin: u32, end: u32 },
    /// One bit of a binary pack.
    PackedBinary { pack_idx: usize, bit_idx: u8 },
    /// One byte of a feature group.
    GroupPart { group_idx: usize, part_idx: usize },
}

impl QuantizedColumn {
}
