//! Subset indexing: logical object positions to physical storage positions.
//!
//! Three shapes are supported:
//! - [`SubsetIndexing::Full`]: identity over `0..size`
//! - [`SubsetIndexing::Indexed`]: explicit selection / permutation
//! - [`SubsetIndexing::Ranges`]: a list of contiguous source blocks
//!
//! Indexings are immutable once built and are shared by every column of a
//! dataset. New indexings are only produced by composition or inversion.

use crate::utils::Parallelism;

/// Marker for "logical position not present" in an [`InvertedIndexing`].
pub const NOT_PRESENT: u32 = u32::MAX;

/// A contiguous block `[src_begin, src_end)` placed at `dst_begin`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubsetBlock {
    pub src_begin: u32,
    pub src_end: u32,
    pub dst_begin: u32,
}

impl SubsetBlock {
    #[inline]
    pub fn len(&self) -> u32 {
        self.src_end - self.src_begin
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.src_end == self.src_begin
    }
}

/// Mapping from logical object position to physical storage position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubsetIndexing {
    Full(u32),
    Indexed(Vec<u32>),
    Ranges { size: u32, blocks: Vec<SubsetBlock> },
}

impl SubsetIndexing {
    /// Build a ranges subset from consecutive source blocks `(begin, end)`.
    pub fn from_ranges(ranges: &[(u32, u32)]) -> Self {
        let mut dst_begin = 0;
        let blocks: Vec<SubsetBlock> = ranges
            .iter()
            .map(|&(src_begin, src_end)| {
                let block = SubsetBlock {
                    src_begin,
                    src_end,
                    dst_begin,
                };
                dst_begin += block.len();
                block
            })
            .collect();
        Self::Ranges {
            size: dst_begin,
            blocks,
        }
    }

    /// Number of logical objects.
    #[inline]
    pub fn size(&self) -> usize {
        match self {
            Self::Full(size) => *size as usize,
            Self::Indexed(indices) => indices.len(),
            Self::Ranges { size, .. } => *size as usize,
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// Physical position of logical object `idx`.
    pub fn get(&self, idx: usize) -> u32 {
        match self {
            Self::Full(_) => idx as u32,
            Self::Indexed(indices) => indices[idx],
            Self::Ranges { blocks, .. } => {
                let idx = idx as u32;
                let block_idx = blocks.partition_point(|b| b.dst_begin + b.len() <= idx);
                let block = &blocks[block_idx];
                block.src_begin + (idx - block.dst_begin)
            }
        }
    }

    /// Call `f(logical_idx, physical_idx)` for every object, in logical order.
    pub fn for_each(&self, mut f: impl FnMut(usize, u32)) {
        match self {
            Self::Full(size) => (0..*size).for_each(|i| f(i as usize, i)),
            Self::Indexed(indices) => indices.iter().enumerate().for_each(|(i, &s)| f(i, s)),
            Self::Ranges { blocks, .. } => {
                for block in blocks {
                    for (offset, src) in (block.src_begin..block.src_end).enumerate() {
                        f(block.dst_begin as usize + offset, src);
                    }
                }
            }
        }
    }

    /// Materialize the physical positions in logical order.
    pub fn to_vec(&self) -> Vec<u32> {
        match self {
            Self::Full(size) => (0..*size).collect(),
            Self::Indexed(indices) => indices.clone(),
            Self::Ranges { .. } => {
                let mut result = Vec::with_capacity(self.size());
                self.for_each(|_, src| result.push(src));
                result
            }
        }
    }

    /// Invert this indexing over a source of `src_size` objects.
    pub fn invert(&self, src_size: usize) -> InvertedIndexing {
        if let Self::Full(size) = self {
            if *size as usize == src_size {
                return InvertedIndexing::Full(*size);
            }
        }
        let mut mapping = vec![NOT_PRESENT; src_size];
        self.for_each(|dst, src| mapping[src as usize] = dst as u32);
        InvertedIndexing::Indexed(mapping)
    }
}

impl Default for SubsetIndexing {
    fn default() -> Self {
        Self::Full(0)
    }
}

/// Mapping from physical position back to logical position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvertedIndexing {
    Full(u32),
    /// `mapping[src] == NOT_PRESENT` for sources outside the subset.
    Indexed(Vec<u32>),
}

impl InvertedIndexing {
    /// Logical position of physical `src`, if present.
    #[inline]
    pub fn get(&self, src: usize) -> Option<u32> {
        match self {
            Self::Full(size) => (src < *size as usize).then_some(src as u32),
            Self::Indexed(mapping) => match mapping[src] {
                NOT_PRESENT => None,
                dst => Some(dst),
            },
        }
    }
}

// =============================================================================
// Incremental Dense Indexing
// =============================================================================

/// Access order that visits dense source storage monotonically.
///
/// Iterating `src` and writing to the parallel positions of `dst` touches
/// physical memory in strictly increasing order. Both degenerate to identity
/// when there is no dense data or the source subset is already full.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncrementalDenseIndexing {
    pub src: SubsetIndexing,
    pub dst: SubsetIndexing,
}

impl IncrementalDenseIndexing {
    pub fn new(
        src_subset: &SubsetIndexing,
        has_dense_data: bool,
        parallelism: Parallelism,
    ) -> Self {
        let size = src_subset.size() as u32;
        if !has_dense_data || src_subset.is_full() {
            return Self {
                src: SubsetIndexing::Full(size),
                dst: SubsetIndexing::Full(size),
            };
        }

        let mut pairs: Vec<(u32, u32)> = Vec::with_capacity(size as usize);
        src_subset.for_each(|dst, src| pairs.push((src, dst as u32)));

        if parallelism.is_parallel() {
            use rayon::slice::ParallelSliceMut;
            pairs.par_sort_unstable_by_key(|&(src, _)| src);
        } else {
            pairs.sort_unstable_by_key(|&(src, _)| src);
        }

        let (src, dst): (Vec<u32>, Vec<u32>) = pairs.into_iter().unzip();
        Self {
            src: SubsetIndexing::Indexed(src),
            dst: SubsetIndexing::Indexed(dst),
        }
    }

    /// Whether both orders are the identity.
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.src.is_full()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.src.size()
    }
}
