//! Column materialization: raw column + quantizer -> quantized column.
//!
//! Work is split into fixed-size chunks processed in parallel. Dense sources
//! are walked in incremental order so physical reads are monotonic; writes go
//! to disjoint destination slots.

use std::borrow::Cow;
use std::ops::Range;

use crate::data::columns::{RawValues, SparseValues};
use crate::data::indexing::{IncrementalDenseIndexing, SubsetIndexing};
use crate::data::quantizer::ValueQuantizer;
use crate::data::storage::{
    BinValue, CompressedArray, QuantizedColumn, SparseArrayIndexingType, SparseCompressedArray,
    SparseIndex, dispatch_bit_width,
};
use crate::error::Result;
use crate::utils::{DisjointSlice, Parallelism};

const CHUNK_SIZE: usize = 1 << 14;

/// Everything a column needs besides its own values.
#[derive(Clone, Copy, Debug)]
pub struct MaterializeContext<'a> {
    pub subset: &'a SubsetIndexing,
    pub incremental: &'a IncrementalDenseIndexing,
    pub sparse_indexing: SparseArrayIndexingType,
    pub parallelism: Parallelism,
}

impl MaterializeContext<'_> {
    #[inline]
    pub fn object_count(&self) -> usize {
        self.subset.size()
    }
}

// =============================================================================
// Chunked Walk
// =============================================================================

/// How a column's values are visited.
enum Walk<'v, T> {
    /// Dense source; `ordered` walks logical order instead of physical order.
    Dense { data: &'v [T], ordered: bool },
    /// Only the stored values of a sparse source.
    SparseStored(&'v SparseValues<T>),
    /// Every position of a sparse source, with the default's bin precomputed.
    SparseAll { sparse: &'v SparseValues<T>, default_bin: u32 },
}

impl<'v, T: Copy + Send + Sync> Walk<'v, T> {
    fn plan<Q>(
        values: &'v RawValues<T>,
        quantizer: &Q,
        skip_bin: Option<u32>,
        ordered: bool,
    ) -> Result<Self>
    where
        Q: ValueQuantizer<Value = T>,
    {
        Ok(match values {
            RawValues::Dense(data) => Walk::Dense { data, ordered },
            RawValues::Sparse(sparse) => {
                let default_bin = quantizer.quantize(sparse.default_value)?;
                if sparse.default_count() == 0 || skip_bin == Some(default_bin) {
                    Walk::SparseStored(sparse)
                } else {
                    Walk::SparseAll { sparse, default_bin }
                }
            }
        })
    }

    fn len(&self, ctx: &MaterializeContext) -> usize {
        match self {
            Walk::Dense { .. } => ctx.object_count(),
            Walk::SparseStored(sparse) => sparse.non_default_count(),
            Walk::SparseAll { sparse, .. } => sparse.size as usize,
        }
    }

    /// Visit one chunk sequentially, calling `out(object_idx, bin)` for bins
    /// other than `skip_bin`.
    fn visit<Q>(
        &self,
        range: Range<usize>,
        quantizer: &Q,
        skip_bin: Option<u32>,
        ctx: &MaterializeContext,
        out: &mut dyn FnMut(usize, u32),
    ) -> Result<()>
    where
        Q: ValueQuantizer<Value = T>,
    {
        let mut emit = |idx: usize, bin: u32| {
            if skip_bin != Some(bin) {
                out(idx, bin);
            }
        };
        match self {
            Walk::Dense { data, ordered } => {
                let incremental = ctx.incremental;
                if *ordered || incremental.is_identity() {
                    for k in range {
                        emit(k, quantizer.quantize(data[ctx.subset.get(k) as usize])?);
                    }
                } else {
                    for k in range {
                        let src = incremental.src.get(k) as usize;
                        let dst = incremental.dst.get(k) as usize;
                        emit(dst, quantizer.quantize(data[src])?);
                    }
                }
            }
            Walk::SparseStored(sparse) => {
                for j in range {
                    emit(sparse.indices[j] as usize, quantizer.quantize(sparse.values[j])?);
                }
            }
            Walk::SparseAll { sparse, default_bin } => {
                let mut next = sparse.indices.partition_point(|&idx| (idx as usize) < range.start);
                for pos in range {
                    if sparse.indices.get(next).is_some_and(|&idx| idx as usize == pos) {
                        emit(pos, quantizer.quantize(sparse.values[next])?);
                        next += 1;
                    } else {
                        emit(pos, *default_bin);
                    }
                }
            }
        }
        Ok(())
    }
}

#[inline]
fn chunk_range(chunk: usize, len: usize) -> Range<usize> {
    let begin = chunk * CHUNK_SIZE;
    begin..(begin + CHUNK_SIZE).min(len)
}

/// Call `f(object_idx, bin)` for every object whose bin may differ from
/// `skip_bin`. Objects are visited in no particular order, each at most once.
pub(crate) fn for_each_quantized<Q, F>(
    values: &RawValues<Q::Value>,
    quantizer: &Q,
    skip_bin: Option<u32>,
    ctx: &MaterializeContext,
    f: F,
) -> Result<()>
where
    Q: ValueQuantizer,
    F: Fn(usize, u32) + Sync + Send,
{
    let walk = Walk::plan(values, quantizer, skip_bin, false)?;
    let len = walk.len(ctx);
    ctx.parallelism.maybe_par_try_for_each(0..len.div_ceil(CHUNK_SIZE), |chunk| {
        walk.visit(chunk_range(chunk, len), quantizer, skip_bin, ctx, &mut |idx, bin| f(idx, bin))
    })
}

/// `(object_idx, bin)` of every object whose bin differs from `default_bin`,
/// ascending by object index.
pub(crate) fn collect_non_default<Q: ValueQuantizer>(
    values: &RawValues<Q::Value>,
    quantizer: &Q,
    default_bin: u32,
    ctx: &MaterializeContext,
) -> Result<Vec<(u32, u32)>> {
    let walk = Walk::plan(values, quantizer, Some(default_bin), true)?;
    let len = walk.len(ctx);
    let chunks = ctx.parallelism.maybe_par_try_map(0..len.div_ceil(CHUNK_SIZE), |chunk| {
        let mut entries = Vec::new();
        walk.visit(chunk_range(chunk, len), quantizer, Some(default_bin), ctx, &mut |idx, bin| {
            entries.push((idx as u32, bin))
        })?;
        Ok(entries)
    })?;
    Ok(chunks.concat())
}

// =============================================================================
// Materialization
// =============================================================================

/// Quantize one column.
///
/// With a default bin the result is sparse and sized by the non-default
/// count; otherwise it is dense, pre-filled with the bin of the source's
/// sparse default. An owned `values` is dropped as soon as it has been read.
pub fn materialize_column<Q: ValueQuantizer>(
    values: Cow<'_, RawValues<Q::Value>>,
    quantizer: &Q,
    ctx: &MaterializeContext,
) -> Result<QuantizedColumn> {
    let width = quantizer.bit_width();
    let object_count = ctx.object_count();

    let column = match quantizer.default_bin() {
        Some(default_bin) => {
            let entries = collect_non_default(&values, quantizer, default_bin, ctx)?;
            let (indices, bins): (Vec<u32>, Vec<u32>) = entries.into_iter().unzip();
            let stored = dispatch_bit_width!(width, T => {
                CompressedArray::from_vec(bins.into_iter().map(T::from_u32).collect::<Vec<T>>())
            });
            QuantizedColumn::Sparse(SparseCompressedArray {
                index: SparseIndex::from_sorted(indices, ctx.sparse_indexing),
                values: stored,
                default_value: default_bin,
                size: object_count as u32,
            })
        }
        None => {
            let fill = match values.as_ref() {
                RawValues::Dense(_) => 0,
                RawValues::Sparse(sparse) => quantizer.quantize(sparse.default_value)?,
            };
            dispatch_bit_width!(width, T => {
                let data = quantize_dense::<T, Q>(&values, quantizer, fill, ctx)?;
                QuantizedColumn::Dense(CompressedArray::from_vec(data))
            })
        }
    };
    drop(values);
    Ok(column)
}

fn quantize_dense<T: BinValue, Q: ValueQuantizer>(
    values: &RawValues<Q::Value>,
    quantizer: &Q,
    fill: u32,
    ctx: &MaterializeContext,
) -> Result<Vec<T>> {
    let mut data = vec![T::default(); ctx.object_count()];
    if fill != 0 {
        ctx.parallelism.maybe_par_fill(&mut data, T::from_u32(fill));
    }
    let dst = DisjointSlice::new(&mut data);
    // Safety: every object index is emitted at most once.
    for_each_quantized(values, quantizer, Some(fill), ctx, |idx, bin| unsafe {
        dst.update(idx, |slot| *slot = T::from_u32(bin));
    })?;
    Ok(data)
}
