//! Column aggregation: quantize several source features straight into one
//! shared compressed array.
//!
//! The destination is pre-filled with the aggregate's default, then each part
//! is quantized in turn and combined into the cells of the objects where it
//! differs from its own default bin. Parts are processed one after another,
//! so within one part every cell is written by at most one worker.

use std::borrow::Cow;

use crate::data::bundling::{BinaryPack, ExclusiveFeaturesBundle, FeatureGroup};
use crate::data::columns::RawValues;
use crate::data::layout::FeatureIdxWithType;
use crate::data::materialize::{MaterializeContext, for_each_quantized};
use crate::data::quantizer::{CategoricalQuantizer, FloatQuantizer, ValueQuantizer};
use crate::data::storage::{
    BinValue, BitWidth, CompressedArray, QuantizedColumn, dispatch_bit_width,
};
use crate::error::{QuantizationError, Result};
use crate::utils::DisjointSlice;

/// Shape of one aggregate of several features.
pub trait ColumnAggregate: Send + Sync {
    /// Placement of one part inside a cell.
    type Context: Copy + Send + Sync;

    fn parts_count(&self) -> usize;

    /// Stored width of one cell.
    fn bit_width(&self) -> BitWidth;

    fn source_part(&self, part_idx: usize) -> FeatureIdxWithType;

    /// Cell value when every part is at its default bin.
    fn default_value(&self) -> u32;

    /// Bin of a part that leaves the cell untouched.
    fn part_default_bin(&self, part_idx: usize) -> u32;

    fn context(&self, part_idx: usize) -> Self::Context;

    /// Combine the bin of one part into the current cell value.
    fn add_to_aggregate(context: Self::Context, bin: u32, cell: u32) -> u32;

    /// Bin of one part stored in `cell`.
    fn extract(context: Self::Context, cell: u32) -> u32;

    /// Column of one part pointing into aggregate `aggregate_idx`.
    fn view(&self, aggregate_idx: usize, part_idx: usize) -> QuantizedColumn;
}

// =============================================================================
// Exclusive Bundles
// =============================================================================

impl ColumnAggregate for ExclusiveFeaturesBundle {
    /// `[begin, end)` of the part.
    type Context = (u32, u32);

    fn parts_count(&self) -> usize {
        self.parts.len()
    }

    fn bit_width(&self) -> BitWidth {
        ExclusiveFeaturesBundle::bit_width(self)
    }

    fn source_part(&self, part_idx: usize) -> FeatureIdxWithType {
        self.parts[part_idx].feature
    }

    fn default_value(&self) -> u32 {
        self.bin_count()
    }

    fn part_default_bin(&self, _part_idx: usize) -> u32 {
        0
    }

    fn context(&self, part_idx: usize) -> (u32, u32) {
        let part = &self.parts[part_idx];
        (part.begin, part.end)
    }

    #[inline]
    fn add_to_aggregate((begin, _): (u32, u32), bin: u32, cell: u32) -> u32 {
        if bin == 0 { cell } else { begin + bin - 1 }
    }

    #[inline]
    fn extract((begin, end): (u32, u32), cell: u32) -> u32 {
        if (begin..end).contains(&cell) {
            cell - begin + 1
        } else {
            0
        }
    }

    fn view(&self, aggregate_idx: usize, part_idx: usize) -> QuantizedColumn {
        let (begin, end) = self.context(part_idx);
        QuantizedColumn::BundlePart {
            bundle_idx: aggregate_idx,
            begin,
            end,
        }
    }
}

// =============================================================================
// Binary Packs
// =============================================================================

impl ColumnAggregate for BinaryPack {
    /// Bit index of the part.
    type Context = u8;

    fn parts_count(&self) -> usize {
        self.parts.len()
    }

    fn bit_width(&self) -> BitWidth {
        BitWidth::U8
    }

    fn source_part(&self, part_idx: usize) -> FeatureIdxWithType {
        self.parts[part_idx].feature
    }

    fn default_value(&self) -> u32 {
        self.parts
            .iter()
            .enumerate()
            .fold(0, |acc, (bit, part)| acc | (part.default_bin << bit))
    }

    fn part_default_bin(&self, part_idx: usize) -> u32 {
        self.parts[part_idx].default_bin
    }

    fn context(&self, part_idx: usize) -> u8 {
        part_idx as u8
    }

    #[inline]
    fn add_to_aggregate(bit: u8, bin: u32, cell: u32) -> u32 {
        (cell & !(1 << bit)) | ((bin & 1) << bit)
    }

    #[inline]
    fn extract(bit: u8, cell: u32) -> u32 {
        (cell >> bit) & 1
    }

    fn view(&self, aggregate_idx: usize, part_idx: usize) -> QuantizedColumn {
        QuantizedColumn::PackedBinary {
            pack_idx: aggregate_idx,
            bit_idx: part_idx as u8,
        }
    }
}

// =============================================================================
// Feature Groups
// =============================================================================

const GROUP_PART_BITS: u32 = 8;
const GROUP_PART_MASK: u32 = 0xFF;

impl ColumnAggregate for FeatureGroup {
    /// Bit shift of the part.
    type Context = u32;

    fn parts_count(&self) -> usize {
        self.parts.len()
    }

    fn bit_width(&self) -> BitWidth {
        FeatureGroup::bit_width(self)
    }

    fn source_part(&self, part_idx: usize) -> FeatureIdxWithType {
        self.parts[part_idx].feature
    }

    fn default_value(&self) -> u32 {
        self.parts
            .iter()
            .enumerate()
            .fold(0, |acc, (idx, part)| acc | (part.default_bin << (idx as u32 * GROUP_PART_BITS)))
    }

    fn part_default_bin(&self, part_idx: usize) -> u32 {
        self.parts[part_idx].default_bin
    }

    fn context(&self, part_idx: usize) -> u32 {
        part_idx as u32 * GROUP_PART_BITS
    }

    #[inline]
    fn add_to_aggregate(shift: u32, bin: u32, cell: u32) -> u32 {
        (cell & !(GROUP_PART_MASK << shift)) | ((bin & GROUP_PART_MASK) << shift)
    }

    #[inline]
    fn extract(shift: u32, cell: u32) -> u32 {
        (cell >> shift) & GROUP_PART_MASK
    }

    fn view(&self, aggregate_idx: usize, part_idx: usize) -> QuantizedColumn {
        QuantizedColumn::GroupPart {
            group_idx: aggregate_idx,
            part_idx,
        }
    }
}

// =============================================================================
// Aggregation
// =============================================================================

/// Raw values of one part together with its quantizer.
///
/// Owned values are released as soon as the part has been combined.
pub enum PartSource<'a> {
    Float(Cow<'a, RawValues<f32>>, FloatQuantizer),
    Categorical(Cow<'a, RawValues<u32>>, CategoricalQuantizer),
}

/// Build the cells of one aggregate from its parts, given in part order.
pub fn aggregate_columns<A: ColumnAggregate>(
    aggregate: &A,
    sources: Vec<PartSource<'_>>,
    ctx: &MaterializeContext,
) -> Result<CompressedArray> {
    if sources.len() != aggregate.parts_count() {
        return Err(QuantizationError::internal(format!(
            "aggregate has {} parts but {} sources were given",
            aggregate.parts_count(),
            sources.len()
        )));
    }

    dispatch_bit_width!(aggregate.bit_width(), T => {
        let mut cells = vec![T::default(); ctx.object_count()];
        let default_value = aggregate.default_value();
        if default_value != 0 {
            ctx.parallelism.maybe_par_fill(&mut cells, T::from_u32(default_value));
        }
        {
            let dst = DisjointSlice::new(&mut cells);
            for (part_idx, source) in sources.into_iter().enumerate() {
                let context = aggregate.context(part_idx);
                let skip_bin = aggregate.part_default_bin(part_idx);
                match source {
                    PartSource::Float(values, quantizer) => {
                        combine_part::<A, T, _>(&values, &quantizer, skip_bin, context, &dst, ctx)?
                    }
                    PartSource::Categorical(values, quantizer) => {
                        combine_part::<A, T, _>(&values, &quantizer, skip_bin, context, &dst, ctx)?
                    }
                }
            }
        }
        Ok(CompressedArray::from_vec(cells))
    })
}

fn combine_part<A: ColumnAggregate, T: BinValue, Q: ValueQuantizer>(
    values: &RawValues<Q::Value>,
    quantizer: &Q,
    skip_bin: u32,
    context: A::Context,
    dst: &DisjointSlice<'_, T>,
    ctx: &MaterializeContext,
) -> Result<()> {
    // Safety: each object index is visited at most once per part.
    for_each_quantized(values, quantizer, Some(skip_bin), ctx, |idx, bin| unsafe {
        dst.update(idx, |cell| {
            *cell = T::from_u32(A::add_to_aggregate(context, bin, cell.to_u32()));
        });
    })
}

/// View columns of every part, in part order.
pub fn part_views<A: ColumnAggregate>(
    aggregate: &A,
    aggregate_idx: usize,
) -> Vec<(FeatureIdxWithType, QuantizedColumn)> {
    (0..aggregate.parts_count())
        .map(|part_idx| (aggregate.source_part(part_idx), aggregate.view(aggregate_idx, part_idx)))
        .collect()
}

/// Bins of the part placed at `context`, read back from the aggregate cells.
pub fn extract_part<A: ColumnAggregate>(context: A::Context, cells: &CompressedArray) -> Vec<u32> {
    (0..cells.len()).map(|idx| A::extract(context, cells.get(idx))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bundling::{AggregatePartMeta, BundlePartMeta};
    use crate::data::columns::SparseValues;
    use crate::data::indexing::{IncrementalDenseIndexing, SubsetIndexing};
    use crate::data::layout::FeaturesLayout;
    use crate::data::registry::{FloatBinarization, NanMode, QuantizationRegistry};
    use crate::data::split::Quantization;
    use crate::data::storage::SparseArrayIndexingType;
    use crate::utils::Parallelism;
    use rstest::rstest;

    fn registry(borders: &[Vec<f32>]) -> QuantizationRegistry {
        let layout = FeaturesLayout::all_float(borders.len());
        let registry = QuantizationRegistry::new(&layout, &[], FloatBinarization::default());
        for (idx, b) in borders.iter().enumerate() {
            registry
                .set_quantization(idx, Quantization::new(b.clone()), NanMode::Forbidden)
                .unwrap();
        }
        registry
    }

    fn float_source(
        registry: &QuantizationRegistry,
        idx: usize,
        values: RawValues<f32>,
    ) -> PartSource<'static> {
        PartSource::Float(Cow::Owned(values), FloatQuantizer::new(registry, idx).unwrap())
    }

    fn run<A: ColumnAggregate>(
        aggregate: &A,
        sources: Vec<PartSource<'_>>,
        n: u32,
        parallelism: Parallelism,
    ) -> CompressedArray {
        let subset = SubsetIndexing::Full(n);
        let incremental = IncrementalDenseIndexing::new(&subset, true, parallelism);
        let ctx = MaterializeContext {
            subset: &subset,
            incremental: &incremental,
            sparse_indexing: SparseArrayIndexingType::Indices,
            parallelism,
        };
        aggregate_columns(aggregate, sources, &ctx).unwrap()
    }

    #[rstest]
    fn test_bundle_cells_and_read_back(
        #[values(Parallelism::Sequential, Parallelism::Parallel)] parallelism: Parallelism,
    ) {
        // feature 0: 3 bins, feature 1: 3 bins
        let registry = registry(&[vec![0.5, 1.5], vec![0.5, 1.5]]);
        let bundle = ExclusiveFeaturesBundle {
            parts: vec![
                BundlePartMeta { feature: FeatureIdxWithType::float(0), begin: 0, end: 2 },
                BundlePartMeta { feature: FeatureIdxWithType::float(1), begin: 2, end: 4 },
            ],
        };
        let sources = vec![
            float_source(&registry, 0, RawValues::Dense(vec![0.0, 1.0, 0.0, 2.0, 0.0])),
            float_source(
                &registry,
                1,
                RawValues::Sparse(SparseValues::new(vec![2, 4], vec![2.0, 1.0], 0.0, 5)),
            ),
        ];
        let cells = run(&bundle, sources, 5, parallelism);
        assert_eq!(cells.to_u32_vec(), vec![4, 0, 3, 1, 2]);
        let first = extract_part::<ExclusiveFeaturesBundle>(bundle.context(0), &cells);
        assert_eq!(first, vec![0, 1, 0, 2, 0]);
        let second = extract_part::<ExclusiveFeaturesBundle>(bundle.context(1), &cells);
        assert_eq!(second, vec![0, 0, 2, 0, 1]);
    }

    #[test]
    fn test_binary_pack_default_and_combine() {
        let registry = registry(&[vec![0.5], vec![0.5]]);
        let pack = BinaryPack {
            parts: vec![
                AggregatePartMeta { feature: FeatureIdxWithType::float(0), default_bin: 0 },
                AggregatePartMeta { feature: FeatureIdxWithType::float(1), default_bin: 1 },
            ],
        };
        assert_eq!(pack.default_value(), 0b10);

        let sources = vec![
            float_source(&registry, 0, RawValues::Dense(vec![1.0, 0.0])),
            float_source(&registry, 1, RawValues::Dense(vec![0.0, 1.0])),
        ];
        let cells = run(&pack, sources, 2, Parallelism::Sequential);
        // object 0 has bins (1, 0)
        assert_eq!(cells.to_u32_vec(), vec![1, 2]);
        assert_eq!(extract_part::<BinaryPack>(pack.context(1), &cells), vec![0, 1]);
    }

    #[test]
    fn test_group_bytes() {
        let registry = registry(&[vec![0.5, 1.5, 2.5], vec![0.5]]);
        let group = FeatureGroup {
            parts: vec![
                AggregatePartMeta { feature: FeatureIdxWithType::float(0), default_bin: 0 },
                AggregatePartMeta { feature: FeatureIdxWithType::float(1), default_bin: 0 },
            ],
        };
        let sources = vec![
            float_source(&registry, 0, RawValues::Dense(vec![3.0, 1.0, 0.0])),
            float_source(&registry, 1, RawValues::Dense(vec![1.0, 0.0, 1.0])),
        ];
        let cells = run(&group, sources, 3, Parallelism::Parallel);
        assert_eq!(cells.width(), BitWidth::U16);
        assert_eq!(cells.to_u32_vec(), vec![3 | 1 << 8, 1, 1 << 8]);
        assert_eq!(extract_part::<FeatureGroup>(group.context(0), &cells), vec![3, 1, 0]);
    }

    #[test]
    fn test_source_count_mismatch() {
        let bundle = ExclusiveFeaturesBundle::default();
        let registry = registry(&[vec![0.5]]);
        let sources = vec![float_source(&registry, 0, RawValues::Dense(vec![1.0]))];
        let subset = SubsetIndexing::Full(1);
        let incremental = IncrementalDenseIndexing::new(&subset, true, Parallelism::Sequential);
        let ctx = MaterializeContext {
            subset: &subset,
            incremental: &incremental,
            sparse_indexing: SparseArrayIndexingType::Indices,
            parallelism: Parallelism::Sequential,
        };
        assert!(aggregate_columns(&bundle, sources, &ctx).unwrap_err().is_internal());
    }

    #[test]
    fn test_views() {
        let bundle = ExclusiveFeaturesBundle {
            parts: vec![BundlePartMeta { feature: FeatureIdxWithType::float(3), begin: 0, end: 1 }],
        };
        let views = part_views(&bundle, 7);
        assert!(matches!(
            views[0],
            (f, QuantizedColumn::BundlePart { bundle_idx: 7, begin: 0, end: 1 })
                if f.feature_idx == 3
        ));
    }
}
