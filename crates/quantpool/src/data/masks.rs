//! Compact "which objects are non-default" view of a feature.
//!
//! An object is non-default when its bin is not 0. For categorical features
//! bin 0 is the most frequent value once bundling is enabled; for float
//! features it is everything at or below the first border (NaN included
//! unless NaNs go to the last bin).

use fixedbitset::FixedBitSet;

use crate::data::columns::{RawObjectsData, RawValues};
use crate::data::layout::{FeatureIdxWithType, FeatureType};
use crate::data::materialize::{MaterializeContext, collect_non_default};
use crate::data::quantizer::{CategoricalQuantizer, FloatQuantizer, ValueQuantizer};
use crate::data::registry::QuantizationRegistry;
use crate::error::{QuantizationError, Result};

/// Non-default objects as `(block index, bitmask)` pairs over 64-object
/// blocks, ascending by block, plus the number of set bits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NonDefaultMask {
    pub blocks: Vec<(u32, u64)>,
    pub non_default_count: u32,
}

impl NonDefaultMask {
    /// Build from ascending object indices.
    pub fn from_sorted_indices(indices: impl IntoIterator<Item = u32>) -> Self {
        let mut mask = Self::default();
        for idx in indices {
            let block = idx / 64;
            let bit = 1u64 << (idx % 64);
            let n = mask.blocks.len();
            if n > 0 && mask.blocks[n - 1].0 == block {
                mask.blocks[n - 1].1 |= bit;
            } else {
                mask.blocks.push((block, bit));
            }
            mask.non_default_count += 1;
        }
        mask
    }

    /// Expand into a bitset over `object_count` objects.
    pub fn to_bitset(&self, object_count: usize) -> FixedBitSet {
        let mut bitset = FixedBitSet::with_capacity(object_count);
        for &(block, bits) in &self.blocks {
            let mut bits = bits;
            while bits != 0 {
                let idx = block as usize * 64 + bits.trailing_zeros() as usize;
                if idx < object_count {
                    bitset.insert(idx);
                }
                bits &= bits - 1;
            }
        }
        bitset
    }
}

/// Non-default mask of one column under `quantizer`.
pub fn get_non_default_values_mask<Q: ValueQuantizer>(
    values: &RawValues<Q::Value>,
    quantizer: &Q,
    ctx: &MaterializeContext,
) -> Result<NonDefaultMask> {
    let entries = collect_non_default(values, quantizer, 0, ctx)?;
    Ok(NonDefaultMask::from_sorted_indices(entries.into_iter().map(|(idx, _)| idx)))
}

/// Non-default mask of a float or categorical feature of `data`.
///
/// Borders or the perfect hash of the feature must already be registered.
pub fn feature_non_default_mask(
    data: &RawObjectsData,
    registry: &QuantizationRegistry,
    feature: FeatureIdxWithType,
    ctx: &MaterializeContext,
) -> Result<NonDefaultMask> {
    let missing = || QuantizationError::internal(format!("no source column for {feature:?}"));
    match feature.feature_type {
        FeatureType::Float => {
            let values = data
                .float_features
                .get(feature.feature_idx)
                .and_then(Option::as_ref)
                .ok_or_else(missing)?;
            let quantizer = FloatQuantizer::new(registry, feature.feature_idx)?;
            get_non_default_values_mask(values, &quantizer, ctx)
        }
        FeatureType::Categorical => {
            let values = data
                .cat_features
                .get(feature.feature_idx)
                .and_then(Option::as_ref)
                .ok_or_else(missing)?;
            let quantizer = CategoricalQuantizer::new(registry, feature.feature_idx)?;
            get_non_default_values_mask(values, &quantizer, ctx)
        }
        FeatureType::Text => Err(QuantizationError::internal(
            "text features have no non-default mask",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::columns::SparseValues;
    use crate::data::indexing::{IncrementalDenseIndexing, SubsetIndexing};
    use crate::data::layout::FeaturesLayout;
    use crate::data::registry::{FloatBinarization, NanMode};
    use crate::data::split::Quantization;
    use crate::data::storage::SparseArrayIndexingType;
    use crate::utils::Parallelism;

    #[test]
    fn test_from_sorted_indices() {
        let mask = NonDefaultMask::from_sorted_indices([0, 3, 64, 130]);
        assert_eq!(mask.blocks, vec![(0, 0b1001), (1, 1), (2, 1 << 2)]);
        assert_eq!(mask.non_default_count, 4);
        let bitset = mask.to_bitset(200);
        assert_eq!(bitset.ones().collect::<Vec<_>>(), vec![0, 3, 64, 130]);
    }

    #[test]
    fn test_float_masks_dense_and_sparse() {
        let layout = FeaturesLayout::all_float(2);
        let registry = QuantizationRegistry::new(&layout, &[], FloatBinarization::default());
        registry.set_quantization(0, Quantization::new(vec![f32::MIN, 0.5]), NanMode::Min).unwrap();
        registry.set_quantization(1, Quantization::new(vec![0.5]), NanMode::Max).unwrap();

        let data = RawObjectsData::new(layout, 5)
            .with_float(0, RawValues::Dense(vec![0.0, 1.0, f32::NAN, 2.0, 0.2]))
            .with_float(
                1,
                RawValues::Sparse(SparseValues::new(vec![1, 4], vec![1.0, f32::NAN], 0.0, 5)),
            );

        let incremental =
            IncrementalDenseIndexing::new(&data.subset, true, Parallelism::Sequential);
        let ctx = MaterializeContext {
            subset: &data.subset,
            incremental: &incremental,
            sparse_indexing: SparseArrayIndexingType::Indices,
            parallelism: Parallelism::Sequential,
        };

        // bin 0 holds NaN (Min mode); 0.0 and 0.2 fall into bin 1
        let dense =
            feature_non_default_mask(&data, &registry, FeatureIdxWithType::float(0), &ctx).unwrap();
        assert_eq!(dense.blocks, vec![(0, 0b11011)]);

        // NaN in Max mode is non-default
        let sparse =
            feature_non_default_mask(&data, &registry, FeatureIdxWithType::float(1), &ctx).unwrap();
        assert_eq!(sparse.blocks, vec![(0, 0b10010)]);
        assert_eq!(sparse.non_default_count, 2);
    }

    #[test]
    fn test_subset_changes_mask() {
        let layout = FeaturesLayout::all_float(1);
        let registry = QuantizationRegistry::new(&layout, &[], FloatBinarization::default());
        registry.set_quantization(0, Quantization::new(vec![0.5]), NanMode::Forbidden).unwrap();
        let data = RawObjectsData::new(layout, 3)
            .with_float(0, RawValues::Dense(vec![1.0, 0.0, 0.0, 1.0]))
            .with_subset(SubsetIndexing::Indexed(vec![3, 2, 0]));
        let incremental = IncrementalDenseIndexing::new(&data.subset, true, Parallelism::Parallel);
        let ctx = MaterializeContext {
            subset: &data.subset,
            incremental: &incremental,
            sparse_indexing: SparseArrayIndexingType::Indices,
            parallelism: Parallelism::Parallel,
        };
        let mask =
            feature_non_default_mask(&data, &registry, FeatureIdxWithType::float(0), &ctx).unwrap();
        assert_eq!(mask.blocks, vec![(0, 0b101)]);
    }
}
