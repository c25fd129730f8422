//! Border building for float features.
//!
//! One sample of objects is drawn per dataset and shared by every float
//! feature that still lacks borders. Borders are searched on the sampled
//! finite values; NaNs get a dedicated extreme bin unless they are forbidden.
//! Results are committed to the registry only once fully computed.

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::debug;

use crate::data::columns::{RawObjectsData, RawValues};
use crate::data::indexing::{InvertedIndexing, SubsetIndexing};
use crate::data::layout::FeatureType;
use crate::data::registry::{FloatBinarization, NanMode, QuantizationRegistry};
use crate::data::split::{
    DefaultValue, Quantization, best_split, calc_default_quantized_bin,
    calc_memory_for_find_best_split, calc_sample_size,
};
use crate::data::storage::BitWidth;
use crate::error::{QuantizationError, Result};

// =============================================================================
// Sampling
// =============================================================================

/// Objects used for border search, in the logical space of one dataset.
#[derive(Clone, Debug)]
pub struct BorderSample {
    /// Sampled logical positions, ascending.
    pub subset: SubsetIndexing,
    /// Logical position to sample position, for sparse columns.
    pub inverted: InvertedIndexing,
}

impl BorderSample {
    /// Take the first `max_subset_size` objects of shuffled data, a uniform
    /// random subset seeded with `seed` otherwise.
    pub fn new(data: &RawObjectsData, max_subset_size: usize, seed: u64) -> Self {
        let object_count = data.object_count();
        let sample_size = calc_sample_size(object_count, max_subset_size);

        let subset = if data.is_shuffled || sample_size == object_count {
            SubsetIndexing::Full(sample_size as u32)
        } else {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            let mut indices: Vec<u32> =
                rand::seq::index::sample(&mut rng, object_count, sample_size)
                    .into_iter()
                    .map(|idx| idx as u32)
                    .collect();
            indices.sort_unstable();
            SubsetIndexing::Indexed(indices)
        };
        let inverted = subset.invert(object_count);
        Self { subset, inverted }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.subset.size()
    }

    /// Sampled values of one float column.
    ///
    /// Sparse columns return only their stored values that fall into the
    /// sample plus the number of sampled objects holding the default.
    pub fn float_values(
        &self,
        values: &RawValues<f32>,
        data_subset: &SubsetIndexing,
    ) -> (Vec<f32>, Option<DefaultValue<f32>>) {
        match values {
            RawValues::Dense(dense) => {
                let mut sampled = Vec::with_capacity(self.size());
                self.subset.for_each(|_, logical| {
                    sampled.push(dense[data_subset.get(logical as usize) as usize]);
                });
                (sampled, None)
            }
            RawValues::Sparse(sparse) => {
                let sampled: Vec<f32> = sparse
                    .indices
                    .iter()
                    .zip(&sparse.values)
                    .filter(|&(&idx, _)| self.inverted.get(idx as usize).is_some())
                    .map(|(_, &value)| value)
                    .collect();
                let default_count = (self.size() - sampled.len()) as u64;
                let default = (default_count > 0)
                    .then(|| DefaultValue::new(sparse.default_value, default_count));
                (sampled, default)
            }
        }
    }
}

// =============================================================================
// Borders and NaN Mode
// =============================================================================

/// Search borders for one sampled float feature and decide its NaN mode.
///
/// The NaN mode becomes `Forbidden` when the sample has no NaNs, so NaNs met
/// later are rejected unless explicitly allowed.
pub fn calc_quantization_and_nan_mode(
    mut values: Vec<f32>,
    mut default_value: Option<DefaultValue<f32>>,
    binarization: FloatBinarization,
    initial_borders: Option<&[f32]>,
    default_value_fraction: Option<f32>,
    flat_idx: usize,
) -> Result<(Quantization, NanMode)> {
    let stored_len = values.len();
    values.retain(|v| !v.is_nan());
    let mut nan_count = (stored_len - values.len()) as u64;
    if let Some(default) = default_value.filter(|d| d.value.is_nan()) {
        nan_count += default.count;
        default_value = None;
    }

    let nan_mode = if nan_count > 0 {
        if binarization.nan_mode == NanMode::Forbidden {
            return Err(QuantizationError::NanForbidden { feature: flat_idx });
        }
        binarization.nan_mode
    } else {
        NanMode::Forbidden
    };

    let max_borders = if nan_count > 0 {
        binarization.border_count as usize - 1
    } else {
        binarization.border_count as usize
    };

    let mut borders = best_split(
        values.clone(),
        default_value,
        max_borders,
        binarization.border_selection,
        initial_borders,
    );
    match nan_mode {
        NanMode::Min => borders.insert(0, f32::MIN),
        NanMode::Max => borders.push(f32::MAX),
        NanMode::Forbidden => {}
    }

    let default_quantized_bin = default_value_fraction.and_then(|fraction| {
        let nan_bin = match nan_mode {
            NanMode::Max => borders.len() as u32,
            _ => 0,
        };
        let extra = (nan_count > 0).then_some((nan_bin, nan_count));
        calc_default_quantized_bin(&borders, &values, default_value, extra, fraction)
    });

    Ok((
        Quantization {
            borders,
            default_quantized_bin,
        },
        nan_mode,
    ))
}

/// Compute and commit borders of one float feature.
///
/// Features left without borders are marked ignored. Returns whether the
/// feature is still available.
pub fn calc_borders_for_feature(
    data: &RawObjectsData,
    registry: &QuantizationRegistry,
    float_idx: usize,
    sample: &BorderSample,
    default_value_fraction: Option<f32>,
) -> Result<bool> {
    let flat_idx = registry.external_idx(float_idx, FeatureType::Float);
    let values = data
        .float_features
        .get(float_idx)
        .and_then(Option::as_ref)
        .ok_or_else(|| {
            QuantizationError::internal(format!("no source column for float feature {float_idx}"))
        })?;

    let (sampled, default_value) = sample.float_values(values, &data.subset);
    let (quantization, nan_mode) = calc_quantization_and_nan_mode(
        sampled,
        default_value,
        registry.float_binarization(float_idx),
        registry.initial_borders(float_idx),
        default_value_fraction,
        flat_idx,
    )?;

    let is_empty = quantization.borders.is_empty();
    registry.set_quantization(float_idx, quantization, nan_mode)?;
    if is_empty {
        debug!("Float Feature #{flat_idx} is empty");
        registry.ignore_feature(flat_idx);
    }
    Ok(!is_empty)
}

// =============================================================================
// Memory Estimates
// =============================================================================

/// Scratch memory of border search for one float feature on `sample_size` objects.
pub fn estimate_border_memory(binarization: &FloatBinarization, sample_size: usize) -> u64 {
    let sampled = sample_size as u64 * size_of::<f32>() as u64;
    sampled
        + calc_memory_for_find_best_split(
            binarization.border_count as usize,
            sample_size,
            None,
            binarization.border_selection,
        )
}

/// Worst-case size of a perfect hash built from `value_count` values.
pub fn estimate_perfect_hash_memory(value_count: usize) -> u64 {
    // key, bin and count plus hash table overhead
    value_count as u64 * 32
}

/// Output size of one quantized column.
pub fn estimate_column_memory(
    object_count: usize,
    width: BitWidth,
    stored_values: Option<usize>,
) -> u64 {
    match stored_values {
        Some(stored) => stored as u64 * (size_of::<u32>() as u64 + width.size_bytes() as u64),
        None => object_count as u64 * width.size_bytes() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::columns::SparseValues;
    use crate::data::layout::FeaturesLayout;
    use crate::data::split::BorderSelectionType;
    use approx::assert_relative_eq;

    fn binarization(border_count: u32, nan_mode: NanMode) -> FloatBinarization {
        FloatBinarization::new(border_count, BorderSelectionType::Median, nan_mode)
    }

    #[test]
    fn test_nan_min_adds_lowest_border() {
        let mode = binarization(2, NanMode::Min);
        let (quantization, nan_mode) =
            calc_quantization_and_nan_mode(vec![1.0, 2.0, f32::NAN, 3.0], None, mode, None, None, 0)
                .unwrap();
        assert_eq!(nan_mode, NanMode::Min);
        assert_eq!(quantization.borders.len(), 2);
        assert_eq!(quantization.borders[0], f32::MIN);
        assert_relative_eq!(quantization.borders[1], 1.5);
    }

    #[test]
    fn test_nan_max_adds_highest_border() {
        let mode = binarization(4, NanMode::Max);
        let (quantization, nan_mode) =
            calc_quantization_and_nan_mode(vec![f32::NAN, 1.0, 2.0], None, mode, None, None, 0)
                .unwrap();
        assert_eq!(nan_mode, NanMode::Max);
        assert_eq!(quantization.borders.last().copied(), Some(f32::MAX));
    }

    #[test]
    fn test_no_nans_forbids_nans() {
        let mode = binarization(4, NanMode::Min);
        let (_, nan_mode) =
            calc_quantization_and_nan_mode(vec![1.0, 2.0], None, mode, None, None, 0).unwrap();
        assert_eq!(nan_mode, NanMode::Forbidden);
    }

    #[test]
    fn test_nan_forbidden_fails() {
        let mode = binarization(4, NanMode::Forbidden);
        let result = calc_quantization_and_nan_mode(vec![1.0, f32::NAN], None, mode, None, None, 7);
        assert!(matches!(result, Err(QuantizationError::NanForbidden { feature: 7 })));
    }

    #[test]
    fn test_nan_sparse_default_counts_as_nan() {
        let default = Some(DefaultValue::new(f32::NAN, 10));
        let mode = binarization(4, NanMode::Min);
        let (quantization, nan_mode) =
            calc_quantization_and_nan_mode(vec![1.0, 2.0], default, mode, None, Some(0.5), 0)
                .unwrap();
        assert_eq!(nan_mode, NanMode::Min);
        let default_bin = quantization.default_quantized_bin.unwrap();
        assert_eq!(default_bin.idx, 0);
    }

    #[test]
    fn test_sparse_default_bin() {
        let default = Some(DefaultValue::new(0.0, 90));
        let mode = binarization(8, NanMode::Min);
        let (quantization, _) =
            calc_quantization_and_nan_mode(vec![1.0, 2.0, 3.0], default, mode, None, Some(0.8), 0)
                .unwrap();
        let default_bin = quantization.default_quantized_bin.unwrap();
        assert_eq!(default_bin.idx, 0);
        assert!(default_bin.fraction > 0.9);
    }

    #[test]
    fn test_sample_shuffled_takes_prefix() {
        let data = RawObjectsData::new(FeaturesLayout::all_float(1), 10).shuffled(true);
        let sample = BorderSample::new(&data, 4, 0);
        assert_eq!(sample.subset, SubsetIndexing::Full(4));
    }

    #[test]
    fn test_sample_is_seeded() {
        let data = RawObjectsData::new(FeaturesLayout::all_float(1), 1000);
        let a = BorderSample::new(&data, 100, 42);
        let b = BorderSample::new(&data, 100, 42);
        assert_eq!(a.subset, b.subset);
        assert_eq!(a.size(), 100);
        let indices = a.subset.to_vec();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sparse_sample_counts_defaults() {
        let data = RawObjectsData::new(FeaturesLayout::all_float(1), 6);
        let sample = BorderSample::new(&data, 6, 0);
        let values = RawValues::Sparse(SparseValues::new(vec![1, 4], vec![5.0, 6.0], 0.0, 6));
        let (sampled, default) = sample.float_values(&values, &data.subset);
        assert_eq!(sampled, vec![5.0, 6.0]);
        assert_eq!(default, Some(DefaultValue::new(0.0, 4)));
    }

    #[test]
    fn test_constant_feature_is_ignored() {
        let layout = FeaturesLayout::all_float(2);
        let registry = QuantizationRegistry::new(&layout, &[], FloatBinarization::default());
        let data = RawObjectsData::new(layout, 3)
            .with_float(0, RawValues::Dense(vec![1.0, 1.0, 1.0]))
            .with_float(1, RawValues::Dense(vec![1.0, 2.0, 3.0]));
        let sample = BorderSample::new(&data, 100, 0);

        assert!(!calc_borders_for_feature(&data, &registry, 0, &sample, None).unwrap());
        assert!(calc_borders_for_feature(&data, &registry, 1, &sample, None).unwrap());
        assert!(registry.is_ignored(0));
        assert!(registry.has_borders(0) && registry.has_nan_mode(0));
        assert_eq!(registry.float_features_without_borders(), Vec::<usize>::new());
    }
}
