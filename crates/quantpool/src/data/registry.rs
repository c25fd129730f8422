//! Quantization registry: borders, NaN modes and perfect hashes shared by
//! every dataset quantized with the same binning.
//!
//! Lock discipline: all reads take the shared lock; writes take the exclusive
//! lock only to commit values computed beforehand. Borders and the NaN mode of
//! a float feature are committed together and never overwritten.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::data::layout::{FeatureType, FeaturesLayout};
use crate::data::perfect_hash::CatFeaturePerfectHash;
use crate::data::split::{BorderSelectionType, Quantization};
use crate::data::text::TextDigitizer;
use crate::error::{QuantizationError, Result};

/// Where NaN values of a float feature go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NanMode {
    /// NaNs are an error.
    Forbidden,
    /// NaNs go to bin 0, below every finite value.
    #[default]
    Min,
    /// NaNs go to the last bin, above every finite value.
    Max,
}

/// Border settings of one float feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloatBinarization {
    pub border_count: u32,
    pub border_selection: BorderSelectionType,
    pub nan_mode: NanMode,
}

impl Default for FloatBinarization {
    fn default() -> Self {
        Self {
            border_count: 254,
            border_selection: BorderSelectionType::Median,
            nan_mode: NanMode::Min,
        }
    }
}

impl FloatBinarization {
    pub fn new(
        border_count: u32,
        border_selection: BorderSelectionType,
        nan_mode: NanMode,
    ) -> Self {
        Self {
            border_count,
            border_selection,
            nan_mode,
        }
    }

    fn validate(&self, feature: usize) -> Result<()> {
        if self.border_count == 0 || self.border_count > u16::MAX as u32 {
            return Err(QuantizationError::InvalidBinarization {
                feature,
                reason: format!("border_count must be in [1, 65535], got {}", self.border_count),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    layout: FeaturesLayout,
    quantizations: Vec<Option<Arc<Quantization>>>,
    nan_modes: Vec<Option<NanMode>>,
    perfect_hashes: Vec<Option<Arc<CatFeaturePerfectHash>>>,
}

/// Shared quantization state, one per binning.
///
/// Float and categorical entries are keyed by per-type feature index.
#[derive(Debug)]
pub struct QuantizationRegistry {
    default_binarization: FloatBinarization,
    per_feature_binarization: HashMap<usize, FloatBinarization>,
    initial_borders: HashMap<usize, Vec<f32>>,
    allow_nans_in_test_only: bool,
    text_digitizers: HashMap<usize, Arc<dyn TextDigitizer>>,
    state: RwLock<RegistryState>,
}

impl QuantizationRegistry {
    /// Registry for features laid out as `layout`; `ignored_features` are flat indices.
    pub fn new(
        layout: &FeaturesLayout,
        ignored_features: &[usize],
        default_binarization: FloatBinarization,
    ) -> Self {
        let mut layout = layout.clone();
        for &flat_idx in ignored_features {
            layout.ignore_external_feature(flat_idx);
        }
        let state = RegistryState {
            quantizations: vec![None; layout.float_feature_count()],
            nan_modes: vec![None; layout.float_feature_count()],
            perfect_hashes: vec![None; layout.cat_feature_count()],
            layout,
        };
        Self {
            default_binarization,
            per_feature_binarization: HashMap::new(),
            initial_borders: HashMap::new(),
            allow_nans_in_test_only: false,
            text_digitizers: HashMap::new(),
            state: RwLock::new(state),
        }
    }

    /// Override the binarization of one float feature (flat index).
    pub fn with_feature_binarization(
        mut self,
        flat_idx: usize,
        binarization: FloatBinarization,
    ) -> Result<Self> {
        let float_idx = self.float_idx_of(flat_idx)?;
        binarization.validate(flat_idx)?;
        self.per_feature_binarization.insert(float_idx, binarization);
        Ok(self)
    }

    /// Start border search for a float feature (flat index) from these borders.
    pub fn with_initial_borders(mut self, flat_idx: usize, borders: Vec<f32>) -> Result<Self> {
        let float_idx = self.float_idx_of(flat_idx)?;
        self.initial_borders.insert(float_idx, borders);
        Ok(self)
    }

    pub fn with_allow_nans_in_test_only(mut self, allow: bool) -> Self {
        self.allow_nans_in_test_only = allow;
        self
    }

    /// Register the digitizer of a text feature (flat index).
    pub fn with_text_digitizer(
        mut self,
        flat_idx: usize,
        digitizer: Arc<dyn TextDigitizer>,
    ) -> Result<Self> {
        let layout = &self.state.get_mut().layout;
        let idx = layout.meta(flat_idx).map(|_| layout.internal_idx(flat_idx));
        match idx {
            Some(idx) if idx.feature_type == FeatureType::Text => {
                self.text_digitizers.insert(idx.feature_idx, digitizer);
                Ok(self)
            }
            _ => Err(QuantizationError::InvalidBinarization {
                feature: flat_idx,
                reason: "not a text feature".into(),
            }),
        }
    }

    /// Validate the default binarization.
    pub fn validate(&self) -> Result<()> {
        self.default_binarization.validate(0).map_err(|_| {
            QuantizationError::InvalidOptions(format!(
                "default border_count must be in [1, 65535], got {}",
                self.default_binarization.border_count
            ))
        })
    }

    fn float_idx_of(&self, flat_idx: usize) -> Result<usize> {
        let state = self.state.read();
        match state.layout.meta(flat_idx).map(|_| state.layout.internal_idx(flat_idx)) {
            Some(idx) if idx.feature_type == FeatureType::Float => Ok(idx.feature_idx),
            _ => Err(QuantizationError::InvalidBinarization {
                feature: flat_idx,
                reason: "not a float feature".into(),
            }),
        }
    }

    // =========================================================================
    // Layout
    // =========================================================================

    /// Snapshot of the layout with the ignored flags known so far.
    pub fn layout(&self) -> FeaturesLayout {
        self.state.read().layout.clone()
    }

    pub fn is_ignored(&self, flat_idx: usize) -> bool {
        self.state.read().layout.is_ignored(flat_idx)
    }

    pub fn ignore_feature(&self, flat_idx: usize) {
        self.state.write().layout.ignore_external_feature(flat_idx);
    }

    pub fn external_idx(&self, feature_idx: usize, feature_type: FeatureType) -> usize {
        self.state.read().layout.external_idx(feature_idx, feature_type)
    }

    pub fn is_compatible_with(&self, layout: &FeaturesLayout) -> bool {
        self.state.read().layout.is_compatible_with(layout)
    }

    // =========================================================================
    // Float features
    // =========================================================================

    pub fn float_binarization(&self, float_idx: usize) -> FloatBinarization {
        self.per_feature_binarization
            .get(&float_idx)
            .copied()
            .unwrap_or(self.default_binarization)
    }

    pub fn default_binarization(&self) -> FloatBinarization {
        self.default_binarization
    }

    pub fn initial_borders(&self, float_idx: usize) -> Option<&[f32]> {
        self.initial_borders.get(&float_idx).map(Vec::as_slice)
    }

    pub fn allow_nans_in_test_only(&self) -> bool {
        self.allow_nans_in_test_only
    }

    pub fn has_borders(&self, float_idx: usize) -> bool {
        self.state.read().quantizations.get(float_idx).is_some_and(Option::is_some)
    }

    pub fn has_nan_mode(&self, float_idx: usize) -> bool {
        self.state.read().nan_modes.get(float_idx).is_some_and(Option::is_some)
    }

    pub fn quantization(&self, float_idx: usize) -> Result<Arc<Quantization>> {
        self.state
            .read()
            .quantizations
            .get(float_idx)
            .cloned()
            .flatten()
            .ok_or_else(|| {
                QuantizationError::internal(format!("no borders for float feature {float_idx}"))
            })
    }

    pub fn nan_mode(&self, float_idx: usize) -> Result<NanMode> {
        self.state
            .read()
            .nan_modes
            .get(float_idx)
            .copied()
            .flatten()
            .ok_or_else(|| {
                QuantizationError::internal(format!("no nan mode for float feature {float_idx}"))
            })
    }

    /// Borders and NaN mode read under one lock acquisition.
    pub fn float_snapshot(&self, float_idx: usize) -> Result<(Arc<Quantization>, NanMode)> {
        let state = self.state.read();
        match (
            state.quantizations.get(float_idx).cloned().flatten(),
            state.nan_modes.get(float_idx).copied().flatten(),
        ) {
            (Some(quantization), Some(nan_mode)) => Ok((quantization, nan_mode)),
            (None, None) => Err(QuantizationError::internal(format!(
                "no borders for float feature {float_idx}"
            ))),
            _ => Err(QuantizationError::internal(format!(
                "borders and nan mode of float feature {float_idx} are not set together"
            ))),
        }
    }

    /// Commit borders and NaN mode of a float feature. Both must be unset.
    pub fn set_quantization(
        &self,
        float_idx: usize,
        quantization: Quantization,
        nan_mode: NanMode,
    ) -> Result<()> {
        let mut state = self.state.write();
        let (Some(borders_slot), Some(nan_slot)) = (
            state.quantizations.get(float_idx).cloned(),
            state.nan_modes.get(float_idx).copied(),
        ) else {
            return Err(QuantizationError::internal(format!(
                "float feature {float_idx} out of range"
            )));
        };
        if borders_slot.is_some() || nan_slot.is_some() {
            return Err(QuantizationError::internal(format!(
                "borders of float feature {float_idx} are already set"
            )));
        }
        state.quantizations[float_idx] = Some(Arc::new(quantization));
        state.nan_modes[float_idx] = Some(nan_mode);
        Ok(())
    }

    /// Float features that are not ignored and still lack borders.
    pub fn float_features_without_borders(&self) -> Vec<usize> {
        let state = self.state.read();
        state
            .layout
            .available_features(FeatureType::Float)
            .filter(|&idx| state.quantizations[idx].is_none())
            .collect()
    }

    // =========================================================================
    // Categorical features
    // =========================================================================

    pub fn has_perfect_hash(&self, cat_idx: usize) -> bool {
        self.state.read().perfect_hashes.get(cat_idx).is_some_and(Option::is_some)
    }

    pub fn perfect_hash(&self, cat_idx: usize) -> Result<Arc<CatFeaturePerfectHash>> {
        self.state
            .read()
            .perfect_hashes
            .get(cat_idx)
            .cloned()
            .flatten()
            .ok_or_else(|| {
                QuantizationError::internal(format!(
                    "no perfect hash for categorical feature {cat_idx}"
                ))
            })
    }

    /// Replace the perfect hash with `extend(current)`.
    ///
    /// The write lock is held across `extend`, so concurrent updates of one
    /// feature never drop each other's values.
    pub fn update_perfect_hash<R>(
        &self,
        cat_idx: usize,
        extend: impl FnOnce(Option<&CatFeaturePerfectHash>) -> (CatFeaturePerfectHash, R),
    ) -> Result<R> {
        let mut state = self.state.write();
        let slot = state
            .perfect_hashes
            .get_mut(cat_idx)
            .ok_or_else(|| {
                QuantizationError::internal(format!("categorical feature {cat_idx} out of range"))
            })?;
        let (hash, result) = extend(slot.as_deref());
        *slot = Some(Arc::new(hash));
        Ok(result)
    }

    // =========================================================================
    // Text features
    // =========================================================================

    pub fn text_digitizer(&self, text_idx: usize) -> Option<Arc<dyn TextDigitizer>> {
        self.text_digitizers.get(&text_idx).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::layout::FeatureMeta;
    use crate::data::perfect_hash::update_perfect_hash_and_maybe_quantize;
    use crate::utils::Parallelism;

    fn registry() -> QuantizationRegistry {
        let layout = FeaturesLayout::new(vec![
            FeatureMeta::float(),
            FeatureMeta::categorical(),
            FeatureMeta::float(),
        ]);
        QuantizationRegistry::new(&layout, &[2], FloatBinarization::default())
    }

    #[test]
    fn test_write_once() {
        let registry = registry();
        assert!(!registry.has_borders(0));
        registry
            .set_quantization(0, Quantization::new(vec![1.0]), NanMode::Forbidden)
            .unwrap();
        assert!(registry.has_borders(0) && registry.has_nan_mode(0));
        assert_eq!(registry.nan_mode(0).unwrap(), NanMode::Forbidden);

        let again = registry.set_quantization(0, Quantization::new(vec![2.0]), NanMode::Min);
        assert!(matches!(again, Err(QuantizationError::Internal(_))));
        assert_eq!(registry.quantization(0).unwrap().borders, vec![1.0]);
    }

    #[test]
    fn test_missing_entries_are_internal_errors() {
        let registry = registry();
        assert!(registry.quantization(0).unwrap_err().is_internal());
        assert!(registry.perfect_hash(0).unwrap_err().is_internal());
        assert!(registry.float_snapshot(0).unwrap_err().is_internal());
    }

    #[test]
    fn test_ignored_features_and_pending_borders() {
        let registry = registry();
        assert!(registry.is_ignored(2));
        assert_eq!(registry.float_features_without_borders(), vec![0]);
    }

    #[test]
    fn test_per_feature_binarization() {
        let custom = FloatBinarization::new(8, BorderSelectionType::Uniform, NanMode::Max);
        let registry = registry().with_feature_binarization(2, custom).unwrap();
        assert_eq!(registry.float_binarization(1), custom);
        assert_eq!(registry.float_binarization(0).border_count, 254);

        let not_float = registry.with_feature_binarization(1, custom);
        assert!(matches!(
            not_float,
            Err(QuantizationError::InvalidBinarization { feature: 1, .. })
        ));
    }

    #[test]
    fn test_zero_border_count_rejected() {
        let bad = FloatBinarization::new(0, BorderSelectionType::Median, NanMode::Min);
        assert!(registry().with_feature_binarization(0, bad).is_err());
    }

    #[test]
    fn test_concurrent_perfect_hash_updates_keep_every_value() {
        let layout = FeaturesLayout::new(vec![FeatureMeta::categorical()]);
        let registry = QuantizationRegistry::new(&layout, &[], FloatBinarization::default());
        assert!(!registry.has_perfect_hash(0));
        Parallelism::Parallel
            .maybe_par_try_for_each(0..32u32, |value| {
                registry.update_perfect_hash(0, |current| {
                    let update = update_perfect_hash_and_maybe_quantize(
                        current,
                        &[value],
                        None,
                        false,
                        None,
                        false,
                        false,
                    );
                    (update.hash, ())
                })
            })
            .unwrap();
        assert!(registry.has_perfect_hash(0));
        let hash = registry.perfect_hash(0).unwrap();
        assert_eq!(hash.len(), 32);
        assert!((0..32u32).all(|value| hash.find(value).is_some()));
    }

    #[test]
    fn test_concurrent_readers_see_complete_entries() {
        let layout = FeaturesLayout::all_float(64);
        let registry = QuantizationRegistry::new(&layout, &[], FloatBinarization::default());
        Parallelism::Parallel
            .maybe_par_try_for_each(0..64usize, |idx| {
                registry.set_quantization(idx, Quantization::new(vec![idx as f32]), NanMode::Max)?;
                let (quantization, nan_mode) = registry.float_snapshot(idx)?;
                assert_eq!(quantization.borders, vec![idx as f32]);
                assert_eq!(nan_mode, NanMode::Max);
                Ok(())
            })
            .unwrap();
    }
}
