//! Value quantizers: map one raw value to one bin.
//!
//! Quantizers snapshot the registry entry of their feature under one read
//! lock at construction, so a burst of constructions during parallel
//! scheduling contends the lock once per feature, not once per value.

use std::sync::Arc;

use crate::data::columns::{RawObjectsData, RawValues};
use crate::data::indexing::SubsetIndexing;
use crate::data::layout::FeatureType;
use crate::data::perfect_hash::CatFeaturePerfectHash;
use crate::data::registry::{NanMode, QuantizationRegistry};
use crate::data::split::{Quantization, bin_index};
use crate::data::storage::BitWidth;
use crate::error::{QuantizationError, Result};

/// Per-feature mapping from raw value to bin index.
pub trait ValueQuantizer: Send + Sync {
    type Value: Copy + Send + Sync + 'static;

    /// Width needed to store every bin of this feature.
    fn bit_width(&self) -> BitWidth;

    fn quantize(&self, value: Self::Value) -> Result<u32>;

    /// Bin used as shared default of sparse storage, if the feature has one.
    fn default_bin(&self) -> Option<u32>;
}

// =============================================================================
// Float
// =============================================================================

/// Quantizer of a float feature: binary search over ascending borders.
#[derive(Clone, Debug)]
pub struct FloatQuantizer {
    feature_idx: usize,
    flat_idx: usize,
    nan_mode: NanMode,
    allow_nans: bool,
    quantization: Arc<Quantization>,
}

impl FloatQuantizer {
    pub fn new(registry: &QuantizationRegistry, float_idx: usize) -> Result<Self> {
        let (quantization, nan_mode) = registry.float_snapshot(float_idx)?;
        Ok(Self {
            feature_idx: float_idx,
            flat_idx: registry.external_idx(float_idx, FeatureType::Float),
            nan_mode,
            allow_nans: nan_mode != NanMode::Forbidden || registry.allow_nans_in_test_only(),
            quantization,
        })
    }

    #[inline]
    pub fn borders(&self) -> &[f32] {
        &self.quantization.borders
    }

    pub fn nan_mode(&self) -> NanMode {
        self.nan_mode
    }

    /// Per-type index of the feature.
    pub fn feature_idx(&self) -> usize {
        self.feature_idx
    }
}

impl ValueQuantizer for FloatQuantizer {
    type Value = f32;

    fn bit_width(&self) -> BitWidth {
        BitWidth::for_border_count(self.borders().len())
    }

    #[inline]
    fn quantize(&self, value: f32) -> Result<u32> {
        if value.is_nan() {
            if !self.allow_nans {
                return Err(QuantizationError::NanInTestOnly { feature: self.flat_idx });
            }
            return Ok(match self.nan_mode {
                NanMode::Max => self.borders().len() as u32,
                _ => 0,
            });
        }
        Ok(bin_index(self.borders(), value))
    }

    fn default_bin(&self) -> Option<u32> {
        self.quantization.default_quantized_bin.map(|bin| bin.idx)
    }
}

// =============================================================================
// Categorical
// =============================================================================

/// Quantizer of a categorical feature: perfect hash lookup.
#[derive(Clone, Debug)]
pub struct CategoricalQuantizer {
    feature_idx: usize,
    flat_idx: usize,
    hash: Arc<CatFeaturePerfectHash>,
}

impl CategoricalQuantizer {
    pub fn new(registry: &QuantizationRegistry, cat_idx: usize) -> Result<Self> {
        Ok(Self {
            feature_idx: cat_idx,
            flat_idx: registry.external_idx(cat_idx, FeatureType::Categorical),
            hash: registry.perfect_hash(cat_idx)?,
        })
    }

    pub fn feature_idx(&self) -> usize {
        self.feature_idx
    }

    pub fn perfect_hash(&self) -> &CatFeaturePerfectHash {
        &self.hash
    }
}

impl ValueQuantizer for CategoricalQuantizer {
    type Value = u32;

    fn bit_width(&self) -> BitWidth {
        BitWidth::U32
    }

    #[inline]
    fn quantize(&self, value: u32) -> Result<u32> {
        self.hash.find(value).map(|hashed| hashed.bin).ok_or_else(|| {
            QuantizationError::internal(format!(
                "categorical feature #{}: value {value} missing from perfect hash",
                self.flat_idx
            ))
        })
    }

    fn default_bin(&self) -> Option<u32> {
        self.hash.default_map().map(|default| default.dst.bin)
    }
}

// =============================================================================
// External Columns
// =============================================================================

/// Quantizer of either numeric kind.
#[derive(Clone, Debug)]
pub enum AnyQuantizer {
    Float(FloatQuantizer),
    Categorical(CategoricalQuantizer),
}

impl AnyQuantizer {
    pub fn bit_width(&self) -> BitWidth {
        match self {
            Self::Float(q) => q.bit_width(),
            Self::Categorical(q) => q.bit_width(),
        }
    }
}

/// Column quantized on demand from the raw data it shares.
#[derive(Clone, Debug)]
pub struct ExternalColumn {
    source: Arc<RawObjectsData>,
    quantizer: AnyQuantizer,
}

impl ExternalColumn {
    pub fn new(source: Arc<RawObjectsData>, quantizer: AnyQuantizer) -> Self {
        Self { source, quantizer }
    }

    pub fn quantizer(&self) -> &AnyQuantizer {
        &self.quantizer
    }

    /// Bin of every object.
    pub fn to_bins(&self) -> Result<Vec<u32>> {
        let subset = &self.source.subset;
        match &self.quantizer {
            AnyQuantizer::Float(q) => {
                let values = column_of(&self.source.float_features, q.feature_idx())?;
                quantize_all(values, q, subset)
            }
            AnyQuantizer::Categorical(q) => {
                let values = column_of(&self.source.cat_features, q.feature_idx())?;
                quantize_all(values, q, subset)
            }
        }
    }
}

fn column_of<T>(columns: &[Option<RawValues<T>>], idx: usize) -> Result<&RawValues<T>> {
    columns
        .get(idx)
        .and_then(Option::as_ref)
        .ok_or_else(|| {
            QuantizationError::internal(format!("external column {idx} has no source data"))
        })
}

fn quantize_all<Q: ValueQuantizer>(
    values: &RawValues<Q::Value>,
    quantizer: &Q,
    subset: &SubsetIndexing,
) -> Result<Vec<u32>> {
    values
        .to_logical_vec(subset)
        .into_iter()
        .map(|value| quantizer.quantize(value))
        .collect()
}
