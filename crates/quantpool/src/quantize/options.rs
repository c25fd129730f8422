//! Quantization options with builder pattern.
//!
//! # Example
//!
//! ```
//! use quantpool::{ExclusiveBundlingOptions, QuantizationOptions};
//!
//! // All defaults
//! let options = QuantizationOptions::builder().build().unwrap();
//! assert!(options.cpu_compatible_format);
//!
//! // Tight memory budget, no bundling
//! let options = QuantizationOptions::builder()
//!     .cpu_ram_limit(1 << 30)
//!     .bundle_exclusive_features(false)
//!     .exclusive_bundling(ExclusiveBundlingOptions::disabled())
//!     .build()
//!     .unwrap();
//! ```

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::data::bundling::{ExclusiveBundlingOptions, FeatureGroupingOptions};
use crate::data::storage::SparseArrayIndexingType;
use crate::error::{QuantizationError, Result};

/// Settings of one quantization run.
///
/// Binarization settings of float features live in the
/// [`QuantizationRegistry`](crate::QuantizationRegistry), which outlives a
/// single run.
#[derive(Clone, Debug, PartialEq, Builder, Serialize, Deserialize)]
#[builder(derive(Clone, Debug), finish_fn(vis = "", name = __build_internal))]
#[serde(default)]
pub struct QuantizationOptions {
    // === Target format ===
    /// Keep bins resident for CPU training. Default: true.
    #[builder(default = true)]
    pub cpu_compatible_format: bool,

    /// Output is consumed by GPU training. Default: true.
    #[builder(default = true)]
    pub gpu_compatible_format: bool,

    // === Resources ===
    /// Resident memory ceiling in bytes. Default: unlimited.
    #[builder(default = u64::MAX)]
    pub cpu_ram_limit: u64,

    /// Run tasks larger than the free quota alone instead of failing. Default: true.
    #[builder(default = true)]
    pub lenient_scheduling: bool,

    /// Thread count: 0 = all cores, 1 = sequential. Default: 0.
    #[builder(default)]
    pub n_threads: usize,

    // === Border search ===
    /// Objects sampled for border search. Default: 200 000.
    #[builder(default = 200_000)]
    pub max_subset_size_for_build_borders: usize,

    /// Seed of the border sample. Default: 0.
    #[builder(default)]
    pub random_seed: u64,

    // === Aggregates ===
    /// Default: true.
    #[builder(default = true)]
    pub bundle_exclusive_features: bool,

    #[builder(default)]
    pub exclusive_bundling: ExclusiveBundlingOptions,

    /// Default: true.
    #[builder(default = true)]
    pub pack_binary_features: bool,

    /// Default: false.
    #[builder(default)]
    pub group_features: bool,

    #[builder(default)]
    pub feature_grouping: FeatureGroupingOptions,

    // === Sparse storage ===
    /// Share of objects a bin must hold to become the shared default of a
    /// sparse column. `None` keeps every column dense.
    pub default_value_fraction_to_enable_sparse_storage: Option<f32>,

    #[builder(default)]
    pub sparse_array_indexing: SparseArrayIndexingType,
}

impl<S: quantization_options_builder::IsComplete> QuantizationOptionsBuilder<S> {
    /// Build and validate the options.
    ///
    /// # Errors
    ///
    /// [`QuantizationError::InvalidOptions`] when neither output format is
    /// requested or a fraction lies outside its range.
    pub fn build(self) -> Result<QuantizationOptions> {
        let options = self.__build_internal();
        options.validate()?;
        Ok(options)
    }
}

impl Default for QuantizationOptions {
    fn default() -> Self {
        Self::builder().__build_internal()
    }
}

impl QuantizationOptions {
    /// Output for CPU training only.
    pub fn cpu() -> Self {
        Self {
            gpu_compatible_format: false,
            ..Default::default()
        }
    }

    /// Output for GPU training only: no aggregates, columns may stay external.
    pub fn gpu() -> Self {
        Self {
            cpu_compatible_format: false,
            bundle_exclusive_features: false,
            pack_binary_features: false,
            ..Default::default()
        }
    }

    /// Check option ranges. Options read from JSON are validated here too.
    pub fn validate(&self) -> Result<()> {
        if !self.cpu_compatible_format && !self.gpu_compatible_format {
            return Err(invalid(
                "at least one of cpu_compatible_format and gpu_compatible_format must be set",
            ));
        }
        if self.max_subset_size_for_build_borders == 0 {
            return Err(invalid("max_subset_size_for_build_borders must be positive"));
        }
        if let Some(fraction) = self.default_value_fraction_to_enable_sparse_storage {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(invalid(format!(
                    "default_value_fraction_to_enable_sparse_storage must be in (0, 1], \
                     got {fraction}"
                )));
            }
        }
        let bundling = &self.exclusive_bundling;
        if !(0.0..=1.0).contains(&bundling.max_conflict_fraction) {
            return Err(invalid(format!(
                "max_conflict_fraction must be in [0, 1], got {}",
                bundling.max_conflict_fraction
            )));
        }
        if !(0.0..=1.0).contains(&bundling.min_sparsity) {
            return Err(invalid(format!(
                "min_sparsity must be in [0, 1], got {}",
                bundling.min_sparsity
            )));
        }
        if !(1..=4).contains(&self.feature_grouping.max_features_per_group) {
            return Err(invalid(format!(
                "max_features_per_group must be in [1, 4], got {}",
                self.feature_grouping.max_features_per_group
            )));
        }
        Ok(())
    }

    /// Read options from JSON and validate them.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Bundling settings when bundling is enabled.
    pub(crate) fn bundling(&self) -> Option<&ExclusiveBundlingOptions> {
        (self.bundle_exclusive_features && self.cpu_compatible_format)
            .then_some(&self.exclusive_bundling)
    }

    /// Grouping settings when grouping is enabled.
    pub(crate) fn grouping(&self) -> Option<&FeatureGroupingOptions> {
        (self.group_features && self.cpu_compatible_format).then_some(&self.feature_grouping)
    }

    pub(crate) fn pack_binary(&self) -> bool {
        self.pack_binary_features && self.cpu_compatible_format
    }
}

fn invalid(message: impl Into<String>) -> QuantizationError {
    QuantizationError::InvalidOptions(message.into())
}
