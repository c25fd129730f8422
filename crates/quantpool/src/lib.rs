//! quantpool: quantization and columnar bundling of feature tables for
//! gradient boosting.
//!
//! Raw float, categorical and text columns are turned into compact integer
//! bins: float features through borders searched on a sample, categorical
//! features through perfect hashes, text features through a digitizer.
//! Sparse, mutually exclusive features are bundled into shared columns,
//! binary features are packed eight to a byte.
//!
//! # Key Types
//!
//! - [`QuantizationOptions`] - Run configuration (builder, presets, JSON)
//! - [`QuantizationRegistry`] - Binning shared between learn and test data
//! - [`RawObjectsData`] / [`RawDataset`] - Input tables
//! - [`QuantizedObjectsData`] / [`QuantizedDataset`] - Output tables
//!
//! # Quantizing
//!
//! Build a registry for the layout of the data, then call [`quantize`] (or
//! [`quantize_train_test`] to bin test data the same way as learn data).
//!
//! ```
//! use std::sync::Arc;
//! use quantpool::{
//!     FeaturesLayout, FloatBinarization, QuantizationOptions, QuantizationRegistry,
//!     RawObjectsData, RawValues, quantize_objects,
//! };
//!
//! let data = RawObjectsData::new(FeaturesLayout::all_float(1), 4)
//!     .with_float(0, RawValues::Dense(vec![0.5, 1.5, 2.5, 3.5]));
//! let registry =
//!     QuantizationRegistry::new(&data.layout, &[], FloatBinarization::default());
//! let registry = Arc::new(registry);
//! let options = QuantizationOptions::builder().n_threads(1).build().unwrap();
//!
//! let quantized = quantize_objects(Arc::new(data), registry, &options).unwrap();
//! assert_eq!(quantized.feature_bins(0).unwrap(), Some(vec![0, 1, 2, 3]));
//! ```

pub mod data;
pub mod error;
pub mod quantize;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

// Entry points and configuration
pub use quantize::{
    QuantizationOptions, calc_borders_and_nan_mode, quantize, quantize_objects, quantize_train_test,
};

// Data types
pub use data::{
    BitWidth, BorderSelectionType, CompressedArray, DictionaryDigitizer, ExclusiveBundlingOptions,
    FeatureGroupingOptions, FeatureMeta, FeatureType, FeaturesLayout, FloatBinarization, NanMode,
    NonDefaultMask, QuantizationRegistry, QuantizedColumn, QuantizedDataset, QuantizedObjectsData,
    RawDataset, RawObjectsData, RawValues, SparseArrayIndexingType, SparseValues, TextDigitizer,
    get_non_default_values_mask,
};

// Errors
pub use error::{QuantizationError, Result};

// Shared utilities
pub use utils::{Parallelism, run_with_threads};
