//! Raw and quantized feature data.
//!
//! # Raw side
//!
//! - [`RawObjectsData`]: float, categorical and text columns plus the subset
//!   mapping logical object positions to physical ones
//! - [`QuantizationRegistry`]: borders, NaN modes and perfect hashes shared by
//!   every dataset quantized together
//!
//! # Quantized side
//!
//! - [`QuantizedObjectsData`]: one column per feature, either owned (dense,
//!   sparse, external) or a view into a bundle, binary pack or feature group
//! - [`CompressedArray`]: bins stored as `u8`, `u16` or `u32`
//!
//! Non-default means "quantized bin differs from 0" everywhere in this module.

pub mod aggregate;
pub mod borders;
pub mod bundling;
pub mod columns;
pub mod dataset;
pub mod indexing;
pub mod layout;
pub mod masks;
pub mod materialize;
pub mod perfect_hash;
pub mod quantizer;
pub mod registry;
pub mod scheduler;
pub mod split;
pub mod storage;
pub mod text;

pub use bundling::{ExclusiveBundlingOptions, FeatureGroupingOptions};
pub use columns::{RawDataset, RawObjectsData, RawValues, SparseValues};
pub use dataset::{QuantizedDataset, QuantizedObjectsData};
pub use indexing::SubsetIndexing;
pub use layout::{FeatureIdxWithType, FeatureMeta, FeatureType, FeaturesLayout};
pub use masks::{NonDefaultMask, feature_non_default_mask, get_non_default_values_mask};
pub use registry::{FloatBinarization, NanMode, QuantizationRegistry};
pub use split::BorderSelectionType;
pub use storage::{BitWidth, CompressedArray, QuantizedColumn, SparseArrayIndexingType};
pub use text::{DictionaryDigitizer, TextDigitizer, TokenizedTextColumn};
