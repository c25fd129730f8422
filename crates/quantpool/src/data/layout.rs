//! Feature layout: feature types, flat and per-type indices, ignored flags.
//!
//! Every feature has a *flat* (external) index, its position in the source
//! table, and a *per-type* (internal) index counting only features of the
//! same type. Columns are stored per type; options and error messages refer
//! to flat indices.

use serde::{Deserialize, Serialize};

/// Logical feature types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FeatureType {
    /// Continuous numeric feature stored as `f32`. Missing values are NaN.
    #[default]
    Float,

    /// Categorical feature stored as a 32-bit hash of the category.
    Categorical,

    /// Free text, consumed only in tokenized form.
    Text,
}

/// A per-type feature index tagged with its type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeatureIdxWithType {
    pub feature_type: FeatureType,
    pub feature_idx: usize,
}

impl FeatureIdxWithType {
    pub fn float(feature_idx: usize) -> Self {
        Self {
            feature_type: FeatureType::Float,
            feature_idx,
        }
    }

    pub fn categorical(feature_idx: usize) -> Self {
        Self {
            feature_type: FeatureType::Categorical,
            feature_idx,
        }
    }
}

/// Metadata for a single feature.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureMeta {
    /// Feature name (optional).
    pub name: Option<String>,

    /// Feature type.
    pub feature_type: FeatureType,

    /// Ignored features are neither quantized nor stored.
    pub is_ignored: bool,
}

impl FeatureMeta {
    pub fn float() -> Self {
        Self::default()
    }

    pub fn categorical() -> Self {
        Self {
            feature_type: FeatureType::Categorical,
            ..Default::default()
        }
    }

    pub fn text() -> Self {
        Self {
            feature_type: FeatureType::Text,
            ..Default::default()
        }
    }

    /// Set the feature name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Layout of all features of a dataset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeaturesLayout {
    features: Vec<FeatureMeta>,

    /// Flat index -> per-type index.
    internal_idx: Vec<usize>,

    /// Per-type index -> flat index, one table per type.
    float_to_flat: Vec<usize>,
    cat_to_flat: Vec<usize>,
    text_to_flat: Vec<usize>,
}

impl FeaturesLayout {
    pub fn new(features: Vec<FeatureMeta>) -> Self {
        let mut layout = Self::default();
        for meta in features {
            layout.push(meta);
        }
        layout
    }

    /// Layout with `n_features` float features.
    pub fn all_float(n_features: usize) -> Self {
        Self::new(vec![FeatureMeta::float(); n_features])
    }

    /// Append a feature.
    pub fn push(&mut self, meta: FeatureMeta) {
        let flat_idx = self.features.len();
        let per_type = match meta.feature_type {
            FeatureType::Float => &mut self.float_to_flat,
            FeatureType::Categorical => &mut self.cat_to_flat,
            FeatureType::Text => &mut self.text_to_flat,
        };
        self.internal_idx.push(per_type.len());
        per_type.push(flat_idx);
        self.features.push(meta);
    }

    /// Total number of features.
    pub fn external_feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn feature_count(&self, feature_type: FeatureType) -> usize {
        self.per_type(feature_type).len()
    }

    pub fn float_feature_count(&self) -> usize {
        self.float_to_flat.len()
    }

    pub fn cat_feature_count(&self) -> usize {
        self.cat_to_flat.len()
    }

    pub fn text_feature_count(&self) -> usize {
        self.text_to_flat.len()
    }

    pub fn meta(&self, flat_idx: usize) -> Option<&FeatureMeta> {
        self.features.get(flat_idx)
    }

    pub fn metas(&self) -> &[FeatureMeta] {
        &self.features
    }

    /// Flat index of a per-type feature.
    #[inline]
    pub fn external_idx(&self, feature_idx: usize, feature_type: FeatureType) -> usize {
        self.per_type(feature_type)[feature_idx]
    }

    /// Per-type index and type of a flat feature.
    #[inline]
    pub fn internal_idx(&self, flat_idx: usize) -> FeatureIdxWithType {
        FeatureIdxWithType {
            feature_type: self.features[flat_idx].feature_type,
            feature_idx: self.internal_idx[flat_idx],
        }
    }

    /// Mark a flat feature as ignored. Out-of-range indices are skipped.
    pub fn ignore_external_feature(&mut self, flat_idx: usize) {
        if let Some(meta) = self.features.get_mut(flat_idx) {
            meta.is_ignored = true;
        }
    }

    pub fn is_ignored(&self, flat_idx: usize) -> bool {
        self.features[flat_idx].is_ignored
    }

    /// Whether a per-type feature is available (not ignored).
    #[inline]
    pub fn is_available(&self, feature_idx: usize, feature_type: FeatureType) -> bool {
        !self.features[self.external_idx(feature_idx, feature_type)].is_ignored
    }

    /// Per-type indices of the available features of one type.
    pub fn available_features(
        &self,
        feature_type: FeatureType,
    ) -> impl Iterator<Item = usize> + '_ {
        (0..self.feature_count(feature_type)).filter(move |&i| self.is_available(i, feature_type))
    }

    pub fn has_available_features(&self) -> bool {
        self.features.iter().any(|meta| !meta.is_ignored)
    }

    /// Copy ignored flags from `other` for the features both layouts share.
    pub fn add_ignored_from(&mut self, other: &FeaturesLayout) {
        let common = self.features.len().min(other.features.len());
        for i in 0..common {
            if other.features[i].is_ignored {
                self.features[i].is_ignored = true;
            }
        }
    }

    /// Whether two layouts describe the same features (ignoring ignored flags).
    pub fn is_compatible_with(&self, other: &FeaturesLayout) -> bool {
        self.features.len() == other.features.len()
            && self
                .features
                .iter()
                .zip(&other.features)
                .all(|(a, b)| a.feature_type == b.feature_type)
    }

    fn per_type(&self, feature_type: FeatureType) -> &[usize] {
        match feature_type {
            FeatureType::Float => &self.float_to_flat,
            FeatureType::Categorical => &self.cat_to_flat,
            FeatureType::Text => &self.text_to_flat,
        }
    }
}
