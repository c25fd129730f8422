//! Raw (unquantized) feature columns and the objects data holding them.
//!
//! Dense columns store one value per *physical* object and are addressed
//! through the dataset's [`SubsetIndexing`]. Sparse columns store only
//! non-default values at *logical* object positions.

use ndarray::ArrayView2;

use crate::data::indexing::SubsetIndexing;
use crate::data::layout::{FeatureType, FeaturesLayout};
use crate::error::{QuantizationError, Result};

/// Non-default values of a sparse column.
///
/// `indices` are strictly increasing logical positions; `values[i]` belongs
/// to `indices[i]`. Every other position holds `default_value`.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseValues<T> {
    pub indices: Vec<u32>,
    pub values: Vec<T>,
    pub default_value: T,
    pub size: u32,
}

impl<T: Copy> SparseValues<T> {
    pub fn new(indices: Vec<u32>, values: Vec<T>, default_value: T, size: u32) -> Self {
        Self {
            indices,
            values,
            default_value,
            size,
        }
    }

    #[inline]
    pub fn non_default_count(&self) -> usize {
        self.indices.len()
    }

    /// Number of positions holding the default value.
    #[inline]
    pub fn default_count(&self) -> usize {
        self.size as usize - self.indices.len()
    }

    /// Value at logical position `idx`.
    pub fn get(&self, idx: u32) -> T {
        match self.indices.binary_search(&idx) {
            Ok(pos) => self.values[pos],
            Err(_) => self.default_value,
        }
    }
}

/// Values of one raw column, dense or sparse.
#[derive(Clone, Debug, PartialEq)]
pub enum RawValues<T> {
    /// Physical storage, addressed through the dataset's subset indexing.
    Dense(Vec<T>),
    Sparse(SparseValues<T>),
}

impl<T: Copy> RawValues<T> {
    #[inline]
    pub fn is_dense(&self) -> bool {
        matches!(self, Self::Dense(_))
    }

    /// Value of logical object `idx`.
    pub fn get(&self, idx: usize, subset: &SubsetIndexing) -> T {
        match self {
            Self::Dense(values) => values[subset.get(idx) as usize],
            Self::Sparse(sparse) => sparse.get(idx as u32),
        }
    }

    /// Values of every logical object, in logical order.
    pub fn to_logical_vec(&self, subset: &SubsetIndexing) -> Vec<T> {
        match self {
            Self::Dense(values) => {
                let mut result = Vec::with_capacity(subset.size());
                subset.for_each(|_, src| result.push(values[src as usize]));
                result
            }
            Self::Sparse(sparse) => {
                let mut result = vec![sparse.default_value; sparse.size as usize];
                for (&idx, &value) in sparse.indices.iter().zip(&sparse.values) {
                    result[idx as usize] = value;
                }
                result
            }
        }
    }

    /// Number of explicitly stored values.
    pub fn stored_len(&self) -> usize {
        match self {
            Self::Dense(values) => values.len(),
            Self::Sparse(sparse) => sparse.values.len(),
        }
    }

    fn validate(&self, flat_idx: usize, subset: &SubsetIndexing) -> Result<()> {
        let invalid = |reason: String| QuantizationError::InvalidBinarization {
            feature: flat_idx,
            reason,
        };
        match self {
            Self::Dense(values) => {
                let mut max_src = None;
                subset.for_each(|_, src| max_src = max_src.max(Some(src)));
                if let Some(max_src) = max_src {
                    if max_src as usize >= values.len() {
                        return Err(invalid(format!(
                            "dense column has {} values, subset reads position {max_src}",
                            values.len()
                        )));
                    }
                }
            }
            Self::Sparse(sparse) => {
                if sparse.size as usize != subset.size() {
                    return Err(invalid(format!(
                        "sparse column size {} differs from object count {}",
                        sparse.size,
                        subset.size()
                    )));
                }
                if sparse.indices.len() != sparse.values.len() {
                    return Err(invalid("sparse indices and values differ in length".into()));
                }
                if sparse.indices.windows(2).any(|w| w[0] >= w[1])
                    || sparse.indices.last().is_some_and(|&last| last >= sparse.size)
                {
                    return Err(invalid(
                        "sparse indices must be strictly increasing and in range".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Raw objects data: the feature table before quantization.
#[derive(Clone, Debug, Default)]
pub struct RawObjectsData {
    pub layout: FeaturesLayout,

    /// Logical object position to physical position of dense columns.
    pub subset: SubsetIndexing,

    /// Objects are known to be randomly shuffled already.
    pub is_shuffled: bool,

    /// Indexed by per-type feature index; `None` for absent columns.
    pub float_features: Vec<Option<RawValues<f32>>>,
    pub cat_features: Vec<Option<RawValues<u32>>>,
    pub text_features: Vec<Option<Vec<String>>>,
}

impl RawObjectsData {
    /// Empty objects data with `object_count` objects and no columns set.
    pub fn new(layout: FeaturesLayout, object_count: u32) -> Self {
        Self {
            float_features: vec![None; layout.float_feature_count()],
            cat_features: vec![None; layout.cat_feature_count()],
            text_features: vec![None; layout.text_feature_count()],
            layout,
            subset: SubsetIndexing::Full(object_count),
            is_shuffled: false,
        }
    }

    /// Build from a feature-major matrix (`[n_features, n_samples]`).
    ///
    /// Categorical values are cast to integer category ids, the way the
    /// boosting side stores them as floats. Text features are left unset.
    pub fn from_feature_major(features: ArrayView2<f32>, layout: FeaturesLayout) -> Result<Self> {
        if features.nrows() != layout.external_feature_count() {
            return Err(QuantizationError::InvalidOptions(format!(
                "matrix has {} feature rows but the layout has {} features",
                features.nrows(),
                layout.external_feature_count()
            )));
        }
        let mut data = Self::new(layout, features.ncols() as u32);
        for (flat_idx, row) in features.outer_iter().enumerate() {
            let idx = data.layout.internal_idx(flat_idx);
            match idx.feature_type {
                FeatureType::Float => {
                    data.float_features[idx.feature_idx] = Some(RawValues::Dense(row.to_vec()));
                }
                FeatureType::Categorical => {
                    let hashes = row.iter().map(|&v| v as i32 as u32).collect();
                    data.cat_features[idx.feature_idx] = Some(RawValues::Dense(hashes));
                }
                FeatureType::Text => {}
            }
        }
        Ok(data)
    }

    pub fn with_subset(mut self, subset: SubsetIndexing) -> Self {
        self.subset = subset;
        self
    }

    pub fn shuffled(mut self, is_shuffled: bool) -> Self {
        self.is_shuffled = is_shuffled;
        self
    }

    pub fn with_float(mut self, feature_idx: usize, values: RawValues<f32>) -> Self {
        self.float_features[feature_idx] = Some(values);
        self
    }

    pub fn with_categorical(mut self, feature_idx: usize, values: RawValues<u32>) -> Self {
        self.cat_features[feature_idx] = Some(values);
        self
    }

    pub fn with_text(mut self, feature_idx: usize, values: Vec<String>) -> Self {
        self.text_features[feature_idx] = Some(values);
        self
    }

    #[inline]
    pub fn object_count(&self) -> usize {
        self.subset.size()
    }

    /// Whether any float or categorical column is dense.
    pub fn has_dense_data(&self) -> bool {
        self.float_features.iter().flatten().any(RawValues::is_dense)
            || self.cat_features.iter().flatten().any(RawValues::is_dense)
    }

    /// Check column shapes against the layout and the subset.
    pub fn validate(&self) -> Result<()> {
        if self.float_features.len() != self.layout.float_feature_count()
            || self.cat_features.len() != self.layout.cat_feature_count()
            || self.text_features.len() != self.layout.text_feature_count()
        {
            return Err(QuantizationError::internal(
                "column count does not match the features layout",
            ));
        }
        for (idx, column) in self.float_features.iter().enumerate() {
            if let Some(values) = column {
                values.validate(self.layout.external_idx(idx, FeatureType::Float), &self.subset)?;
            }
        }
        for (idx, column) in self.cat_features.iter().enumerate() {
            if let Some(values) = column {
                let flat_idx = self.layout.external_idx(idx, FeatureType::Categorical);
                values.validate(flat_idx, &self.subset)?;
            }
        }
        for (idx, column) in self.text_features.iter().enumerate() {
            if let Some(values) = column {
                if values.len() != self.object_count() {
                    return Err(QuantizationError::InvalidBinarization {
                        feature: self.layout.external_idx(idx, FeatureType::Text),
                        reason: format!(
                            "text column has {} values for {} objects",
                            values.len(),
                            self.object_count()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Raw objects data plus per-object targets and weights.
#[derive(Clone, Debug, Default)]
pub struct RawDataset {
    pub objects: std::sync::Arc<RawObjectsData>,
    pub target: Option<Vec<f32>>,
    pub weights: Option<Vec<f32>>,
}

impl RawDataset {
    pub fn new(objects: RawObjectsData) -> Self {
        Self {
            objects: std::sync::Arc::new(objects),
            target: None,
            weights: None,
        }
    }

    pub fn with_target(mut self, target: Vec<f32>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_weights(mut self, weights: Vec<f32>) -> Self {
        self.weights = Some(weights);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::layout::FeatureMeta;
    use ndarray::array;

    #[test]
    fn test_dense_values_through_subset() {
        let values = RawValues::Dense(vec![10.0f32, 11.0, 12.0, 13.0]);
        let subset = SubsetIndexing::Indexed(vec![3, 1]);
        assert_eq!(values.get(0, &subset), 13.0);
        assert_eq!(values.to_logical_vec(&subset), vec![13.0, 11.0]);
    }

    #[test]
    fn test_sparse_values() {
        let sparse = SparseValues::new(vec![1, 4], vec![5u32, 6], 0, 6);
        assert_eq!(sparse.default_count(), 4);
        assert_eq!(sparse.get(4), 6);
        assert_eq!(sparse.get(2), 0);
        let values = RawValues::Sparse(sparse);
        assert_eq!(values.to_logical_vec(&SubsetIndexing::Full(6)), vec![0, 5, 0, 0, 6, 0]);
    }

    #[test]
    fn test_from_feature_major() {
        let layout = FeaturesLayout::new(vec![FeatureMeta::float(), FeatureMeta::categorical()]);
        let matrix = array![[0.5f32, 1.5, 2.5], [3.0, 1.0, 3.0]];
        let data = RawObjectsData::from_feature_major(matrix.view(), layout).unwrap();
        assert_eq!(data.object_count(), 3);
        assert_eq!(data.cat_features[0], Some(RawValues::Dense(vec![3, 1, 3])));
        assert!(data.has_dense_data());
        data.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_sparse() {
        let layout = FeaturesLayout::all_float(1);
        let data = RawObjectsData::new(layout, 4)
            .with_float(
                0,
                RawValues::Sparse(SparseValues::new(vec![2, 1], vec![1.0, 2.0], 0.0, 4)),
            );
        assert!(matches!(
            data.validate(),
            Err(QuantizationError::InvalidBinarization { feature: 0, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_short_dense() {
        let layout = FeaturesLayout::all_float(1);
        let data = RawObjectsData::new(layout, 4).with_float(0, RawValues::Dense(vec![1.0; 3]));
        assert!(data.validate().is_err());
    }
}
