//! Quantized objects data: per-feature columns plus the aggregate stores
//! their view columns point into.

use std::sync::Arc;

use crate::data::aggregate::{ColumnAggregate, extract_part};
use crate::data::bundling::{BinaryPack, ExclusiveFeaturesBundle, FeatureGroup};
use crate::data::layout::{FeatureIdxWithType, FeatureType, FeaturesLayout};
use crate::data::registry::QuantizationRegistry;
use crate::data::storage::{CompressedArray, QuantizedColumn};
use crate::data::text::TokenizedTextColumn;
use crate::error::{QuantizationError, Result};

/// One aggregate with its cells.
#[derive(Clone, Debug)]
pub struct Aggregated<A> {
    pub meta: A,
    pub cells: CompressedArray,
}

/// Quantized features of one dataset.
///
/// Ignored features have no column. Features stored inside an aggregate
/// carry a view column.
#[derive(Clone, Debug)]
pub struct QuantizedObjectsData {
    /// Source layout with every ignored feature marked.
    pub layout: FeaturesLayout,
    pub registry: Arc<QuantizationRegistry>,
    pub object_count: usize,
    pub float_features: Vec<Option<QuantizedColumn>>,
    pub cat_features: Vec<Option<QuantizedColumn>>,
    pub text_features: Vec<Option<TokenizedTextColumn>>,
    pub bundles: Vec<Aggregated<ExclusiveFeaturesBundle>>,
    pub packs: Vec<Aggregated<BinaryPack>>,
    pub groups: Vec<Aggregated<FeatureGroup>>,
}

impl QuantizedObjectsData {
    /// Column of a float or categorical feature, if it is not ignored.
    pub fn column(&self, feature: FeatureIdxWithType) -> Option<&QuantizedColumn> {
        let columns = match feature.feature_type {
            FeatureType::Float => &self.float_features,
            FeatureType::Categorical => &self.cat_features,
            FeatureType::Text => return None,
        };
        columns.get(feature.feature_idx).and_then(Option::as_ref)
    }

    /// Bins of every object for the feature at flat index `flat_idx`.
    ///
    /// `None` for ignored and text features.
    pub fn feature_bins(&self, flat_idx: usize) -> Result<Option<Vec<u32>>> {
        if self.layout.meta(flat_idx).is_none() {
            return Err(QuantizationError::internal(format!("feature #{flat_idx} is out of range")));
        }
        let Some(column) = self.column(self.layout.internal_idx(flat_idx)) else {
            return Ok(None);
        };
        self.column_bins(column).map(Some)
    }

    fn column_bins(&self, column: &QuantizedColumn) -> Result<Vec<u32>> {
        let missing = |kind: &str, idx: usize| {
            QuantizationError::internal(format!("view into missing {kind} {idx}"))
        };
        Ok(match column {
            QuantizedColumn::Dense(array) => array.to_u32_vec(),
            QuantizedColumn::Sparse(sparse) => sparse.to_dense_vec(),
            QuantizedColumn::External(external) => external.to_bins()?,
            QuantizedColumn::BundlePart { bundle_idx, begin, end } => {
                let bundle = self
                    .bundles
                    .get(*bundle_idx)
                    .ok_or_else(|| missing("bundle", *bundle_idx))?;
                extract_part::<ExclusiveFeaturesBundle>((*begin, *end), &bundle.cells)
            }
            QuantizedColumn::PackedBinary { pack_idx, bit_idx } => {
                let pack = self.packs.get(*pack_idx).ok_or_else(|| missing("pack", *pack_idx))?;
                extract_part::<BinaryPack>(*bit_idx, &pack.cells)
            }
            QuantizedColumn::GroupPart { group_idx, part_idx } => {
                let group = self
                    .groups
                    .get(*group_idx)
                    .ok_or_else(|| missing("group", *group_idx))?;
                extract_part::<FeatureGroup>(group.meta.context(*part_idx), &group.cells)
            }
        })
    }

    /// Bytes held by materialized columns and aggregates.
    pub fn size_bytes(&self) -> usize {
        let columns: usize = self
            .float_features
            .iter()
            .chain(&self.cat_features)
            .flatten()
            .map(|column| match column {
                QuantizedColumn::Dense(array) => array.size_bytes(),
                QuantizedColumn::Sparse(sparse) => {
                    sparse.values.size_bytes() + sparse.non_default_count() * size_of::<u32>()
                }
                _ => 0,
            })
            .sum();
        let bundles: usize = self.bundles.iter().map(|b| b.cells.size_bytes()).sum();
        let packs: usize = self.packs.iter().map(|p| p.cells.size_bytes()).sum();
        let groups: usize = self.groups.iter().map(|g| g.cells.size_bytes()).sum();
        columns + bundles + packs + groups
    }
}

/// Quantized objects plus the per-object targets and weights of the source.
#[derive(Clone, Debug)]
pub struct QuantizedDataset {
    pub objects: QuantizedObjectsData,
    pub target: Option<Vec<f32>>,
    pub weights: Option<Vec<f32>>,
}

impl QuantizedDataset {
    #[inline]
    pub fn object_count(&self) -> usize {
        self.objects.object_count
    }
}
