//! Aggregate metadata: which features share one physical column.
//!
//! Three kinds of aggregates are planned once every border and perfect hash
//! is known, before columns are quantized:
//!
//! 1. **Exclusive bundles**: sparse features that are rarely non-default at
//!    the same time, placed in disjoint value ranges of one cell.
//! 2. **Binary packs**: two-valued features, one bit each, eight per byte.
//! 3. **Feature groups**: small float features concatenated byte by byte.
//!
//! Bundles are assigned greedily from non-default bitmasks: denser features
//! first, each into the bundle where it adds the fewest conflicts.

use std::collections::HashSet;

use fixedbitset::FixedBitSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::columns::RawObjectsData;
use crate::data::layout::{FeatureIdxWithType, FeatureType};
use crate::data::masks::feature_non_default_mask;
use crate::data::materialize::MaterializeContext;
use crate::data::registry::QuantizationRegistry;
use crate::data::storage::BitWidth;
use crate::error::Result;

/// Bits in one binary pack.
pub const BINARY_PACK_BITS: usize = 8;

/// Largest bin count of a feature-group part (one byte).
pub const MAX_GROUP_PART_BINS: u32 = 256;

// =============================================================================
// Options
// =============================================================================

/// Exclusive feature bundling settings.
///
/// # Example
///
/// ```
/// use quantpool::ExclusiveBundlingOptions;
///
/// let options = ExclusiveBundlingOptions::default();
/// assert_eq!(options.max_buckets, 1024);
///
/// let tolerant = ExclusiveBundlingOptions { max_conflict_fraction: 0.001, ..Default::default() };
/// assert_eq!(tolerant.max_conflicts(10_000), 10);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusiveBundlingOptions {
    /// Maximum number of cell values of one bundle. Default: 1024.
    pub max_buckets: u32,

    /// Share of objects allowed to be non-default in more than one part of
    /// a bundle. Default: 0.0.
    pub max_conflict_fraction: f32,

    /// Minimum share of default objects for a feature to be bundled. Default: 0.9.
    pub min_sparsity: f32,
}

impl Default for ExclusiveBundlingOptions {
    fn default() -> Self {
        Self {
            max_buckets: 1024,
            max_conflict_fraction: 0.0,
            min_sparsity: 0.9,
        }
    }
}

impl ExclusiveBundlingOptions {
    /// Settings that never produce a bundle.
    pub fn disabled() -> Self {
        Self {
            max_buckets: 0,
            ..Default::default()
        }
    }

    /// Conflicting objects allowed per bundle.
    pub fn max_conflicts(&self, object_count: usize) -> usize {
        (self.max_conflict_fraction as f64 * object_count as f64).floor() as usize
    }

    /// Most non-default objects a bundled feature may have.
    pub fn max_non_default(&self, object_count: usize) -> usize {
        ((1.0 - self.min_sparsity as f64) * object_count as f64).floor() as usize
    }
}

/// Feature grouping settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureGroupingOptions {
    /// One byte per part; at most 4 so a group fits into 32 bits. Default: 4.
    pub max_features_per_group: u32,
}

impl Default for FeatureGroupingOptions {
    fn default() -> Self {
        Self {
            max_features_per_group: 4,
        }
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Placement of one feature inside an exclusive bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BundlePartMeta {
    pub feature: FeatureIdxWithType,
    /// Cell values `[begin, end)` encode the feature's bins `1..=end-begin`.
    pub begin: u32,
    pub end: u32,
}

/// Features stored in disjoint value ranges of one cell.
///
/// The cell value `bin_count()` means every part is at its bin 0.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusiveFeaturesBundle {
    pub parts: Vec<BundlePartMeta>,
}

impl ExclusiveFeaturesBundle {
    /// Append a feature with `bin_count` bins.
    pub fn add(&mut self, feature: FeatureIdxWithType, bin_count: u32) {
        let begin = self.bin_count();
        self.parts.push(BundlePartMeta {
            feature,
            begin,
            end: begin + bin_count - 1,
        });
    }

    /// Number of cell values used by the parts.
    pub fn bin_count(&self) -> u32 {
        self.parts.last().map_or(0, |part| part.end)
    }

    pub fn bit_width(&self) -> BitWidth {
        BitWidth::for_max_value(self.bin_count())
    }
}

/// One feature inside a binary pack or a feature group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggregatePartMeta {
    pub feature: FeatureIdxWithType,
    /// Bin of the feature written into the aggregate default.
    pub default_bin: u32,
}

/// Up to eight two-valued features, bit `i` holding part `i`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryPack {
    pub parts: Vec<AggregatePartMeta>,
}

/// Up to four features with at most 256 bins, byte `i` holding part `i`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureGroup {
    pub parts: Vec<AggregatePartMeta>,
}

impl FeatureGroup {
    pub fn bit_width(&self) -> BitWidth {
        match self.parts.len() {
            0 | 1 => BitWidth::U8,
            2 => BitWidth::U16,
            _ => BitWidth::U32,
        }
    }
}

/// Every aggregate planned for one dataset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregatePlan {
    pub bundles: Vec<ExclusiveFeaturesBundle>,
    pub packs: Vec<BinaryPack>,
    pub groups: Vec<FeatureGroup>,
}

impl AggregatePlan {
    /// Features stored inside some aggregate.
    pub fn aggregated_features(&self) -> HashSet<FeatureIdxWithType> {
        let bundled = self.bundles.iter().flat_map(|b| b.parts.iter().map(|p| p.feature));
        let packed = self.packs.iter().flat_map(|p| p.parts.iter().map(|p| p.feature));
        let grouped = self.groups.iter().flat_map(|g| g.parts.iter().map(|p| p.feature));
        bundled.chain(packed).chain(grouped).collect()
    }
}

// =============================================================================
// Feature Properties
// =============================================================================

/// Number of bins of a float or categorical feature.
pub fn feature_bin_count(
    registry: &QuantizationRegistry,
    feature: FeatureIdxWithType,
) -> Result<u32> {
    match feature.feature_type {
        FeatureType::Categorical => Ok(registry.perfect_hash(feature.feature_idx)?.len() as u32),
        _ => Ok(registry.quantization(feature.feature_idx)?.borders.len() as u32 + 1),
    }
}

/// Sparse default bin of a feature, 0 when it has none.
pub fn feature_default_bin(
    registry: &QuantizationRegistry,
    feature: FeatureIdxWithType,
) -> Result<u32> {
    match feature.feature_type {
        FeatureType::Categorical => Ok(registry
            .perfect_hash(feature.feature_idx)?
            .default_map()
            .map_or(0, |default| default.dst.bin)),
        _ => Ok(registry
            .quantization(feature.feature_idx)?
            .default_quantized_bin
            .map_or(0, |bin| bin.idx)),
    }
}

/// Float features with one border; categorical features with two values.
pub fn is_binary_feature(
    registry: &QuantizationRegistry,
    feature: FeatureIdxWithType,
) -> Result<bool> {
    match feature.feature_type {
        FeatureType::Categorical => {
            Ok(registry.perfect_hash(feature.feature_idx)?.unique_counts.on_all == 2)
        }
        _ => Ok(registry.quantization(feature.feature_idx)?.borders.len() == 1),
    }
}

// =============================================================================
// Exclusive Bundles
// =============================================================================

/// A feature considered for bundling.
#[derive(Clone, Debug)]
pub struct BundleCandidate {
    pub feature: FeatureIdxWithType,
    pub bin_count: u32,
    pub non_default: FixedBitSet,
}

impl BundleCandidate {
    fn non_default_count(&self) -> usize {
        self.non_default.count_ones(..)
    }
}

/// Greedy exclusive bundling. Bundles with a single part are dropped.
pub fn create_exclusive_bundles(
    mut candidates: Vec<BundleCandidate>,
    object_count: usize,
    options: &ExclusiveBundlingOptions,
) -> Vec<ExclusiveFeaturesBundle> {
    let max_non_default = options.max_non_default(object_count);
    candidates.retain(|c| {
        c.bin_count >= 2
            && c.bin_count - 1 <= options.max_buckets
            && c.non_default_count() <= max_non_default
    });
    // denser features first; stable on ties
    candidates.sort_by_key(|c| std::cmp::Reverse(c.non_default_count()));

    let max_conflicts = options.max_conflicts(object_count);
    let mut bundles: Vec<ExclusiveFeaturesBundle> = Vec::new();
    let mut unions: Vec<FixedBitSet> = Vec::new();
    let mut conflicts: Vec<usize> = Vec::new();

    for candidate in candidates {
        let part_size = candidate.bin_count - 1;
        let mut best: Option<(usize, usize)> = None;
        for (bundle_idx, bundle) in bundles.iter().enumerate() {
            if bundle.bin_count() + part_size > options.max_buckets {
                continue;
            }
            let added = candidate.non_default.intersection(&unions[bundle_idx]).count();
            if conflicts[bundle_idx] + added > max_conflicts {
                continue;
            }
            if best.is_none_or(|(_, best_added)| added < best_added) {
                best = Some((bundle_idx, added));
            }
        }

        match best {
            Some((bundle_idx, added)) => {
                bundles[bundle_idx].add(candidate.feature, candidate.bin_count);
                unions[bundle_idx].union_with(&candidate.non_default);
                conflicts[bundle_idx] += added;
            }
            None => {
                let mut bundle = ExclusiveFeaturesBundle::default();
                bundle.add(candidate.feature, candidate.bin_count);
                bundles.push(bundle);
                unions.push(candidate.non_default);
                conflicts.push(0);
            }
        }
    }

    bundles.retain(|bundle| bundle.parts.len() > 1);
    bundles
}

// =============================================================================
// Binary Packs and Groups
// =============================================================================

/// Pack binary features in the given order, eight per pack.
pub fn create_binary_packs(features: &[AggregatePartMeta]) -> Vec<BinaryPack> {
    features
        .chunks(BINARY_PACK_BITS)
        .map(|parts| BinaryPack { parts: parts.to_vec() })
        .collect()
}

/// Group features in the given order. Groups with a single part are dropped.
pub fn create_feature_groups(
    features: &[AggregatePartMeta],
    options: &FeatureGroupingOptions,
) -> Vec<FeatureGroup> {
    let per_group = options.max_features_per_group.clamp(1, 4) as usize;
    features
        .chunks(per_group)
        .filter(|parts| parts.len() > 1)
        .map(|parts| FeatureGroup { parts: parts.to_vec() })
        .collect()
}

// =============================================================================
// Planning
// =============================================================================

/// Plan the aggregates of one dataset.
///
/// `binary_features` are the features to pack when not bundled, in the
/// order they should be packed. Grouping takes the float features left over.
pub fn create_aggregate_plan(
    data: &RawObjectsData,
    registry: &QuantizationRegistry,
    bundling: Option<&ExclusiveBundlingOptions>,
    binary_features: &[FeatureIdxWithType],
    grouping: Option<&FeatureGroupingOptions>,
    ctx: &MaterializeContext,
) -> Result<AggregatePlan> {
    let mut layout = registry.layout();
    layout.add_ignored_from(&data.layout);
    let object_count = ctx.object_count();
    let available: Vec<FeatureIdxWithType> = layout
        .available_features(FeatureType::Float)
        .map(FeatureIdxWithType::float)
        .chain(
            layout
                .available_features(FeatureType::Categorical)
                .map(FeatureIdxWithType::categorical),
        )
        .collect();

    let mut plan = AggregatePlan::default();

    if let Some(options) = bundling.filter(|o| o.max_buckets > 0) {
        let max_non_default = options.max_non_default(object_count);
        let candidates = ctx.parallelism.maybe_par_try_map(available.clone(), |feature| {
            let bin_count = feature_bin_count(registry, feature)?;
            if bin_count < 2 || bin_count - 1 > options.max_buckets {
                return Ok(None);
            }
            let mask = feature_non_default_mask(data, registry, feature, ctx)?;
            if mask.non_default_count as usize > max_non_default {
                return Ok(None);
            }
            Ok(Some(BundleCandidate {
                feature,
                bin_count,
                non_default: mask.to_bitset(object_count),
            }))
        })?;
        let candidates = candidates.into_iter().flatten().collect();
        plan.bundles = create_exclusive_bundles(candidates, object_count, options);
    }

    let mut taken = plan.aggregated_features();

    let mut packed = Vec::new();
    for &feature in binary_features {
        if !taken.contains(&feature) {
            packed.push(AggregatePartMeta {
                feature,
                default_bin: feature_default_bin(registry, feature)?,
            });
        }
    }
    plan.packs = create_binary_packs(&packed);
    taken.extend(packed.iter().map(|part| part.feature));

    if let Some(options) = grouping {
        let mut grouped = Vec::new();
        for &feature in available.iter().filter(|f| f.feature_type == FeatureType::Float) {
            if !taken.contains(&feature)
                && feature_bin_count(registry, feature)? <= MAX_GROUP_PART_BINS
            {
                grouped.push(AggregatePartMeta {
                    feature,
                    default_bin: feature_default_bin(registry, feature)?,
                });
            }
        }
        plan.groups = create_feature_groups(&grouped, options);
    }

    debug!(
        bundles = plan.bundles.len(),
        packs = plan.packs.len(),
        groups = plan.groups.len(),
        "planned feature aggregates"
    );
    Ok(plan)
}
