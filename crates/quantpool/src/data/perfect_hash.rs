//! Perfect hashing of categorical values.
//!
//! Every distinct hashed category gets a dense bin index. Bins are assigned
//! in first-seen order; optionally the most frequent value is moved to bin 0
//! so that bundling sees it as the feature's default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data::split::DefaultValue;

/// Bin of one category plus how often it was seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfectHashValue {
    pub bin: u32,
    pub count: u32,
}

/// Number of distinct values seen on learn data and on all data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueValuesCounts {
    pub on_learn_only: u32,
    pub on_all: u32,
}

/// Sparse default kept outside the main map.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerfectHashedDefault {
    pub src_value: u32,
    pub dst: PerfectHashValue,
    /// Share of the objects holding the default value.
    pub fraction: f32,
}

/// Mapping from hashed category to bin for one categorical feature.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CatFeaturePerfectHash {
    map: HashMap<u32, PerfectHashValue>,
    default_map: Option<PerfectHashedDefault>,
    pub unique_counts: UniqueValuesCounts,
}

impl CatFeaturePerfectHash {
    /// Number of distinct values, including the default.
    pub fn len(&self) -> usize {
        self.map.len() + usize::from(self.default_map.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn find(&self, value: u32) -> Option<PerfectHashValue> {
        if let Some(default) = &self.default_map {
            if default.src_value == value {
                return Some(default.dst);
            }
        }
        self.map.get(&value).copied()
    }

    pub fn default_map(&self) -> Option<&PerfectHashedDefault> {
        self.default_map.as_ref()
    }

    fn insert_new(&mut self, value: u32, count: u32) {
        let bin = self.len() as u32;
        self.map.insert(value, PerfectHashValue { bin, count });
    }
}

/// Result of [`update_perfect_hash_and_maybe_quantize`].
#[derive(Clone, Debug)]
pub struct PerfectHashUpdate {
    pub hash: CatFeaturePerfectHash,
    /// One bin per input value, when quantization was requested.
    pub quantized: Option<Vec<u32>>,
}

/// Extend `current` with the values of one column.
///
/// `values` are the explicitly stored values; `default_value` describes the
/// implicit rest of a sparse column. The first update of a feature assigns
/// bins (most frequent value first when `map_most_frequent_to_0`); later
/// updates only append unseen values. A sparse default whose share reaches
/// `sparsify_threshold` is kept as the hash's default mapping.
pub fn update_perfect_hash_and_maybe_quantize(
    current: Option<&CatFeaturePerfectHash>,
    values: &[u32],
    default_value: Option<DefaultValue<u32>>,
    map_most_frequent_to_0: bool,
    sparsify_threshold: Option<f32>,
    is_learn: bool,
    quantize: bool,
) -> PerfectHashUpdate {
    let mut hash = current.cloned().unwrap_or_default();

    if hash.is_empty() {
        build_initial(&mut hash, values, default_value, map_most_frequent_to_0, sparsify_threshold);
    } else {
        let mut seen: HashMap<u32, u32> = HashMap::new();
        let mut order: Vec<u32> = Vec::new();
        for &value in values.iter().chain(default_value.as_ref().map(|d| &d.value)) {
            if hash.find(value).is_none() {
                let count = seen.entry(value).or_insert_with(|| {
                    order.push(value);
                    0
                });
                *count += 1;
            }
        }
        for value in order {
            hash.insert_new(value, seen[&value]);
        }
    }

    hash.unique_counts.on_all = hash.len() as u32;
    if is_learn {
        hash.unique_counts.on_learn_only = hash.len() as u32;
    }

    let quantized = quantize.then(|| {
        values
            .iter()
            .map(|&value| hash.find(value).map_or(0, |hashed| hashed.bin))
            .collect()
    });

    PerfectHashUpdate { hash, quantized }
}

fn build_initial(
    hash: &mut CatFeaturePerfectHash,
    values: &[u32],
    default_value: Option<DefaultValue<u32>>,
    map_most_frequent_to_0: bool,
    sparsify_threshold: Option<f32>,
) {
    let mut counts: HashMap<u32, u64> = HashMap::new();
    let mut order: Vec<u32> = Vec::new();
    for &value in values {
        let count = counts.entry(value).or_insert_with(|| {
            order.push(value);
            0
        });
        *count += 1;
    }
    if let Some(default) = default_value.filter(|d| d.count > 0) {
        let count = counts.entry(default.value).or_insert_with(|| {
            order.push(default.value);
            0
        });
        *count += default.count;
    }
    if order.is_empty() {
        return;
    }

    if map_most_frequent_to_0 {
        // earliest value wins ties
        let mut best = 0;
        for (pos, value) in order.iter().enumerate() {
            if counts[value] > counts[&order[best]] {
                best = pos;
            }
        }
        let most_frequent = order.remove(best);
        order.insert(0, most_frequent);
    }

    let total: u64 = counts.values().sum();
    for (bin, value) in order.into_iter().enumerate() {
        let count = counts[&value];
        let hashed = PerfectHashValue {
            bin: bin as u32,
            count: count.min(u32::MAX as u64) as u32,
        };
        let fraction = count as f32 / total as f32;
        let is_sparse_default = default_value.is_some_and(|d| d.value == value)
            && sparsify_threshold.is_some_and(|threshold| fraction >= threshold);
        if is_sparse_default {
            hash.default_map = Some(PerfectHashedDefault {
                src_value: value,
                dst: hashed,
                fraction,
            });
        } else {
            hash.map.insert(value, hashed);
        }
    }
}
