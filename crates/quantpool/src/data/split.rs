//! Border search for float features.
//!
//! This is the split-selection primitive the border builder calls: given the
//! non-NaN sample values of one feature (and, for sparse columns, its default
//! value with a count), choose at most `max_borders` ascending borders.

use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// Strategy for choosing borders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BorderSelectionType {
    /// Equal-frequency borders: each bin gets roughly the same weight.
    /// Borders are placed halfway between neighboring distinct values.
    #[default]
    Median,

    /// Equal-width borders over `[min, max]` of the sample.
    Uniform,
}

/// A value repeated `count` times without being stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultValue<T> {
    pub value: T,
    pub count: u64,
}

impl<T> DefaultValue<T> {
    pub fn new(value: T, count: u64) -> Self {
        Self { value, count }
    }
}

/// Bin holding a large enough share of the sample to serve as sparse default.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefaultQuantizedBin {
    pub idx: u32,
    /// Share of sampled objects falling into `idx`.
    pub fraction: f32,
}

/// Borders of one float feature plus its optional default bin.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantization {
    /// Strictly ascending.
    pub borders: Vec<f32>,
    pub default_quantized_bin: Option<DefaultQuantizedBin>,
}

impl Quantization {
    pub fn new(borders: Vec<f32>) -> Self {
        Self {
            borders,
            default_quantized_bin: None,
        }
    }
}

// =============================================================================
// Sizing
// =============================================================================

/// Number of objects sampled for border search.
///
/// The same size is used for every feature, whatever its own border count.
#[inline]
pub fn calc_sample_size(object_count: usize, max_subset_size: usize) -> usize {
    object_count.min(max_subset_size)
}

/// Upper estimate of the scratch memory used by [`best_split`].
pub fn calc_memory_for_find_best_split(
    max_borders: usize,
    value_count: usize,
    default_value: Option<DefaultValue<f32>>,
    selection: BorderSelectionType,
) -> u64 {
    let distinct = value_count as u64 + u64::from(default_value.is_some());
    let borders = max_borders as u64 + 1;
    match selection {
        // sorted copy plus (value, weight) runs and cumulative weights
        BorderSelectionType::Median => distinct * (4 + 8 + 8) + borders * 4,
        BorderSelectionType::Uniform => borders * 4,
    }
}

// =============================================================================
// Border Search
// =============================================================================

/// Choose at most `max_borders` ascending borders for `values`.
///
/// `values` must not contain NaN. When `initial_borders` is non-empty, those
/// borders are used instead of searching (sorted, deduplicated, thinned to
/// `max_borders`).
pub fn best_split(
    mut values: Vec<f32>,
    default_value: Option<DefaultValue<f32>>,
    max_borders: usize,
    selection: BorderSelectionType,
    initial_borders: Option<&[f32]>,
) -> Vec<f32> {
    if max_borders == 0 {
        return Vec::new();
    }
    if let Some(initial) = initial_borders.filter(|b| !b.is_empty()) {
        return thin_initial_borders(initial, max_borders);
    }

    values.sort_unstable_by(f32::total_cmp);
    let runs = weighted_runs(&values, default_value);
    if runs.len() < 2 {
        return Vec::new();
    }

    match selection {
        BorderSelectionType::Median => median_borders(&runs, max_borders),
        BorderSelectionType::Uniform => uniform_borders(&runs, max_borders),
    }
}

/// Distinct ascending values with their weights.
fn weighted_runs(sorted: &[f32], default_value: Option<DefaultValue<f32>>) -> Vec<(f32, u64)> {
    let mut runs: Vec<(f32, u64)> = Vec::new();
    for &v in sorted {
        let n = runs.len();
        if n > 0 && runs[n - 1].0 == v {
            runs[n - 1].1 += 1;
        } else {
            runs.push((v, 1));
        }
    }
    if let Some(default) = default_value.filter(|d| d.count > 0 && !d.value.is_nan()) {
        let pos = runs.partition_point(|(v, _)| *v < default.value);
        if runs.get(pos).is_some_and(|(v, _)| *v == default.value) {
            runs[pos].1 += default.count;
        } else {
            runs.insert(pos, (default.value, default.count));
        }
    }
    runs
}

#[inline]
fn midpoint(a: f32, b: f32) -> f32 {
    let mid = a + (b - a) / 2.0;
    if mid > a { mid } else { b }
}

fn median_borders(runs: &[(f32, u64)], max_borders: usize) -> Vec<f32> {
    let boundary_count = runs.len() - 1;
    if boundary_count <= max_borders {
        return runs.windows(2).map(|w| midpoint(w[0].0, w[1].0)).collect();
    }

    // cumulative[j] = weight of runs[0..=j]
    let mut cumulative = Vec::with_capacity(runs.len());
    let mut total = 0u64;
    for &(_, count) in runs {
        total += count;
        cumulative.push(total);
    }

    let mut chosen: Vec<usize> = Vec::with_capacity(max_borders);
    for k in 1..=max_borders {
        let target = total as f64 * k as f64 / (max_borders + 1) as f64;
        // First boundary whose cumulative weight reaches the target; compare
        // with its predecessor and keep the closer one (lower on ties).
        let upper = cumulative[..boundary_count].partition_point(|&c| (c as f64) < target);
        let best = if upper == 0 {
            0
        } else if upper == boundary_count {
            boundary_count - 1
        } else {
            let below = target - cumulative[upper - 1] as f64;
            let above = cumulative[upper] as f64 - target;
            if below <= above { upper - 1 } else { upper }
        };
        if chosen.last() != Some(&best) {
            chosen.push(best);
        }
    }

    chosen.into_iter().map(|j| midpoint(runs[j].0, runs[j + 1].0)).collect()
}

fn uniform_borders(runs: &[(f32, u64)], max_borders: usize) -> Vec<f32> {
    let min = runs[0].0 as f64;
    let max = runs[runs.len() - 1].0 as f64;
    let step = (max - min) / (max_borders + 1) as f64;
    let mut borders: Vec<f32> = Vec::with_capacity(max_borders);
    for k in 1..=max_borders {
        let border = (min + step * k as f64) as f32;
        if borders.last().is_none_or(|&last| border > last) && border < max as f32 {
            borders.push(border);
        }
    }
    borders
}

fn thin_initial_borders(initial: &[f32], max_borders: usize) -> Vec<f32> {
    let mut borders: Vec<f32> = initial.iter().copied().filter(|b| !b.is_nan()).collect();
    borders.sort_unstable_by(f32::total_cmp);
    borders.dedup();
    if borders.len() <= max_borders {
        return borders;
    }
    let n = borders.len();
    (0..max_borders)
        .map(|k| borders[(k * n + n / 2) / max_borders])
        .fold(Vec::with_capacity(max_borders), |mut acc, b| {
            if acc.last().is_none_or(|&last| b > last) {
                acc.push(b);
            }
            acc
        })
}

// =============================================================================
// Default Bin
// =============================================================================

/// Bin index of `value` given ascending `borders`.
#[inline]
pub fn bin_index(borders: &[f32], value: f32) -> u32 {
    borders.partition_point(|&b| b < value) as u32
}

/// Most frequent bin if its share reaches `min_fraction`.
///
/// `extra` adds weight to an explicit bin (the NaN bin).
pub fn calc_default_quantized_bin(
    borders: &[f32],
    values: &[f32],
    default_value: Option<DefaultValue<f32>>,
    extra: Option<(u32, u64)>,
    min_fraction: f32,
) -> Option<DefaultQuantizedBin> {
    let mut counts = vec![0u64; borders.len() + 1];
    for &v in values {
        counts[bin_index(borders, v) as usize] += 1;
    }
    if let Some(default) = default_value {
        counts[bin_index(borders, default.value) as usize] += default.count;
    }
    if let Some((bin, count)) = extra {
        if let Some(slot) = counts.get_mut(bin as usize) {
            *slot += count;
        }
    }

    let total: u64 = counts.iter().sum();
    if total == 0 {
        return None;
    }
    // max_by_key keeps the last maximum; scan in reverse so ties go to the lowest bin
    let (idx, &count) = counts.iter().enumerate().rev().max_by_key(|&(_, c)| *c)?;
    let fraction = count as f32 / total as f32;
    (fraction >= min_fraction).then_some(DefaultQuantizedBin {
        idx: idx as u32,
        fraction,
    })
}
