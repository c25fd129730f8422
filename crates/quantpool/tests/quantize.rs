//! End-to-end quantization scenarios through the public API.

use std::sync::Arc;

use approx::assert_relative_eq;
use ndarray::array;
use rstest::rstest;

use quantpool::data::aggregate::ColumnAggregate;
use quantpool::{
    BorderSelectionType, DictionaryDigitizer, ExclusiveBundlingOptions, FeatureGroupingOptions,
    FeatureMeta, FeaturesLayout, FloatBinarization, NanMode, QuantizationError,
    QuantizationOptions, QuantizationRegistry, QuantizedColumn, QuantizedObjectsData, RawDataset,
    RawObjectsData, RawValues, SparseValues, calc_borders_and_nan_mode, quantize,
    quantize_objects, quantize_train_test,
};

// =============================================================================
// Helpers
// =============================================================================

fn registry(layout: &FeaturesLayout) -> Arc<QuantizationRegistry> {
    Arc::new(QuantizationRegistry::new(layout, &[], FloatBinarization::default()))
}

fn with_threads(options: QuantizationOptions, n_threads: usize) -> QuantizationOptions {
    QuantizationOptions { n_threads, ..options }
}

fn all_bins(data: &QuantizedObjectsData) -> Vec<Option<Vec<u32>>> {
    (0..data.layout.external_feature_count())
        .map(|flat_idx| data.feature_bins(flat_idx).unwrap())
        .collect()
}

/// Five sparse float features on 200 objects with disjoint non-default sets.
fn sparse_exclusive_objects() -> RawObjectsData {
    let n = 200;
    let mut data = RawObjectsData::new(FeaturesLayout::all_float(5), n);
    for feature in 0..5u32 {
        let indices: Vec<u32> = (0..4).map(|k| feature * 40 + k * 3).collect();
        let values = (0..4).map(|k| 1.0 + k as f32).collect();
        let column = SparseValues::new(indices, values, 0.0, n);
        data = data.with_float(feature as usize, RawValues::Sparse(column));
    }
    data
}

// =============================================================================
// Float Features
// =============================================================================

#[rstest]
fn test_nan_goes_to_min_bin(#[values(1, 4)] n_threads: usize) {
    let binarization = FloatBinarization::new(2, BorderSelectionType::Median, NanMode::Min);
    let data = RawObjectsData::new(FeaturesLayout::all_float(1), 4)
        .with_float(0, RawValues::Dense(vec![1.0, 2.0, f32::NAN, 3.0]));
    let registry = Arc::new(QuantizationRegistry::new(&data.layout, &[], binarization));

    let options = with_threads(QuantizationOptions::cpu(), n_threads);
    let quantized = quantize_objects(Arc::new(data), Arc::clone(&registry), &options).unwrap();

    let borders = registry.quantization(0).unwrap().borders.clone();
    assert_eq!(borders.len(), 2);
    assert_eq!(borders[0], f32::MIN);
    assert_relative_eq!(borders[1], 1.5);
    assert_eq!(quantized.feature_bins(0).unwrap(), Some(vec![1, 2, 0, 2]));
}

#[test]
fn test_borders_are_reproducible() {
    let values: Vec<f32> = (0..5_000).map(|i| ((i * 7919) % 1000) as f32 / 10.0).collect();
    let data = RawObjectsData::new(FeaturesLayout::all_float(1), values.len() as u32)
        .with_float(0, RawValues::Dense(values));
    let options = QuantizationOptions::builder()
        .max_subset_size_for_build_borders(500)
        .random_seed(11)
        .n_threads(1)
        .build()
        .unwrap();

    let first = registry(&data.layout);
    let second = registry(&data.layout);
    calc_borders_and_nan_mode(&data, &first, &options).unwrap();
    calc_borders_and_nan_mode(&data, &second, &options).unwrap();
    assert_eq!(first.quantization(0).unwrap().borders, second.quantization(0).unwrap().borders);
}

#[test]
fn test_from_feature_major_matrix() {
    let features = array![[0.0f32, 1.0, 2.0, 3.0], [5.0, 5.0, 6.0, 6.0]];
    let layout = FeaturesLayout::new(vec![FeatureMeta::float(), FeatureMeta::categorical()]);
    let data = RawObjectsData::from_feature_major(features.view(), layout).unwrap();
    let registry = registry(&data.layout);

    let options = with_threads(QuantizationOptions::cpu(), 1);
    let quantized = quantize_objects(Arc::new(data), registry, &options).unwrap();
    assert_eq!(quantized.feature_bins(0).unwrap(), Some(vec![0, 1, 2, 3]));
    // two categories, most frequent first on ties by first occurrence
    assert_eq!(quantized.feature_bins(1).unwrap(), Some(vec![0, 0, 1, 1]));
}

// =============================================================================
// Aggregates
// =============================================================================

#[test]
fn test_binary_categorical_features_share_one_byte() {
    let layout = FeaturesLayout::new(vec![FeatureMeta::categorical(), FeatureMeta::categorical()]);
    let data = RawObjectsData::new(layout, 8)
        .with_categorical(0, RawValues::Dense(vec![7, 3, 3, 7, 3, 7, 3, 3]))
        .with_categorical(1, RawValues::Dense(vec![2, 2, 9, 9, 2, 9, 2, 2]));
    let registry = registry(&data.layout);
    let options = with_threads(QuantizationOptions::cpu(), 1);
    let quantized = quantize_objects(Arc::new(data), registry, &options).unwrap();

    assert!(quantized.bundles.is_empty());
    assert_eq!(quantized.packs.len(), 1);
    let pack = &quantized.packs[0];
    assert_eq!(pack.meta.default_value(), 0);
    // object 0 has bins (1, 0)
    assert_eq!(pack.cells.get(0), 1);
    assert!(matches!(
        quantized.cat_features[1],
        Some(QuantizedColumn::PackedBinary { pack_idx: 0, bit_idx: 1 })
    ));
    assert_eq!(quantized.feature_bins(0).unwrap(), Some(vec![1, 0, 0, 1, 0, 1, 0, 0]));
    assert_eq!(quantized.feature_bins(1).unwrap(), Some(vec![0, 0, 1, 1, 0, 1, 0, 0]));
}

#[rstest]
fn test_bundling_preserves_bins(#[values(1, 3)] n_threads: usize) {
    let data = Arc::new(sparse_exclusive_objects());

    let plain_options = QuantizationOptions {
        bundle_exclusive_features: false,
        ..with_threads(QuantizationOptions::cpu(), n_threads)
    };
    let plain =
        quantize_objects(Arc::clone(&data), registry(&data.layout), &plain_options).unwrap();
    assert!(plain.bundles.is_empty());

    let options = with_threads(QuantizationOptions::cpu(), n_threads);
    let bundled = quantize_objects(data, registry(&plain.layout), &options).unwrap();
    assert_eq!(bundled.bundles.len(), 1);
    assert_eq!(bundled.bundles[0].meta.parts.len(), 5);
    assert!(
        bundled
            .float_features
            .iter()
            .flatten()
            .all(|column| matches!(column, QuantizedColumn::BundlePart { .. }))
    );
    assert_eq!(all_bins(&bundled), all_bins(&plain));
    assert!(bundled.size_bytes() < plain.size_bytes());
}

#[test]
fn test_bundling_respects_bucket_budget() {
    let data = Arc::new(sparse_exclusive_objects());
    let options = QuantizationOptions {
        exclusive_bundling: ExclusiveBundlingOptions {
            max_buckets: 8,
            ..Default::default()
        },
        ..with_threads(QuantizationOptions::cpu(), 1)
    };
    let quantized =
        quantize_objects(data, registry(&FeaturesLayout::all_float(5)), &options).unwrap();
    assert!(!quantized.bundles.is_empty());
    assert!(quantized.bundles.iter().all(|bundle| bundle.meta.bin_count() <= 8));
}

#[test]
fn test_feature_groups() {
    let data = Arc::new(
        RawObjectsData::new(FeaturesLayout::all_float(3), 6)
            .with_float(0, RawValues::Dense(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]))
            .with_float(1, RawValues::Dense(vec![5.0, 4.0, 3.0, 2.0, 1.0, 0.0]))
            .with_float(2, RawValues::Dense(vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0])),
    );
    let plain_options = with_threads(QuantizationOptions::cpu(), 1);
    let plain =
        quantize_objects(Arc::clone(&data), registry(&data.layout), &plain_options).unwrap();

    let options = QuantizationOptions {
        group_features: true,
        feature_grouping: FeatureGroupingOptions { max_features_per_group: 4 },
        ..plain_options
    };
    let grouped = quantize_objects(data, registry(&plain.layout), &options).unwrap();
    assert_eq!(grouped.groups.len(), 1);
    assert_eq!(grouped.groups[0].cells.width(), quantpool::BitWidth::U32);
    assert!(matches!(
        grouped.float_features[2],
        Some(QuantizedColumn::GroupPart { group_idx: 0, part_idx: 2 })
    ));
    assert_eq!(all_bins(&grouped), all_bins(&plain));
}

// =============================================================================
// Storage
// =============================================================================

#[test]
fn test_requantization_is_bit_identical() {
    let data = Arc::new(sparse_exclusive_objects());
    let registry = registry(&data.layout);
    let options = with_threads(QuantizationOptions::cpu(), 2);

    let first = quantize_objects(Arc::clone(&data), Arc::clone(&registry), &options).unwrap();
    let second = quantize_objects(data, registry, &options).unwrap();

    assert_eq!(first.bundles.len(), second.bundles.len());
    for (a, b) in first.bundles.iter().zip(&second.bundles) {
        assert_eq!(a.meta, b.meta);
        assert_eq!(a.cells, b.cells);
    }
    assert_eq!(all_bins(&first), all_bins(&second));
}

#[test]
fn test_sparse_storage_with_shared_default() {
    let n = 1_000;
    let indices: Vec<u32> = (0..n).step_by(10).collect();
    let values: Vec<f32> = indices.iter().map(|&idx| 1.0 + (idx % 3) as f32).collect();
    let data = RawObjectsData::new(FeaturesLayout::all_float(1), n)
        .with_float(0, RawValues::Sparse(SparseValues::new(indices, values, 0.0, n)));

    let options = QuantizationOptions {
        default_value_fraction_to_enable_sparse_storage: Some(0.5),
        ..with_threads(QuantizationOptions::gpu(), 1)
    };
    let registry = registry(&FeaturesLayout::all_float(1));
    let quantized = quantize_objects(Arc::new(data), registry, &options).unwrap();

    let Some(QuantizedColumn::Sparse(column)) = &quantized.float_features[0] else {
        panic!("expected a sparse column");
    };
    assert_eq!(column.default_value, 0);
    assert_eq!(column.non_default_count(), 100);
    let bins = quantized.feature_bins(0).unwrap().unwrap();
    assert_eq!(bins.iter().filter(|&&bin| bin != 0).count(), 100);
}

#[test]
fn test_gpu_output_on_shared_source_is_external() {
    let layout = FeaturesLayout::new(vec![FeatureMeta::float(), FeatureMeta::categorical()]);
    let data = Arc::new(
        RawObjectsData::new(layout, 4)
            .with_float(0, RawValues::Dense(vec![3.0, 1.0, 2.0, 0.0]))
            .with_categorical(0, RawValues::Dense(vec![4, 4, 8, 4])),
    );
    let registry = registry(&data.layout);
    let options = with_threads(QuantizationOptions::gpu(), 1);
    let quantized = quantize_objects(Arc::clone(&data), registry, &options).unwrap();

    assert!(matches!(quantized.float_features[0], Some(QuantizedColumn::External(_))));
    assert!(matches!(quantized.cat_features[0], Some(QuantizedColumn::External(_))));
    assert_eq!(quantized.feature_bins(0).unwrap(), Some(vec![3, 1, 2, 0]));
    assert_eq!(quantized.feature_bins(1).unwrap(), Some(vec![0, 0, 1, 0]));
    // the raw data is still shared with the caller
    assert_eq!(Arc::strong_count(&data), 3);
}

// =============================================================================
// Feature Selection
// =============================================================================

#[test]
fn test_ignored_and_text_features() {
    let layout = FeaturesLayout::new(vec![
        FeatureMeta::float(),
        FeatureMeta::float(),
        FeatureMeta::text(),
        FeatureMeta::text(),
    ]);
    let texts = |a: &str, b: &str| vec![a.to_string(), b.to_string()];
    let data = RawObjectsData::new(layout.clone(), 2)
        .with_float(0, RawValues::Dense(vec![1.0, 2.0]))
        .with_text(0, texts("good day", "bad"))
        .with_text(1, texts("x", "y"));
    let registry = QuantizationRegistry::new(&layout, &[1], FloatBinarization::default())
        .with_text_digitizer(2, Arc::new(DictionaryDigitizer::new(["bad", "good", "day"])))
        .unwrap();
    let registry = Arc::new(registry);

    let options = with_threads(QuantizationOptions::cpu(), 1);
    let quantized = quantize_objects(Arc::new(data), Arc::clone(&registry), &options).unwrap();
    assert!(quantized.layout.is_ignored(1));
    assert!(quantized.layout.is_ignored(3));
    assert_eq!(quantized.feature_bins(1).unwrap(), None);
    let tokens = &quantized.text_features[0].as_ref().unwrap().tokens;
    assert_eq!(tokens, &vec![vec![1, 2], vec![0]]);
    assert!(quantized.text_features[1].is_none());
}

#[test]
fn test_all_features_constant() {
    let layout = FeaturesLayout::new(vec![FeatureMeta::float(), FeatureMeta::categorical()]);
    let registry = registry(&layout);
    let data = RawObjectsData::new(layout, 3)
        .with_float(0, RawValues::Dense(vec![2.0; 3]))
        .with_categorical(0, RawValues::Dense(vec![1; 3]));
    let result = quantize_objects(Arc::new(data), registry, &QuantizationOptions::default());
    assert!(matches!(result, Err(QuantizationError::AllFeaturesIgnored)));
}

#[test]
fn test_empty_dataset() {
    let data = RawObjectsData::new(FeaturesLayout::all_float(1), 0)
        .with_float(0, RawValues::Dense(vec![]));
    let registry = registry(&data.layout);
    let result = quantize(RawDataset::new(data), registry, &QuantizationOptions::default());
    assert!(matches!(result, Err(QuantizationError::EmptyDataset)));
}

// =============================================================================
// Train / Test
// =============================================================================

fn train_test_layout() -> FeaturesLayout {
    FeaturesLayout::new(vec![FeatureMeta::float(), FeatureMeta::categorical()])
}

fn learn_dataset() -> RawDataset {
    let data = RawObjectsData::new(train_test_layout(), 6)
        .with_float(0, RawValues::Dense(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]))
        .with_categorical(0, RawValues::Dense(vec![10, 20, 10, 20, 10, 30]));
    RawDataset::new(data)
        .with_target(vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0])
        .with_weights(vec![1.0; 6])
}

#[rstest]
fn test_train_test_share_binning(#[values(1, 2)] n_threads: usize) {
    let test = RawObjectsData::new(train_test_layout(), 3)
        .with_float(0, RawValues::Dense(vec![2.75, 7.0, 0.0]))
        .with_categorical(0, RawValues::Dense(vec![20, 99, 10]));
    let registry = registry(&train_test_layout());
    let options = with_threads(QuantizationOptions::cpu(), n_threads);

    let tests = vec![RawDataset::new(test)];
    let (learn, tests) =
        quantize_train_test(learn_dataset(), tests, Arc::clone(&registry), &options).unwrap();

    assert_eq!(learn.object_count(), 6);
    assert_eq!(learn.target.as_deref(), Some(&[0.0, 1.0, 0.0, 1.0, 0.0, 1.0][..]));
    assert_eq!(learn.objects.feature_bins(1).unwrap(), Some(vec![0, 1, 0, 1, 0, 2]));

    let test = &tests[0];
    assert_eq!(test.objects.feature_bins(0).unwrap(), Some(vec![2, 5, 0]));
    // unseen category appended after the learn values
    assert_eq!(test.objects.feature_bins(1).unwrap(), Some(vec![1, 3, 0]));

    let hash = registry.perfect_hash(0).unwrap();
    assert_eq!(hash.unique_counts.on_learn_only, 3);
    assert_eq!(hash.unique_counts.on_all, 4);
}

#[test]
fn test_nan_in_test_only() {
    let test = || {
        RawObjectsData::new(train_test_layout(), 2)
            .with_float(0, RawValues::Dense(vec![f32::NAN, 3.0]))
            .with_categorical(0, RawValues::Dense(vec![10, 20]))
    };
    let options = with_threads(QuantizationOptions::cpu(), 1);

    let strict = registry(&train_test_layout());
    let result =
        quantize_train_test(learn_dataset(), vec![RawDataset::new(test())], strict, &options);
    assert!(matches!(result, Err(QuantizationError::NanInTestOnly { feature: 0 })));

    let lenient = Arc::new(
        QuantizationRegistry::new(&train_test_layout(), &[], FloatBinarization::default())
            .with_allow_nans_in_test_only(true),
    );
    let (_, tests) =
        quantize_train_test(learn_dataset(), vec![RawDataset::new(test())], lenient, &options)
            .unwrap();
    assert_eq!(tests[0].objects.feature_bins(0).unwrap(), Some(vec![0, 2]));
}

// =============================================================================
// Scheduling
// =============================================================================

#[test]
fn test_ram_limit() {
    let data = Arc::new(sparse_exclusive_objects());

    let strict = QuantizationOptions {
        cpu_ram_limit: 1,
        lenient_scheduling: false,
        ..with_threads(QuantizationOptions::cpu(), 1)
    };
    let result = quantize_objects(Arc::clone(&data), registry(&data.layout), &strict);
    assert!(matches!(result, Err(QuantizationError::Scheduler { .. })));

    let lenient = QuantizationOptions {
        lenient_scheduling: true,
        ..strict
    };
    let quantized =
        quantize_objects(data, registry(&FeaturesLayout::all_float(5)), &lenient).unwrap();
    assert_eq!(quantized.bundles.len(), 1);
}

#[test]
fn test_options_from_json() {
    let options = QuantizationOptions::from_json(
        r#"{"n_threads": 1, "bundle_exclusive_features": false, "pack_binary_features": false}"#,
    )
    .unwrap();
    let data = Arc::new(sparse_exclusive_objects());
    let quantized =
        quantize_objects(data, registry(&FeaturesLayout::all_float(5)), &options).unwrap();
    assert!(quantized.bundles.is_empty() && quantized.packs.is_empty());
}

#[rstest]
#[case(vec![2.5, 1.5], 254, vec![1.5, 2.5], vec![0, 1, 2, 2])]
#[case(vec![0.5, 1.5, 2.5, 3.5], 2, vec![1.5, 3.5], vec![0, 1, 1, 2])]
fn test_initial_borders_replace_search(
    #[case] initial: Vec<f32>,
    #[case] border_count: u32,
    #[case] expected_borders: Vec<f32>,
    #[case] expected_bins: Vec<u32>,
) {
    let layout = FeaturesLayout::all_float(1);
    let binarization =
        FloatBinarization::new(border_count, BorderSelectionType::Median, NanMode::Min);
    let registry = Arc::new(
        QuantizationRegistry::new(&layout, &[], binarization)
            .with_initial_borders(0, initial)
            .unwrap(),
    );
    let data =
        RawObjectsData::new(layout, 4).with_float(0, RawValues::Dense(vec![1.0, 2.0, 3.0, 4.0]));
    let options = with_threads(QuantizationOptions::gpu(), 1);
    let quantized = quantize_objects(Arc::new(data), Arc::clone(&registry), &options).unwrap();

    assert_eq!(registry.quantization(0).unwrap().borders, expected_borders);
    assert_eq!(quantized.feature_bins(0).unwrap(), Some(expected_bins));
}
