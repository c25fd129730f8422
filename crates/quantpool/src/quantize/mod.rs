//! Quantization entry points.
//!
//! A run has two phases:
//!
//! 1. **Borders**: every float feature still lacking borders gets borders and
//!    a NaN mode, searched on one shared object sample and committed to the
//!    registry.
//! 2. **Columns**: categorical perfect hashes are extended, aggregates are
//!    planned, and every remaining feature is quantized into its column or
//!    straight into the aggregate it belongs to.
//!
//! Both phases run their per-feature work through a
//! [`ResourceConstrainedExecutor`] bounded by
//! [`QuantizationOptions::cpu_ram_limit`].

pub mod options;

pub use options::QuantizationOptions;

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, info};

use crate::data::aggregate::{ColumnAggregate, PartSource, aggregate_columns, part_views};
use crate::data::borders::{
    BorderSample, calc_borders_for_feature, estimate_border_memory, estimate_column_memory,
    estimate_perfect_hash_memory,
};
use crate::data::bundling::{AggregatePlan, create_aggregate_plan, is_binary_feature};
use crate::data::columns::{RawDataset, RawObjectsData, RawValues};
use crate::data::dataset::{Aggregated, QuantizedDataset, QuantizedObjectsData};
use crate::data::indexing::IncrementalDenseIndexing;
use crate::data::layout::{FeatureIdxWithType, FeatureType, FeaturesLayout};
use crate::data::materialize::{MaterializeContext, materialize_column};
use crate::data::perfect_hash::update_perfect_hash_and_maybe_quantize;
use crate::data::quantizer::{
    AnyQuantizer, CategoricalQuantizer, ExternalColumn, FloatQuantizer, ValueQuantizer,
};
use crate::data::registry::QuantizationRegistry;
use crate::data::scheduler::ResourceConstrainedExecutor;
use crate::data::split::DefaultValue;
use crate::data::storage::{CompressedArray, QuantizedColumn};
use crate::data::text::{TokenizedTextColumn, digitize_column};
use crate::error::{QuantizationError, Result};
use crate::utils::{Parallelism, run_with_threads};

const CPU_RAM: &str = "CPU RAM";

// =============================================================================
// Public API
// =============================================================================

/// Compute borders and NaN modes of every float feature of `data` that has
/// none yet, without quantizing anything.
///
/// Features whose borders come out empty are marked ignored in the registry.
pub fn calc_borders_and_nan_mode(
    data: &RawObjectsData,
    registry: &QuantizationRegistry,
    options: &QuantizationOptions,
) -> Result<()> {
    check_inputs(data, registry, options)?;
    run_with_threads(options.n_threads, |parallelism| {
        prepare_registry(data, registry, true)?;
        calc_missing_borders(data, registry, options, parallelism)
    })?
}

/// Quantize the objects of a learn dataset.
///
/// When `data` is the last reference to the raw objects, source columns are
/// released as soon as they have been quantized.
pub fn quantize_objects(
    data: Arc<RawObjectsData>,
    registry: Arc<QuantizationRegistry>,
    options: &QuantizationOptions,
) -> Result<QuantizedObjectsData> {
    check_inputs(&data, &registry, options)?;
    run_with_threads(options.n_threads, |parallelism| {
        quantize_objects_impl(data, registry, options, true, parallelism)
    })?
}

/// Quantize a learn dataset, carrying its targets and weights over.
pub fn quantize(
    dataset: RawDataset,
    registry: Arc<QuantizationRegistry>,
    options: &QuantizationOptions,
) -> Result<QuantizedDataset> {
    check_dataset(&dataset)?;
    check_inputs(&dataset.objects, &registry, options)?;
    run_with_threads(options.n_threads, |parallelism| {
        quantize_dataset(dataset, &registry, options, true, parallelism)
    })?
}

/// Quantize a learn dataset and then each test dataset against the same
/// registry, so all of them share one binning.
///
/// Categorical values first seen in a test dataset are appended to the
/// perfect hash without changing the bins of learn values.
pub fn quantize_train_test(
    learn: RawDataset,
    tests: Vec<RawDataset>,
    registry: Arc<QuantizationRegistry>,
    options: &QuantizationOptions,
) -> Result<(QuantizedDataset, Vec<QuantizedDataset>)> {
    for dataset in std::iter::once(&learn).chain(&tests) {
        check_dataset(dataset)?;
        check_inputs(&dataset.objects, &registry, options)?;
    }
    run_with_threads(options.n_threads, |parallelism| {
        let learn = quantize_dataset(learn, &registry, options, true, parallelism)?;
        let tests = tests
            .into_iter()
            .map(|test| quantize_dataset(test, &registry, options, false, parallelism))
            .collect::<Result<Vec<_>>>()?;
        Ok((learn, tests))
    })?
}

// =============================================================================
// Input Checks
// =============================================================================

fn check_inputs(
    data: &RawObjectsData,
    registry: &QuantizationRegistry,
    options: &QuantizationOptions,
) -> Result<()> {
    options.validate()?;
    registry.validate()?;
    data.validate()?;
    if data.object_count() == 0 {
        return Err(QuantizationError::EmptyDataset);
    }
    if !registry.is_compatible_with(&data.layout) {
        return Err(QuantizationError::InvalidOptions(
            "features layout of the data does not match the quantization registry".into(),
        ));
    }
    Ok(())
}

fn check_dataset(dataset: &RawDataset) -> Result<()> {
    let object_count = dataset.objects.object_count();
    for (name, values) in [("target", &dataset.target), ("weights", &dataset.weights)] {
        if let Some(values) = values {
            if values.len() != object_count {
                return Err(QuantizationError::InvalidOptions(format!(
                    "{name} has {} values for {object_count} objects",
                    values.len()
                )));
            }
        }
    }
    Ok(())
}

/// Make sure every feature left available has a source column.
///
/// Ignored flags of learn data are carried into the registry. Test data only
/// narrows its own output layout.
fn prepare_registry(
    data: &RawObjectsData,
    registry: &QuantizationRegistry,
    is_learn: bool,
) -> Result<()> {
    if is_learn {
        for flat_idx in 0..data.layout.external_feature_count() {
            if data.layout.is_ignored(flat_idx) && !registry.is_ignored(flat_idx) {
                registry.ignore_feature(flat_idx);
            }
        }
    }

    let layout = effective_layout(data, registry);
    let has_column = |feature_type: FeatureType, idx: usize| match feature_type {
        FeatureType::Float => data.float_features.get(idx).is_some_and(Option::is_some),
        FeatureType::Categorical => data.cat_features.get(idx).is_some_and(Option::is_some),
        FeatureType::Text => data.text_features.get(idx).is_some_and(Option::is_some),
    };
    for feature_type in [FeatureType::Float, FeatureType::Categorical, FeatureType::Text] {
        let mut available = layout.available_features(feature_type);
        if let Some(idx) = available.find(|&idx| !has_column(feature_type, idx)) {
            return Err(QuantizationError::internal(format!(
                "feature #{} is available but has no source column",
                layout.external_idx(idx, feature_type)
            )));
        }
    }
    Ok(())
}

/// Registry layout narrowed by the ignored flags of `data`.
fn effective_layout(data: &RawObjectsData, registry: &QuantizationRegistry) -> FeaturesLayout {
    let mut layout = registry.layout();
    layout.add_ignored_from(&data.layout);
    layout
}

// =============================================================================
// Phase 1: Borders
// =============================================================================

fn calc_missing_borders(
    data: &RawObjectsData,
    registry: &QuantizationRegistry,
    options: &QuantizationOptions,
    parallelism: Parallelism,
) -> Result<()> {
    let layout = effective_layout(data, registry);
    let mut features = registry.float_features_without_borders();
    features.retain(|&float_idx| layout.is_available(float_idx, FeatureType::Float));
    if features.is_empty() {
        return Ok(());
    }

    let sample = BorderSample::new(
        data,
        options.max_subset_size_for_build_borders,
        options.random_seed,
    );
    info!(
        sample_size = sample.size(),
        features = features.len(),
        "building borders for float features"
    );

    let sample = &sample;
    let mut executor = ResourceConstrainedExecutor::new(
        CPU_RAM,
        options.cpu_ram_limit,
        options.lenient_scheduling,
    );
    for float_idx in features {
        let cost = estimate_border_memory(&registry.float_binarization(float_idx), sample.size());
        executor.add(cost, move || {
            calc_borders_for_feature(
                data,
                registry,
                float_idx,
                sample,
                options.default_value_fraction_to_enable_sparse_storage,
            )
            .map(drop)
        });
    }
    executor.exec_tasks(parallelism)?;
    Ok(())
}

// =============================================================================
// Phase 2: Columns
// =============================================================================

fn quantize_dataset(
    dataset: RawDataset,
    registry: &Arc<QuantizationRegistry>,
    options: &QuantizationOptions,
    is_learn: bool,
    parallelism: Parallelism,
) -> Result<QuantizedDataset> {
    let RawDataset { objects, target, weights } = dataset;
    let objects =
        quantize_objects_impl(objects, Arc::clone(registry), options, is_learn, parallelism)?;
    Ok(QuantizedDataset { objects, target, weights })
}

fn quantize_objects_impl(
    data: Arc<RawObjectsData>,
    registry: Arc<QuantizationRegistry>,
    options: &QuantizationOptions,
    is_learn: bool,
    parallelism: Parallelism,
) -> Result<QuantizedObjectsData> {
    let object_count = data.object_count();
    debug!(object_count, is_learn, "quantizing objects");

    prepare_registry(&data, &registry, is_learn)?;
    calc_missing_borders(&data, &registry, options, parallelism)?;
    update_perfect_hashes(&data, &registry, options, is_learn, parallelism)?;
    let text_features = digitize_text_features(&data, &registry, parallelism);

    let mut layout = data.layout.clone();
    layout.add_ignored_from(&registry.layout());
    if !layout.has_available_features() {
        return Err(QuantizationError::AllFeaturesIgnored);
    }

    let incremental =
        IncrementalDenseIndexing::new(&data.subset, data.has_dense_data(), parallelism);
    let plan = if options.cpu_compatible_format {
        plan_aggregates(&data, &registry, &layout, &incremental, options, parallelism)?
    } else {
        AggregatePlan::default()
    };

    let job = ColumnsJob {
        registry: &registry,
        layout: &layout,
        incremental: &incremental,
        plan: &plan,
        options,
        parallelism,
    };
    let columns = match Arc::try_unwrap(data) {
        Ok(mut owned) => {
            let sources = ColumnSources::take(&mut owned);
            job.run(&owned, sources, None)?
        }
        Err(shared) => {
            let keep_external = !options.cpu_compatible_format
                && shared.text_features.iter().all(Option::is_none);
            let sources = ColumnSources::borrow(&shared);
            job.run(&shared, sources, keep_external.then_some(&shared))?
        }
    };

    let AggregatePlan { bundles, packs, groups } = plan;
    Ok(QuantizedObjectsData {
        layout,
        registry,
        object_count,
        float_features: columns.float_features,
        cat_features: columns.cat_features,
        text_features,
        bundles: attach_cells(bundles, columns.bundle_cells, "bundle")?,
        packs: attach_cells(packs, columns.pack_cells, "pack")?,
        groups: attach_cells(groups, columns.group_cells, "group")?,
    })
}

/// Extend the perfect hash of every available categorical feature with the
/// values of `data`. Learn features with at most one value become ignored.
fn update_perfect_hashes(
    data: &RawObjectsData,
    registry: &QuantizationRegistry,
    options: &QuantizationOptions,
    is_learn: bool,
    parallelism: Parallelism,
) -> Result<()> {
    let features: Vec<usize> = effective_layout(data, registry)
        .available_features(FeatureType::Categorical)
        .collect();
    if features.is_empty() {
        return Ok(());
    }

    let mut executor = ResourceConstrainedExecutor::new(
        CPU_RAM,
        options.cpu_ram_limit,
        options.lenient_scheduling,
    );
    for cat_idx in features {
        let values = source_column(&data.cat_features, cat_idx)?;
        executor.add(estimate_perfect_hash_memory(values.stored_len()), move || {
            update_perfect_hash(data, values, registry, cat_idx, options, is_learn)
        });
    }
    executor.exec_tasks(parallelism)?;
    Ok(())
}

fn update_perfect_hash(
    data: &RawObjectsData,
    values: &RawValues<u32>,
    registry: &QuantizationRegistry,
    cat_idx: usize,
    options: &QuantizationOptions,
    is_learn: bool,
) -> Result<()> {
    let (stored, default_value): (Cow<'_, [u32]>, _) = match values {
        RawValues::Dense(_) => (Cow::Owned(values.to_logical_vec(&data.subset)), None),
        RawValues::Sparse(sparse) => {
            let default_count = sparse.default_count();
            let default_value = (default_count > 0)
                .then(|| DefaultValue::new(sparse.default_value, default_count as u64));
            (Cow::Borrowed(sparse.values.as_slice()), default_value)
        }
    };

    let is_constant = registry.update_perfect_hash(cat_idx, |current| {
        let update = update_perfect_hash_and_maybe_quantize(
            current,
            &stored,
            default_value,
            options.bundle_exclusive_features,
            options.default_value_fraction_to_enable_sparse_storage,
            is_learn,
            false,
        );
        let is_constant = is_learn && update.hash.unique_counts.on_learn_only <= 1;
        (update.hash, is_constant)
    })?;

    if is_constant {
        let flat_idx = registry.external_idx(cat_idx, FeatureType::Categorical);
        debug!("Categorical Feature #{flat_idx} is constant");
        registry.ignore_feature(flat_idx);
    }
    Ok(())
}

fn digitize_text_features(
    data: &RawObjectsData,
    registry: &QuantizationRegistry,
    parallelism: Parallelism,
) -> Vec<Option<TokenizedTextColumn>> {
    let mut columns = vec![None; data.text_features.len()];
    for text_idx in effective_layout(data, registry).available_features(FeatureType::Text) {
        let Some(texts) = data.text_features.get(text_idx).and_then(Option::as_ref) else {
            continue;
        };
        match registry.text_digitizer(text_idx) {
            Some(digitizer) => {
                columns[text_idx] = Some(digitize_column(texts, digitizer.as_ref(), parallelism));
            }
            None => {
                let flat_idx = registry.external_idx(text_idx, FeatureType::Text);
                debug!("Text Feature #{flat_idx} has no digitizer and is ignored");
                registry.ignore_feature(flat_idx);
            }
        }
    }
    columns
}

fn plan_aggregates(
    data: &RawObjectsData,
    registry: &QuantizationRegistry,
    layout: &FeaturesLayout,
    incremental: &IncrementalDenseIndexing,
    options: &QuantizationOptions,
    parallelism: Parallelism,
) -> Result<AggregatePlan> {
    let mut binary_features = Vec::new();
    if options.pack_binary() {
        for flat_idx in 0..layout.external_feature_count() {
            if layout.is_ignored(flat_idx) {
                continue;
            }
            let feature = layout.internal_idx(flat_idx);
            if feature.feature_type != FeatureType::Text && is_binary_feature(registry, feature)? {
                binary_features.push(feature);
            }
        }
    }

    let ctx = MaterializeContext {
        subset: &data.subset,
        incremental,
        sparse_indexing: options.sparse_array_indexing,
        parallelism,
    };
    create_aggregate_plan(
        data,
        registry,
        options.bundling(),
        &binary_features,
        options.grouping(),
        &ctx,
    )
}

fn attach_cells<A>(
    metas: Vec<A>,
    cells: Vec<Option<CompressedArray>>,
    kind: &str,
) -> Result<Vec<Aggregated<A>>> {
    metas
        .into_iter()
        .zip(cells)
        .enumerate()
        .map(|(idx, (meta, cells))| {
            cells
                .map(|cells| Aggregated { meta, cells })
                .ok_or_else(|| QuantizationError::internal(format!("{kind} {idx} was never built")))
        })
        .collect()
}

fn source_column<T>(columns: &[Option<RawValues<T>>], idx: usize) -> Result<&RawValues<T>> {
    columns
        .get(idx)
        .and_then(Option::as_ref)
        .ok_or_else(|| QuantizationError::internal(format!("no source column for feature {idx}")))
}

// =============================================================================
// Column Sources
// =============================================================================

/// Raw columns handed to the quantization tasks, each taken at most once.
///
/// Owned columns are dropped inside the task that consumes them.
struct ColumnSources<'a> {
    float: Vec<Option<Cow<'a, RawValues<f32>>>>,
    cat: Vec<Option<Cow<'a, RawValues<u32>>>>,
}

impl<'a> ColumnSources<'a> {
    /// Move the columns out of exclusively owned data.
    fn take(data: &mut RawObjectsData) -> Self {
        Self {
            float: std::mem::take(&mut data.float_features)
                .into_iter()
                .map(|column| column.map(Cow::Owned))
                .collect(),
            cat: std::mem::take(&mut data.cat_features)
                .into_iter()
                .map(|column| column.map(Cow::Owned))
                .collect(),
        }
    }

    fn borrow(data: &'a RawObjectsData) -> Self {
        Self {
            float: data
                .float_features
                .iter()
                .map(|column| column.as_ref().map(Cow::Borrowed))
                .collect(),
            cat: data
                .cat_features
                .iter()
                .map(|column| column.as_ref().map(Cow::Borrowed))
                .collect(),
        }
    }

    fn float(&mut self, idx: usize) -> Result<Cow<'a, RawValues<f32>>> {
        take_source(&mut self.float, idx)
    }

    fn categorical(&mut self, idx: usize) -> Result<Cow<'a, RawValues<u32>>> {
        take_source(&mut self.cat, idx)
    }

    fn part(
        &mut self,
        registry: &QuantizationRegistry,
        feature: FeatureIdxWithType,
    ) -> Result<PartSource<'a>> {
        let idx = feature.feature_idx;
        match feature.feature_type {
            FeatureType::Float => Ok(PartSource::Float(
                self.float(idx)?,
                FloatQuantizer::new(registry, idx)?,
            )),
            FeatureType::Categorical => Ok(PartSource::Categorical(
                self.categorical(idx)?,
                CategoricalQuantizer::new(registry, idx)?,
            )),
            FeatureType::Text => {
                Err(QuantizationError::internal("text features cannot be aggregated"))
            }
        }
    }
}

fn take_source<'a, T: Clone>(
    columns: &mut [Option<Cow<'a, RawValues<T>>>],
    idx: usize,
) -> Result<Cow<'a, RawValues<T>>> {
    columns
        .get_mut(idx)
        .and_then(Option::take)
        .ok_or_else(|| {
            QuantizationError::internal(format!(
                "source column {idx} is missing or already consumed"
            ))
        })
}

// =============================================================================
// Column Tasks
// =============================================================================

/// Output of one quantization task.
enum Produced {
    Column(FeatureIdxWithType, QuantizedColumn),
    Bundle(usize, CompressedArray),
    Pack(usize, CompressedArray),
    Group(usize, CompressedArray),
}

struct BuiltColumns {
    float_features: Vec<Option<QuantizedColumn>>,
    cat_features: Vec<Option<QuantizedColumn>>,
    bundle_cells: Vec<Option<CompressedArray>>,
    pack_cells: Vec<Option<CompressedArray>>,
    group_cells: Vec<Option<CompressedArray>>,
}

impl BuiltColumns {
    fn set(&mut self, feature: FeatureIdxWithType, column: QuantizedColumn) -> Result<()> {
        let columns = match feature.feature_type {
            FeatureType::Float => &mut self.float_features,
            FeatureType::Categorical => &mut self.cat_features,
            FeatureType::Text => {
                return Err(QuantizationError::internal(
                    "text features have no quantized column",
                ));
            }
        };
        let slot = columns
            .get_mut(feature.feature_idx)
            .ok_or_else(|| QuantizationError::internal(format!("{feature:?} is out of range")))?;
        *slot = Some(column);
        Ok(())
    }
}

/// Everything the column phase shares across tasks.
struct ColumnsJob<'j> {
    registry: &'j QuantizationRegistry,
    layout: &'j FeaturesLayout,
    incremental: &'j IncrementalDenseIndexing,
    plan: &'j AggregatePlan,
    options: &'j QuantizationOptions,
    parallelism: Parallelism,
}

impl ColumnsJob<'_> {
    /// Quantize every available feature of `data`, drawing raw values from
    /// `sources`. With `external` set, standalone columns stay lazy views of
    /// the shared raw data.
    fn run<'a>(
        &'a self,
        data: &'a RawObjectsData,
        mut sources: ColumnSources<'a>,
        external: Option<&Arc<RawObjectsData>>,
    ) -> Result<BuiltColumns> {
        let layout = self.layout;
        let mut built = BuiltColumns {
            float_features: vec![None; layout.float_feature_count()],
            cat_features: vec![None; layout.cat_feature_count()],
            bundle_cells: vec![None; self.plan.bundles.len()],
            pack_cells: vec![None; self.plan.packs.len()],
            group_cells: vec![None; self.plan.groups.len()],
        };

        let ctx = MaterializeContext {
            subset: &data.subset,
            incremental: self.incremental,
            sparse_indexing: self.options.sparse_array_indexing,
            parallelism: self.parallelism,
        };
        let object_count = ctx.object_count();
        let aggregated = self.plan.aggregated_features();

        let mut executor: ResourceConstrainedExecutor<'a, Produced> =
            ResourceConstrainedExecutor::new(
                CPU_RAM,
                self.options.cpu_ram_limit,
                self.options.lenient_scheduling,
            );

        let plan = self.plan;
        self.add_aggregates(&mut executor, &plan.bundles, Produced::Bundle, &mut sources, ctx)?;

        let standalone = layout
            .available_features(FeatureType::Float)
            .map(FeatureIdxWithType::float)
            .chain(
                layout
                    .available_features(FeatureType::Categorical)
                    .map(FeatureIdxWithType::categorical),
            )
            .filter(|feature| !aggregated.contains(feature));
        let mut external_count = 0usize;
        for feature in standalone {
            let idx = feature.feature_idx;
            match feature.feature_type {
                FeatureType::Float => {
                    let quantizer = FloatQuantizer::new(self.registry, idx)?;
                    if let Some(source) = external {
                        let quantizer = AnyQuantizer::Float(quantizer);
                        let column = ExternalColumn::new(Arc::clone(source), quantizer);
                        built.set(feature, QuantizedColumn::External(column))?;
                        external_count += 1;
                        continue;
                    }
                    let values = sources.float(idx)?;
                    let cost = column_cost(&values, &quantizer, object_count);
                    executor.add(cost, move || {
                        materialize_column(values, &quantizer, &ctx)
                            .map(|column| Produced::Column(feature, column))
                    });
                }
                FeatureType::Categorical => {
                    let quantizer = CategoricalQuantizer::new(self.registry, idx)?;
                    if let Some(source) = external {
                        let quantizer = AnyQuantizer::Categorical(quantizer);
                        let column = ExternalColumn::new(Arc::clone(source), quantizer);
                        built.set(feature, QuantizedColumn::External(column))?;
                        external_count += 1;
                        continue;
                    }
                    let values = sources.categorical(idx)?;
                    let cost = column_cost(&values, &quantizer, object_count);
                    executor.add(cost, move || {
                        materialize_column(values, &quantizer, &ctx)
                            .map(|column| Produced::Column(feature, column))
                    });
                }
                FeatureType::Text => {}
            }
        }
        if external_count > 0 {
            debug!(columns = external_count, "keeping columns as external views of the raw data");
        }

        self.add_aggregates(&mut executor, &plan.packs, Produced::Pack, &mut sources, ctx)?;
        self.add_aggregates(&mut executor, &plan.groups, Produced::Group, &mut sources, ctx)?;
        drop(sources);

        for produced in executor.exec_tasks(self.parallelism)? {
            match produced {
                Produced::Column(feature, column) => built.set(feature, column)?,
                Produced::Bundle(idx, cells) => built.bundle_cells[idx] = Some(cells),
                Produced::Pack(idx, cells) => built.pack_cells[idx] = Some(cells),
                Produced::Group(idx, cells) => built.group_cells[idx] = Some(cells),
            }
        }

        for (idx, bundle) in self.plan.bundles.iter().enumerate() {
            for (feature, view) in part_views(bundle, idx) {
                built.set(feature, view)?;
            }
        }
        for (idx, pack) in self.plan.packs.iter().enumerate() {
            for (feature, view) in part_views(pack, idx) {
                built.set(feature, view)?;
            }
        }
        for (idx, group) in self.plan.groups.iter().enumerate() {
            for (feature, view) in part_views(group, idx) {
                built.set(feature, view)?;
            }
        }
        Ok(built)
    }

    fn add_aggregates<'a, A: ColumnAggregate>(
        &self,
        executor: &mut ResourceConstrainedExecutor<'a, Produced>,
        aggregates: &'a [A],
        produced: fn(usize, CompressedArray) -> Produced,
        sources: &mut ColumnSources<'a>,
        ctx: MaterializeContext<'a>,
    ) -> Result<()> {
        for (idx, aggregate) in aggregates.iter().enumerate() {
            let parts = (0..aggregate.parts_count())
                .map(|part_idx| sources.part(self.registry, aggregate.source_part(part_idx)))
                .collect::<Result<Vec<_>>>()?;
            let cost = estimate_column_memory(ctx.object_count(), aggregate.bit_width(), None);
            executor.add(cost, move || {
                aggregate_columns(aggregate, parts, &ctx).map(|cells| produced(idx, cells))
            });
        }
        Ok(())
    }
}

fn column_cost<Q: ValueQuantizer>(
    values: &RawValues<Q::Value>,
    quantizer: &Q,
    object_count: usize,
) -> u64 {
    let stored = quantizer.default_bin().map(|_| values.stored_len());
    estimate_column_memory(object_count, quantizer.bit_width(), stored)
}
