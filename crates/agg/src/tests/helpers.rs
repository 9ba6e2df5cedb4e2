use std::sync::Arc;

use comm::ProcessGroup;
use config::AggregationConfig;
use layout::{BlockLayout, DatasetDescriptor, DerivedMetadata, VariableDescriptor};
use patch::{HzFeed, HzLevel, PatchGroup, PatchGroupKind};

use crate::{Aggregator, Result};

/// Dataset with one variable per `(values_per_sample, bits_per_value)`.
pub fn dataset(variables: &[(u32, u32)], blocks_per_file: u64) -> Arc<DatasetDescriptor> {
    let mut ds = DatasetDescriptor::new(blocks_per_file);
    for (i, (vps, bits)) in variables.iter().enumerate() {
        ds = ds.with_variable(VariableDescriptor::new(format!("v{i}"), *vps, *bits));
    }
    Arc::new(ds)
}

/// Dense layout over `files` files.
pub fn derived(spb: u64, factor: u64, files: usize, blocks_per_file: u64) -> Arc<DerivedMetadata> {
    let layout = BlockLayout::dense(files, blocks_per_file);
    Arc::new(DerivedMetadata::new(spb, factor, layout).unwrap())
}

/// Deterministic bytes of one sample.
pub fn sample_bytes(variable: usize, index: u64, width: usize) -> Vec<u8> {
    (0..width)
        .map(|k| (variable as u64 * 97 + index * 13 + k as u64 * 7 + 1) as u8)
        .collect()
}

/// Concatenated sample bytes of `indices`, in order.
pub fn samples(variable: usize, indices: impl IntoIterator<Item = u64>, width: usize) -> Vec<u8> {
    indices
        .into_iter()
        .flat_map(|i| sample_bytes(variable, i, width))
        .collect()
}

/// Bytes per sample of every variable in the dataset.
pub fn widths(ds: &DatasetDescriptor) -> Vec<usize> {
    (0..ds.variables.len())
        .map(|v| ds.variables[v].values_per_sample as usize * ds.bytes_per_element(v))
        .collect()
}

/// A feed with one regular group holding `spans` as `(level, start, count)`.
/// Levels must be consecutive starting from the first span's level.
pub fn regular_feed(ds: &DatasetDescriptor, spans: &[(usize, u64, u64)]) -> HzFeed {
    let vars = ds.variables.len();
    let mut feed = HzFeed::new(0, vars - 1).unwrap();
    if spans.is_empty() {
        return feed;
    }
    let level_from = spans[0].0;
    let levels = spans
        .iter()
        .map(|(_, start, count)| HzLevel::contiguous(*start, *count))
        .collect();
    let p = feed
        .push(PatchGroup::new(PatchGroupKind::Regular, level_from, levels, vars))
        .unwrap();
    let w = widths(ds);
    for v in 0..vars {
        for (level, start, count) in spans {
            feed.set_buffer(p, v, *level, samples(v, *start..*start + *count, w[v]))
                .unwrap();
        }
    }
    feed
}

/// A feed with one irregular single-level group holding `indices`.
pub fn irregular_feed(ds: &DatasetDescriptor, level: usize, indices: &[u64]) -> HzFeed {
    let vars = ds.variables.len();
    let mut feed = HzFeed::new(0, vars - 1).unwrap();
    let hz = HzLevel::scattered(indices.to_vec());
    let p = feed
        .push(PatchGroup::new(PatchGroupKind::Irregular, level, vec![hz], vars))
        .unwrap();
    let w = widths(ds);
    for v in 0..vars {
        feed.set_buffer(p, v, level, samples(v, indices.iter().copied(), w[v]))
            .unwrap();
    }
    feed
}

/// `init` + `set_process_group` + `build_buffers` over every variable.
pub fn session<G: ProcessGroup>(
    group: G,
    ds: &Arc<DatasetDescriptor>,
    derived: &Arc<DerivedMetadata>,
    config: AggregationConfig,
) -> Result<Aggregator<G>> {
    let mut agg = Aggregator::init(
        Arc::clone(ds),
        Arc::clone(derived),
        0,
        ds.variables.len() - 1,
        config,
    )?;
    agg.set_process_group(group);
    agg.build_buffers()?;
    Ok(agg)
}
