//! Aggregator assignment: which rank owns each (file, variable, channel).
//!
//! Every rank runs the same walk over the same metadata, so the resulting
//! table is identical everywhere and no ownership metadata is exchanged.
//!
//! ```text
//! aggregator_interval = size / (Σ values_per_sample × existing_files × aggregation_factor)
//!
//! ChannelMajor:  for file { for var { for channel { next rank } } }
//! FileMajor:     for var { for channel { for file { next rank } } }
//!
//! ranks handed out: 0, interval, 2×interval, ...   (mod size)
//! ```

use std::ops::RangeInclusive;

use config::AssignmentOrder;
use layout::{DatasetDescriptor, DerivedMetadata};

use crate::error::{AggError, Result};

/// Rank-ownership table, built identically on every rank.
///
/// Stored as one flat arena indexed by `file * per_file + var_offset[var] + channel`,
/// where `per_file` is the total channel count of all variables in range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipTable {
    start_var: usize,
    file_count: usize,
    /// Prefix sums of channels per variable; `len == variables + 1`.
    var_offsets: Vec<usize>,
    ranks: Vec<Option<usize>>,
}

impl OwnershipTable {
    fn new(start_var: usize, file_count: usize, channels_per_var: &[usize]) -> Self {
        let mut var_offsets = Vec::with_capacity(channels_per_var.len() + 1);
        var_offsets.push(0);
        for c in channels_per_var {
            var_offsets.push(var_offsets.last().copied().unwrap_or(0) + c);
        }
        let per_file = var_offsets.last().copied().unwrap_or(0);
        Self {
            start_var,
            file_count,
            var_offsets,
            ranks: vec![None; file_count * per_file],
        }
    }

    fn slot(&self, file: usize, variable: usize, channel: usize) -> Option<usize> {
        let v = variable.checked_sub(self.start_var)?;
        let base = *self.var_offsets.get(v)?;
        let next = *self.var_offsets.get(v + 1)?;
        if file >= self.file_count || channel >= next - base {
            return None;
        }
        Some(file * self.per_file() + base + channel)
    }

    fn per_file(&self) -> usize {
        self.var_offsets.last().copied().unwrap_or(0)
    }

    fn set(&mut self, file: usize, variable: usize, channel: usize, rank: usize) {
        if let Some(i) = self.slot(file, variable, channel) {
            self.ranks[i] = Some(rank);
        }
    }

    /// Owner of `(file, variable, channel)`; `None` for files that hold no
    /// blocks or indices outside the table.
    #[must_use]
    pub fn rank(&self, file: usize, variable: usize, channel: usize) -> Option<usize> {
        self.slot(file, variable, channel).and_then(|i| self.ranks[i])
    }

    /// Number of channels of `variable` (`values_per_sample × aggregation_factor`).
    #[must_use]
    pub fn channels(&self, variable: usize) -> usize {
        variable
            .checked_sub(self.start_var)
            .and_then(|v| Some(self.var_offsets.get(v + 1)? - self.var_offsets.get(v)?))
            .unwrap_or(0)
    }

    /// Every assigned triple with its owner, in table order.
    pub fn owners(&self) -> impl Iterator<Item = ((usize, usize, usize), usize)> + '_ {
        let per_file = self.per_file();
        self.ranks.iter().enumerate().filter_map(move |(i, r)| {
            let rank = (*r)?;
            let file = i / per_file;
            let within = i % per_file;
            let v = self.var_offsets.partition_point(|o| *o <= within) - 1;
            Some(((file, self.start_var + v, within - self.var_offsets[v]), rank))
        })
    }
}

/// The channel buffer owned by this rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationBuffer {
    pub file: usize,
    pub variable: usize,
    pub channel: usize,
    data: Vec<u8>,
}

impl AggregationBuffer {
    /// Allocates a zeroed buffer, reporting allocation failure with context.
    pub(crate) fn allocate((file, variable, channel): (usize, usize, usize), bytes: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| AggError::Allocation {
                bytes,
                file,
                variable,
                channel,
            })?;
        data.resize(bytes, 0);
        Ok(Self {
            file,
            variable,
            channel,
            data,
        })
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub(crate) fn from_parts((file, variable, channel): (usize, usize, usize), data: Vec<u8>) -> Self {
        Self {
            file,
            variable,
            channel,
            data,
        }
    }

    #[must_use]
    pub fn triple(&self) -> (usize, usize, usize) {
        (self.file, self.variable, self.channel)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// CRC32 of the buffer contents.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data);
        hasher.finalize()
    }
}

/// Result of running the assignment on one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub aggregator_interval: usize,
    pub table: OwnershipTable,
    pub buffer: Option<AggregationBuffer>,
}

/// Triples in the order they receive ranks.
pub(crate) fn walk_order(
    order: AssignmentOrder,
    files: &[usize],
    variables: &[(usize, usize)],
) -> Vec<(usize, usize, usize)> {
    let mut out = Vec::new();
    match order {
        AssignmentOrder::ChannelMajor => {
            for &file in files {
                for &(var, channels) in variables {
                    for ch in 0..channels {
                        out.push((file, var, ch));
                    }
                }
            }
        }
        AssignmentOrder::FileMajor => {
            for &(var, channels) in variables {
                for ch in 0..channels {
                    for &file in files {
                        out.push((file, var, ch));
                    }
                }
            }
        }
    }
    out
}

/// Builds the ownership table and, if `rank` is an owner, its zeroed buffer.
pub fn assign(
    dataset: &DatasetDescriptor,
    derived: &DerivedMetadata,
    variables: RangeInclusive<usize>,
    order: AssignmentOrder,
    rank: usize,
    size: usize,
) -> Result<Assignment> {
    let factor = derived.aggregation_factor() as usize;
    let per_var: Vec<(usize, usize)> = variables
        .clone()
        .map(|v| (v, dataset.variables[v].values_per_sample as usize * factor))
        .collect();

    let files = derived.existing_file_index();
    let channels: usize = per_var.iter().map(|(_, c)| c).sum::<usize>() * files.len();
    if channels == 0 {
        return Err(AggError::State("dataset has no existing files to aggregate"));
    }
    let aggregator_interval = size / channels;
    if aggregator_interval == 0 {
        return Err(AggError::NotEnoughProcesses {
            processes: size,
            channels,
        });
    }

    let counts: Vec<usize> = per_var.iter().map(|(_, c)| *c).collect();
    let mut table = OwnershipTable::new(*variables.start(), derived.max_file_count(), &counts);
    let mut owned = None;

    for (i, (file, var, ch)) in walk_order(order, files, &per_var).into_iter().enumerate() {
        let owner = (i * aggregator_interval) % size;
        table.set(file, var, ch, owner);
        if owner == rank && owned.is_none() {
            owned = Some((file, var, ch));
        }
    }

    let buffer = match owned {
        Some((file, var, ch)) => {
            let bytes = derived.existing_blocks_in_file(file) as usize
                * (derived.samples_per_block() / derived.aggregation_factor()) as usize
                * dataset.bytes_per_element(var);
            tracing::debug!(rank, file, variable = var, channel = ch, bytes, "aggregator buffer allocated");
            Some(AggregationBuffer::allocate((file, var, ch), bytes)?)
        }
        None => None,
    };

    tracing::debug!(
        rank,
        size,
        channels,
        aggregator_interval,
        ?order,
        owner = buffer.is_some(),
        "aggregators assigned"
    );

    Ok(Assignment {
        aggregator_interval,
        table,
        buffer,
    })
}
