//! # Patch - restructured sample feed
//!
//! In-memory container for the data handed to the aggregation engine by the
//! restructuring stage. Each process holds one [`HzFeed`] per collective call:
//!
//! ```text
//! HzFeed (variables start_var..=end_var)
//!   └── PatchGroup p          (box-aligned or irregular)
//!         ├── HzLevel l       (linear index range, sample count, missing blocks)
//!         └── buffer[var][l]  (contiguous bytes for that level's samples)
//! ```
//!
//! Everything is owned by the feed and addressed by small integer handles
//! (patch, variable, level), so no references escape into the engine.
//! Variables are addressed by their absolute dataset index.

use std::ops::RangeInclusive;
use thiserror::Error;

/// Errors raised when building or addressing a feed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("invalid variable range {start}..={end}")]
    InvalidVariableRange { start: usize, end: usize },

    #[error("variable {0} is not part of this feed")]
    UnknownVariable(usize),

    #[error("patch group {0} does not exist")]
    UnknownPatch(usize),

    #[error("level {0} is outside the patch group's level range")]
    UnknownLevel(usize),

    #[error("patch group carries {found} variables, feed expects {expected}")]
    VariableCountMismatch { expected: usize, found: usize },

    /// Missing blocks exceed the level's index span.
    #[error("level {level}: missing blocks exceed the index span")]
    NegativeCount { level: usize },
}

/// How the samples of a patch group are laid out in linear index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchGroupKind {
    /// Box-aligned group: every level is one contiguous index span.
    Regular,
    /// Non-contiguous group: per-sample indices must be coalesced into runs.
    Irregular,
}

/// One Z-order level of a patch group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HzLevel {
    pub start_hz_index: u64,
    pub end_hz_index: u64,
    /// Number of samples stored for this level in the local buffer.
    pub samples: u64,
    /// Blocks inside `[start_hz_index, end_hz_index]` that do not exist.
    pub missing_blocks: u64,
    /// Linear index of each stored sample, in buffer order. Only populated
    /// for irregular groups.
    pub sample_indices: Vec<u64>,
}

impl HzLevel {
    /// A level holding no samples.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A box-aligned level covering `count` indices from `start`.
    pub fn contiguous(start: u64, count: u64) -> Self {
        if count == 0 {
            return Self::empty();
        }
        Self {
            start_hz_index: start,
            end_hz_index: start + count - 1,
            samples: count,
            missing_blocks: 0,
            sample_indices: Vec::new(),
        }
    }

    /// An irregular level whose samples sit at `indices` (buffer order).
    pub fn scattered(indices: Vec<u64>) -> Self {
        let start = indices.iter().copied().min().unwrap_or(0);
        let end = indices.iter().copied().max().unwrap_or(0);
        Self {
            start_hz_index: start,
            end_hz_index: end,
            samples: indices.len() as u64,
            missing_blocks: 0,
            sample_indices: indices,
        }
    }

    pub fn with_missing_blocks(mut self, missing_blocks: u64) -> Self {
        self.missing_blocks = missing_blocks;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Number of samples a box-aligned level moves in one run:
    /// `end - start + 1 - missing_blocks * samples_per_block`.
    pub fn bulk_count(&self, level: usize, samples_per_block: u64) -> Result<u64, PatchError> {
        if self.is_empty() {
            return Ok(0);
        }
        let span = self.end_hz_index - self.start_hz_index + 1;
        span.checked_sub(self.missing_blocks * samples_per_block)
            .ok_or(PatchError::NegativeCount { level })
    }
}

/// A group of patches restructured onto this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchGroup {
    kind: PatchGroupKind,
    level_from: usize,
    levels: Vec<HzLevel>,
    /// `buffers[var][level - level_from]`.
    buffers: Vec<Vec<Vec<u8>>>,
}

impl PatchGroup {
    /// Creates a group whose levels start at `level_from`; buffers start empty.
    pub fn new(
        kind: PatchGroupKind,
        level_from: usize,
        levels: Vec<HzLevel>,
        variable_count: usize,
    ) -> Self {
        let buffers = vec![vec![Vec::new(); levels.len()]; variable_count];
        Self {
            kind,
            level_from,
            levels,
            buffers,
        }
    }

    #[must_use]
    pub fn kind(&self) -> PatchGroupKind {
        self.kind
    }

    #[must_use]
    pub fn level_from(&self) -> usize {
        self.level_from
    }

    /// One past the last level of the group.
    #[must_use]
    pub fn level_to(&self) -> usize {
        self.level_from + self.levels.len()
    }

    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn level(&self, level: usize) -> Result<&HzLevel, PatchError> {
        level
            .checked_sub(self.level_from)
            .and_then(|i| self.levels.get(i))
            .ok_or(PatchError::UnknownLevel(level))
    }

    /// Levels with their absolute level numbers, ascending.
    pub fn levels(&self) -> impl Iterator<Item = (usize, &HzLevel)> {
        let from = self.level_from;
        self.levels.iter().enumerate().map(move |(i, l)| (from + i, l))
    }

    /// Buffer of the `slot`-th variable of the group (0-based within the feed).
    pub fn buffer(&self, slot: usize, level: usize) -> Result<&[u8], PatchError> {
        let i = self.level_slot(level)?;
        self.buffers
            .get(slot)
            .map(|levels| levels[i].as_slice())
            .ok_or(PatchError::UnknownVariable(slot))
    }

    pub fn buffer_mut(&mut self, slot: usize, level: usize) -> Result<&mut [u8], PatchError> {
        let i = self.level_slot(level)?;
        self.buffers
            .get_mut(slot)
            .map(|levels| levels[i].as_mut_slice())
            .ok_or(PatchError::UnknownVariable(slot))
    }

    pub fn set_buffer(&mut self, slot: usize, level: usize, bytes: Vec<u8>) -> Result<(), PatchError> {
        let i = self.level_slot(level)?;
        let levels = self
            .buffers
            .get_mut(slot)
            .ok_or(PatchError::UnknownVariable(slot))?;
        levels[i] = bytes;
        Ok(())
    }

    fn level_slot(&self, level: usize) -> Result<usize, PatchError> {
        level
            .checked_sub(self.level_from)
            .filter(|i| *i < self.levels.len())
            .ok_or(PatchError::UnknownLevel(level))
    }
}

/// All patch groups one process contributes to a collective call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HzFeed {
    start_var: usize,
    end_var: usize,
    groups: Vec<PatchGroup>,
}

impl HzFeed {
    /// Creates an empty feed for variables `start_var..=end_var`.
    pub fn new(start_var: usize, end_var: usize) -> Result<Self, PatchError> {
        if end_var < start_var {
            return Err(PatchError::InvalidVariableRange {
                start: start_var,
                end: end_var,
            });
        }
        Ok(Self {
            start_var,
            end_var,
            groups: Vec::new(),
        })
    }

    #[must_use]
    pub fn variables(&self) -> RangeInclusive<usize> {
        self.start_var..=self.end_var
    }

    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.end_var - self.start_var + 1
    }

    /// Appends a group and returns its handle.
    pub fn push(&mut self, group: PatchGroup) -> Result<usize, PatchError> {
        if group.variable_count() != self.variable_count() {
            return Err(PatchError::VariableCountMismatch {
                expected: self.variable_count(),
                found: group.variable_count(),
            });
        }
        self.groups.push(group);
        Ok(self.groups.len() - 1)
    }

    #[must_use]
    pub fn groups(&self) -> &[PatchGroup] {
        &self.groups
    }

    pub fn group(&self, patch: usize) -> Result<&PatchGroup, PatchError> {
        self.groups.get(patch).ok_or(PatchError::UnknownPatch(patch))
    }

    pub fn group_mut(&mut self, patch: usize) -> Result<&mut PatchGroup, PatchError> {
        self.groups
            .get_mut(patch)
            .ok_or(PatchError::UnknownPatch(patch))
    }

    /// Level buffer of `variable` (absolute dataset index).
    pub fn buffer(&self, patch: usize, variable: usize, level: usize) -> Result<&[u8], PatchError> {
        let slot = self.slot(variable)?;
        self.group(patch)?.buffer(slot, level)
    }

    pub fn buffer_mut(
        &mut self,
        patch: usize,
        variable: usize,
        level: usize,
    ) -> Result<&mut [u8], PatchError> {
        let slot = self.slot(variable)?;
        self.group_mut(patch)?.buffer_mut(slot, level)
    }

    pub fn set_buffer(
        &mut self,
        patch: usize,
        variable: usize,
        level: usize,
        bytes: Vec<u8>,
    ) -> Result<(), PatchError> {
        let slot = self.slot(variable)?;
        self.group_mut(patch)?.set_buffer(slot, level, bytes)
    }

    /// Replaces every level buffer with zeroes sized for its samples.
    ///
    /// `bytes_per_sample` is indexed by absolute variable number. Used to
    /// prepare a feed as the destination of a read.
    pub fn zeroed_buffers(&mut self, bytes_per_sample: impl Fn(usize) -> usize) {
        let start_var = self.start_var;
        for group in &mut self.groups {
            for (slot, levels) in group.buffers.iter_mut().enumerate() {
                let width = bytes_per_sample(start_var + slot);
                for (buf, level) in levels.iter_mut().zip(&group.levels) {
                    *buf = vec![0u8; level.samples as usize * width];
                }
            }
        }
    }

    fn slot(&self, variable: usize) -> Result<usize, PatchError> {
        if self.variables().contains(&variable) {
            Ok(variable - self.start_var)
        } else {
            Err(PatchError::UnknownVariable(variable))
        }
    }
}

#[cfg(test)]
mod tests;
