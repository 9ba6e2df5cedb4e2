//! # Layout - dataset and block geometry
//!
//! Read-only metadata consumed by the aggregation engine. Everything here is
//! computed once per dataset open by the surrounding library and then shared
//! by reference for the lifetime of an aggregation session.
//!
//! ## Geometry
//!
//! ```text
//! linear index space (Z-order)
//! ┌──────────── file 0 ────────────┐┌──────────── file 1 ────────────┐
//! │ block 0 │ block 1 │ ... │ b-1  ││ block b │ ...                   │
//! └────────────────────────────────┘└────────────────────────────────┘
//!   samples_per_file = samples_per_block * blocks_per_file
//! ```
//!
//! Blocks may be absent (sparse datasets). A missing block occupies linear
//! index space but no bytes in the file, so every offset computed inside a
//! file is shifted down by the number of missing blocks preceding it.
//!
//! ## Example
//!
//! ```rust
//! use layout::{BlockLayout, DatasetDescriptor, DerivedMetadata, VariableDescriptor};
//!
//! let dataset = DatasetDescriptor::new(2)
//!     .with_variable(VariableDescriptor::new("pressure", 1, 64));
//! let blocks = BlockLayout::dense(1, 2);
//! let derived = DerivedMetadata::new(4, 1, blocks).unwrap();
//! assert_eq!(derived.samples_per_file(), 8);
//! assert_eq!(dataset.bytes_per_element(0), 8);
//! ```

use thiserror::Error;

/// Errors raised while building layout metadata.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// A geometric parameter that must be positive was zero.
    #[error("{0} must be non-zero")]
    Zero(&'static str),

    /// `samples_per_block` is not a multiple of the aggregation factor.
    #[error("samples_per_block {samples_per_block} is not divisible by aggregation factor {aggregation_factor}")]
    UnevenAggregation {
        samples_per_block: u64,
        aggregation_factor: u64,
    },

    /// A block number lies beyond the last file of the layout.
    #[error("block {block} out of range (layout holds {total} blocks)")]
    BlockOutOfRange { block: u64, total: u64 },

    /// `bits_per_value` is not a whole number of bytes.
    #[error("variable {name:?}: bits_per_value {bits} is not a multiple of 8")]
    PartialByte { name: String, bits: u32 },
}

/// Per-variable sample description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDescriptor {
    pub name: String,
    /// Number of scalar values stored per sample (e.g. 3 for a vector field).
    pub values_per_sample: u32,
    /// Width of one scalar value in bits.
    pub bits_per_value: u32,
}

impl VariableDescriptor {
    pub fn new(name: impl Into<String>, values_per_sample: u32, bits_per_value: u32) -> Self {
        Self {
            name: name.into(),
            values_per_sample,
            bits_per_value,
        }
    }

    /// Width of one scalar value in bytes.
    #[must_use]
    pub fn bytes_per_value(&self) -> usize {
        (self.bits_per_value / 8) as usize
    }
}

/// Immutable description of a dataset: variables, file geometry and the
/// compression-block shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDescriptor {
    pub variables: Vec<VariableDescriptor>,
    pub blocks_per_file: u64,
    /// 5-D compression block shape; each element in the linear order stands
    /// for a whole compression block, so element sizes scale by its volume.
    pub compression_block_size: [u64; 5],
    pub current_time_step: u32,
}

impl DatasetDescriptor {
    /// Creates a descriptor with no variables and a unit compression block.
    pub fn new(blocks_per_file: u64) -> Self {
        Self {
            variables: Vec::new(),
            blocks_per_file,
            compression_block_size: [1; 5],
            current_time_step: 0,
        }
    }

    pub fn with_variable(mut self, variable: VariableDescriptor) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_compression_block_size(mut self, shape: [u64; 5]) -> Self {
        self.compression_block_size = shape;
        self
    }

    pub fn with_time_step(mut self, time_step: u32) -> Self {
        self.current_time_step = time_step;
        self
    }

    /// Number of linear elements covered by one compression block.
    #[must_use]
    pub fn compression_volume(&self) -> u64 {
        self.compression_block_size.iter().product()
    }

    /// Bytes occupied by one value of `variable` in the linear layout,
    /// including the compression-block multiplier.
    ///
    /// # Panics
    ///
    /// Panics if `variable` is not a valid index.
    #[must_use]
    pub fn bytes_per_element(&self, variable: usize) -> usize {
        self.variables[variable].bytes_per_value() * self.compression_volume() as usize
    }

    /// Checks that the descriptor is internally consistent.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.blocks_per_file == 0 {
            return Err(LayoutError::Zero("blocks_per_file"));
        }
        if self.compression_volume() == 0 {
            return Err(LayoutError::Zero("compression_block_size"));
        }
        for v in &self.variables {
            if v.values_per_sample == 0 {
                return Err(LayoutError::Zero("values_per_sample"));
            }
            if v.bits_per_value == 0 || v.bits_per_value % 8 != 0 {
                return Err(LayoutError::PartialByte {
                    name: v.name.clone(),
                    bits: v.bits_per_value,
                });
            }
        }
        Ok(())
    }
}

/// Which global blocks exist, file by file.
///
/// Block `b` belongs to file `b / blocks_per_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    blocks_per_file: u64,
    present: Vec<bool>,
}

impl BlockLayout {
    /// A layout where every block of every file exists.
    pub fn dense(file_count: usize, blocks_per_file: u64) -> Self {
        Self {
            blocks_per_file,
            present: vec![true; file_count * blocks_per_file as usize],
        }
    }

    /// A sparse layout spanning `file_count` files where only `existing`
    /// global block numbers are present.
    pub fn from_existing<I>(
        file_count: usize,
        blocks_per_file: u64,
        existing: I,
    ) -> Result<Self, LayoutError>
    where
        I: IntoIterator<Item = u64>,
    {
        if blocks_per_file == 0 {
            return Err(LayoutError::Zero("blocks_per_file"));
        }
        let total = file_count as u64 * blocks_per_file;
        let mut present = vec![false; total as usize];
        for block in existing {
            if block >= total {
                return Err(LayoutError::BlockOutOfRange { block, total });
            }
            present[block as usize] = true;
        }
        Ok(Self {
            blocks_per_file,
            present,
        })
    }

    #[must_use]
    pub fn blocks_per_file(&self) -> u64 {
        self.blocks_per_file
    }

    /// Number of files the layout spans, including files with no blocks.
    #[must_use]
    pub fn file_count(&self) -> usize {
        if self.blocks_per_file == 0 {
            return 0;
        }
        self.present.len() / self.blocks_per_file as usize
    }

    #[must_use]
    pub fn exists(&self, block: u64) -> bool {
        self.present.get(block as usize).copied().unwrap_or(false)
    }

    /// Number of existing blocks in `file`.
    #[must_use]
    pub fn existing_in_file(&self, file: usize) -> u64 {
        let bpf = self.blocks_per_file as usize;
        let start = file * bpf;
        if start >= self.present.len() {
            return 0;
        }
        self.present[start..start + bpf].iter().filter(|p| **p).count() as u64
    }

    /// Number of missing blocks that precede `block` inside its own file.
    ///
    /// Blocks past the end of the layout count as missing.
    #[must_use]
    pub fn negative_block_offset(&self, block: u64) -> u64 {
        let file_start = block - block % self.blocks_per_file;
        (file_start..block).filter(|b| !self.exists(*b)).count() as u64
    }
}

/// Metadata derived once per dataset open and shared across the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedMetadata {
    samples_per_block: u64,
    aggregation_factor: u64,
    layout: BlockLayout,
    existing_file_index: Vec<usize>,
    existing_blocks_per_file: Vec<u64>,
}

impl DerivedMetadata {
    /// Derives per-file populations from `layout`.
    ///
    /// `aggregation_factor` is the number of sub-owners each file channel is
    /// split across; it must divide `samples_per_block`.
    pub fn new(
        samples_per_block: u64,
        aggregation_factor: u64,
        layout: BlockLayout,
    ) -> Result<Self, LayoutError> {
        if samples_per_block == 0 {
            return Err(LayoutError::Zero("samples_per_block"));
        }
        if aggregation_factor == 0 {
            return Err(LayoutError::Zero("aggregation_factor"));
        }
        if layout.blocks_per_file() == 0 {
            return Err(LayoutError::Zero("blocks_per_file"));
        }
        if samples_per_block % aggregation_factor != 0 {
            return Err(LayoutError::UnevenAggregation {
                samples_per_block,
                aggregation_factor,
            });
        }

        let existing_blocks_per_file: Vec<u64> = (0..layout.file_count())
            .map(|f| layout.existing_in_file(f))
            .collect();
        let existing_file_index = existing_blocks_per_file
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .map(|(f, _)| f)
            .collect();

        Ok(Self {
            samples_per_block,
            aggregation_factor,
            layout,
            existing_file_index,
            existing_blocks_per_file,
        })
    }

    #[must_use]
    pub fn samples_per_block(&self) -> u64 {
        self.samples_per_block
    }

    #[must_use]
    pub fn aggregation_factor(&self) -> u64 {
        self.aggregation_factor
    }

    #[must_use]
    pub fn blocks_per_file(&self) -> u64 {
        self.layout.blocks_per_file()
    }

    #[must_use]
    pub fn samples_per_file(&self) -> u64 {
        self.samples_per_block * self.layout.blocks_per_file()
    }

    #[must_use]
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// Indices of files holding at least one block, ascending.
    #[must_use]
    pub fn existing_file_index(&self) -> &[usize] {
        &self.existing_file_index
    }

    #[must_use]
    pub fn existing_file_count(&self) -> usize {
        self.existing_file_index.len()
    }

    /// Number of files the dataset spans (existing or not).
    #[must_use]
    pub fn max_file_count(&self) -> usize {
        self.existing_blocks_per_file.len()
    }

    #[must_use]
    pub fn existing_blocks_in_file(&self, file: usize) -> u64 {
        self.existing_blocks_per_file.get(file).copied().unwrap_or(0)
    }

    /// Samples actually stored in `file` once missing blocks are dropped.
    #[must_use]
    pub fn samples_in_file(&self, file: usize) -> u64 {
        self.existing_blocks_in_file(file) * self.samples_per_block
    }
}

#[cfg(test)]
mod tests;
