//! Fragment router: turns a contiguous run of linear indices into the
//! fragments that land in each aggregator's channel buffer.
//!
//! ## Offset arithmetic
//!
//! All quantities below are in *values* (samples × values_per_sample) until
//! the final multiplication by `bytes_per_element`.
//!
//! ```text
//! file_no        = start / samples_per_file
//! file_base      = file_no × samples_per_file + missing_before(block_no) × samples_per_block
//! channel_extent = samples_in_file / aggregation_factor
//! disp           = ((start − file_base) × vps) mod (samples_in_file × vps)
//! channel        = disp / channel_extent
//! disp           = disp mod channel_extent
//! last           = (disp + count × vps − 1) / channel_extent
//! ```
//!
//! `last == 0` yields one fragment. Otherwise the run is cut into a head
//! filling the first channel from `disp`, `last − 1` full middle channels and
//! a tail; middle and tail start at offset 0 of their channel.
//!
//! ```text
//!   channel c          channel c+1        channel c+2
//! ┌────────┬───────┐ ┌────────────────┐ ┌──────┬─────────┐
//! │        │ head  │ │     middle     │ │ tail │         │
//! └────────┴───────┘ └────────────────┘ └──────┴─────────┘
//!          ^disp
//! ```

use layout::{DatasetDescriptor, DerivedMetadata};
use trace::FragmentShape;

use crate::assignment::OwnershipTable;
use crate::error::{AggError, Result};

/// One maximal contiguous range of linear indices to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunDescriptor {
    pub variable: usize,
    pub start_index: u64,
    /// Number of samples.
    pub count: u64,
    /// Position of the run's first sample inside the local level buffer.
    pub source_offset: u64,
}

/// The atomic unit of transfer: one byte range on one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub shape: FragmentShape,
    pub target_rank: usize,
    /// Byte offset inside the target's channel buffer.
    pub target_offset: usize,
    pub len: usize,
    /// Byte offset relative to the start of the run.
    pub run_offset: usize,
}

/// Byte geometry shared by every run of one variable.
#[derive(Debug, Clone, Copy)]
pub struct VariableGeometry {
    pub values_per_sample: u64,
    pub bytes_per_element: usize,
}

impl VariableGeometry {
    pub fn new(dataset: &DatasetDescriptor, variable: usize) -> Self {
        Self {
            values_per_sample: dataset.variables[variable].values_per_sample as u64,
            bytes_per_element: dataset.bytes_per_element(variable),
        }
    }

    /// Bytes one sample occupies in a level buffer.
    #[must_use]
    pub fn bytes_per_sample(&self) -> usize {
        self.values_per_sample as usize * self.bytes_per_element
    }
}

/// Routes runs against a fixed ownership table.
pub struct Router<'a> {
    pub derived: &'a DerivedMetadata,
    pub table: &'a OwnershipTable,
}

impl Router<'_> {
    /// Splits `run` into fragments whose byte ranges tile `[0, run bytes)`
    /// without gaps or overlap.
    pub fn route(&self, run: &RunDescriptor, geom: VariableGeometry) -> Result<Vec<Fragment>> {
        if run.count == 0 {
            return Ok(Vec::new());
        }
        let derived = self.derived;
        let spb = derived.samples_per_block();
        let samples_per_file = derived.samples_per_file();
        let vps = geom.values_per_sample;
        let elem = geom.bytes_per_element;

        let file_no = (run.start_index / samples_per_file) as usize;
        let block_no = run.start_index / spb;
        let missing = derived.layout().negative_block_offset(block_no);
        let samples_in_file = derived.samples_in_file(file_no);
        assert!(
            samples_in_file <= samples_per_file,
            "file {file_no} holds {samples_in_file} samples, more than {samples_per_file}"
        );

        let file_base = samples_per_file * file_no as u64 + missing * spb;
        assert!(
            run.start_index >= file_base,
            "run start {} precedes file base {file_base}",
            run.start_index
        );
        let extent = samples_in_file / derived.aggregation_factor();
        if extent == 0 {
            // the run points into a file with no blocks
            return Err(AggError::Unowned {
                file: file_no,
                variable: run.variable,
                channel: 0,
            });
        }

        let disp = ((run.start_index - file_base) * vps) % (samples_in_file * vps);
        let channel = (disp / extent) as usize;
        let disp = disp % extent;
        let values = run.count * vps;
        let last = ((disp + values - 1) / extent) as usize;

        let owner = |k: usize| {
            self.table
                .rank(file_no, run.variable, channel + k)
                .ok_or(AggError::Unowned {
                    file: file_no,
                    variable: run.variable,
                    channel: channel + k,
                })
        };
        let bytes = |v: u64| v as usize * elem;

        if last == 0 {
            return Ok(vec![Fragment {
                shape: FragmentShape::Whole,
                target_rank: owner(0)?,
                target_offset: bytes(disp),
                len: bytes(values),
                run_offset: 0,
            }]);
        }

        let head = extent - disp;
        let mut fragments = Vec::with_capacity(last + 1);
        fragments.push(Fragment {
            shape: FragmentShape::Head,
            target_rank: owner(0)?,
            target_offset: bytes(disp),
            len: bytes(head),
            run_offset: 0,
        });
        for k in 1..last {
            fragments.push(Fragment {
                shape: FragmentShape::Middle,
                target_rank: owner(k)?,
                target_offset: 0,
                len: bytes(extent),
                run_offset: bytes(head + (k as u64 - 1) * extent),
            });
        }
        let consumed = head + (last as u64 - 1) * extent;
        fragments.push(Fragment {
            shape: FragmentShape::Tail,
            target_rank: owner(last)?,
            target_offset: 0,
            len: bytes(values - consumed),
            run_offset: bytes(consumed),
        });

        tracing::trace!(
            variable = run.variable,
            start = run.start_index,
            count = run.count,
            file = file_no,
            channel,
            fragments = fragments.len(),
            "run routed"
        );
        Ok(fragments)
    }
}
