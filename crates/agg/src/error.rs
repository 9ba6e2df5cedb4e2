//! Error taxonomy of the aggregation engine.
//!
//! Any error returned from a collective call voids that call: the caller must
//! treat the destination buffers as inconsistent and redo the timestep.

use comm::CommError;
use layout::LayoutError;
use patch::PatchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggError {
    /// Fewer processes than aggregation channels.
    #[error("{processes} processes cannot cover {channels} aggregation channels")]
    NotEnoughProcesses { processes: usize, channels: usize },

    #[error("cannot allocate {bytes} byte aggregation buffer for file {file}, variable {variable}, channel {channel}")]
    Allocation {
        bytes: usize,
        file: usize,
        variable: usize,
        channel: usize,
    },

    /// A one-sided put/get (or its lock bracket) failed.
    #[error("transfer of {len} bytes at offset {offset} on rank {target_rank} failed: {source}")]
    Transfer {
        target_rank: usize,
        offset: usize,
        len: usize,
        source: CommError,
    },

    #[error("window error: {0}")]
    Window(CommError),

    /// A run addresses a (file, variable, channel) nobody owns.
    #[error("no owner for file {file}, variable {variable}, channel {channel}")]
    Unowned {
        file: usize,
        variable: usize,
        channel: usize,
    },

    /// A level buffer is shorter than the samples it claims to hold.
    #[error("variable {variable}: run needs {needed} bytes of local buffer, {available} available")]
    ShortBuffer {
        variable: usize,
        needed: usize,
        available: usize,
    },

    #[error("variable range {start}..={end} invalid for a dataset with {count} variables")]
    VariableRange {
        start: usize,
        end: usize,
        count: usize,
    },

    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("patch error: {0}")]
    Patch(#[from] PatchError),

    /// Lifecycle call out of order.
    #[error("invalid session state: {0}")]
    State(&'static str),
}

pub type Result<T> = std::result::Result<T, AggError>;
