//! # Agg - parallel I/O aggregation engine
//!
//! Funnels the restructured samples of every process into a small set of
//! aggregator processes, each owning one contiguous channel buffer of one
//! (file, variable, channel) triple, using one-sided transfers.
//!
//! ## Architecture
//!
//! ```text
//! HzFeed (per process)
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                  AGGREGATOR                   │
//! │                                               │
//! │ build_buffers → assignment.rs                 │
//! │                 (identical table on all ranks)│
//! │                                               │
//! │ write / read  → drive.rs                      │
//! │                   create_window               │
//! │                   plan runs                   │
//! │                   router.rs   run → fragments │
//! │                   executor.rs fragment → RMA  │
//! │                   free_window                 │
//! └───────────────────────────────────────────────┘
//!   |
//!   v
//! aggregation buffer (owners only) → file writer
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                 |
//! |----------------|---------------------------------------------------------|
//! | [`lib.rs`]     | `Aggregator` session, lifecycle, accessors, `Debug`     |
//! | [`assignment`] | aggregator interval, ownership table, buffer allocation |
//! | [`router`]     | run → head/middle/tail fragments                        |
//! | [`executor`]   | local copy or locked put/get per fragment               |
//! | [`drive`]      | run planning and the window bracket                     |
//! | [`write`]      | level buffers → aggregation buffers                     |
//! | [`read`]       | aggregation buffers → level buffers                     |
//!
//! ## Session lifecycle
//!
//! ```text
//! init → set_process_group → build_buffers → (write | read)* → destroy_buffers → finalize
//! ```
//!
//! `build_buffers`, `write` and `read` are collective: every rank of the
//! group must make the same calls in the same order.

mod assignment;
mod drive;
mod error;
mod executor;
mod read;
mod router;
mod stats;
mod write;

use std::sync::Arc;

use comm::ProcessGroup;
use config::AggregationConfig;
use layout::{DatasetDescriptor, DerivedMetadata};
use trace::{BoxedTraceSink, TraceSink};

pub use assignment::{assign, AggregationBuffer, Assignment, OwnershipTable};
pub use error::{AggError, Result};
pub use executor::{execute, Direction, RunBuffer, Served};
pub use router::{Fragment, Router, RunDescriptor, VariableGeometry};
pub use stats::{AggregationStats, LevelKey};

/// One aggregation session over variables `start_var..=end_var`.
///
/// Descriptors are shared read-only with the caller; the session owns its
/// process group handle, assignment and aggregation buffer.
pub struct Aggregator<G: ProcessGroup> {
    pub(crate) dataset: Arc<DatasetDescriptor>,
    pub(crate) derived: Arc<DerivedMetadata>,
    pub(crate) start_var: usize,
    pub(crate) end_var: usize,
    pub(crate) config: AggregationConfig,
    pub(crate) group: Option<G>,
    pub(crate) assignment: Option<Assignment>,
    /// Injected sink, kept open across calls until `finalize`.
    pub(crate) trace_sink: Option<BoxedTraceSink>,
    /// Counters of the last `write`/`read`.
    pub(crate) stats: AggregationStats,
}

impl<G: ProcessGroup> std::fmt::Debug for Aggregator<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("start_var", &self.start_var)
            .field("end_var", &self.end_var)
            .field("order", &self.config.order)
            .field("rank", &self.group.as_ref().map(G::rank))
            .field("size", &self.group.as_ref().map(G::size))
            .field("aggregator_interval", &self.aggregator_interval())
            .field("owned", &self.aggregation_buffer().map(AggregationBuffer::triple))
            .field("tracing", &self.trace_sink.is_some())
            .finish()
    }
}

impl<G: ProcessGroup> Aggregator<G> {
    /// Creates a session for variables `start_var..=end_var` of `dataset`.
    ///
    /// No communication happens here; the process group is attached with
    /// [`set_process_group`](Self::set_process_group).
    pub fn init(
        dataset: Arc<DatasetDescriptor>,
        derived: Arc<DerivedMetadata>,
        start_var: usize,
        end_var: usize,
        config: AggregationConfig,
    ) -> Result<Self> {
        let count = dataset.variables.len();
        if start_var > end_var || end_var >= count {
            return Err(AggError::VariableRange {
                start: start_var,
                end: end_var,
                count,
            });
        }
        dataset.validate()?;
        if dataset.blocks_per_file != derived.blocks_per_file() {
            return Err(AggError::State(
                "dataset and derived metadata disagree on blocks per file",
            ));
        }

        Ok(Self {
            dataset,
            derived,
            start_var,
            end_var,
            config,
            group: None,
            assignment: None,
            trace_sink: None,
            stats: AggregationStats::default(),
        })
    }

    /// Attaches the process group. Replacing the group drops any buffers
    /// built for the previous one.
    pub fn set_process_group(&mut self, group: G) {
        self.assignment = None;
        self.group = Some(group);
    }

    /// Routes every trace line of later calls into `sink`, regardless of the
    /// configured timestep. The sink stays open until `finalize`; a write
    /// failure silences it for the rest of that call only.
    pub fn set_trace_sink<W>(&mut self, sink: TraceSink<W>)
    where
        W: std::io::Write + Send + 'static,
    {
        self.trace_sink = Some(sink.boxed());
    }

    /// Runs the aggregator assignment and allocates this rank's buffer if it
    /// owns a triple. Every rank computes the same table.
    pub fn build_buffers(&mut self) -> Result<()> {
        let group = self
            .group
            .as_ref()
            .ok_or(AggError::State("no process group set"))?;
        let assignment = assign(
            &self.dataset,
            &self.derived,
            self.start_var..=self.end_var,
            self.config.order,
            group.rank(),
            group.size(),
        )?;
        self.assignment = Some(assignment);
        Ok(())
    }

    /// Releases the aggregation buffer and ownership table.
    pub fn destroy_buffers(&mut self) {
        self.assignment = None;
    }

    /// Ends the session and hands the process group back.
    pub fn finalize(mut self) -> Option<G> {
        if let Some(sink) = self.trace_sink.take() {
            if let Err(err) = sink.close() {
                tracing::warn!(error = %err, "trace close failed");
            }
        }
        self.group.take()
    }

    /// Set once `build_buffers` succeeded.
    #[must_use]
    pub fn aggregator_interval(&self) -> Option<usize> {
        self.assignment.as_ref().map(|a| a.aggregator_interval)
    }

    #[must_use]
    pub fn ownership_table(&self) -> Option<&OwnershipTable> {
        self.assignment.as_ref().map(|a| &a.table)
    }

    /// The channel buffer this rank owns, if any. Contents are meaningful
    /// after a successful `write`, and are the source of the next `read`.
    #[must_use]
    pub fn aggregation_buffer(&self) -> Option<&AggregationBuffer> {
        self.assignment.as_ref().and_then(|a| a.buffer.as_ref())
    }

    pub fn aggregation_buffer_mut(&mut self) -> Option<&mut AggregationBuffer> {
        self.assignment.as_mut().and_then(|a| a.buffer.as_mut())
    }

    #[must_use]
    pub fn stats(&self) -> &AggregationStats {
        &self.stats
    }

    #[must_use]
    pub fn group(&self) -> Option<&G> {
        self.group.as_ref()
    }

    #[must_use]
    pub fn dataset(&self) -> &DatasetDescriptor {
        &self.dataset
    }

    #[must_use]
    pub fn derived(&self) -> &DerivedMetadata {
        &self.derived
    }

    #[must_use]
    pub fn variables(&self) -> std::ops::RangeInclusive<usize> {
        self.start_var..=self.end_var
    }
}

#[cfg(test)]
mod tests;
