//! Drive loop shared by `write` and `read`.
//!
//! One collective call is:
//!
//! ```text
//! create_window(aggregation buffer or empty)      collective
//!   for each planned run:
//!     route → fragments → execute each fragment   one-sided
//! free_window → aggregation buffer restored       collective
//! ```
//!
//! The window is freed even when a run fails, so every rank makes the same
//! sequence of collective calls; the failure is returned afterwards.

use std::time::Instant;

use comm::{ProcessGroup, RmaWindow};
use layout::{DatasetDescriptor, DerivedMetadata};
use patch::{HzFeed, PatchGroupKind};
use trace::{BoxedTraceSink, TraceRecord, TraceSink};

use crate::assignment::{AggregationBuffer, OwnershipTable};
use crate::error::{AggError, Result};
use crate::executor::{execute, RunBuffer, Served};
use crate::router::{Router, RunDescriptor, VariableGeometry};
use crate::stats::{AggregationStats, LevelKey};
use crate::Aggregator;

/// A run together with the level buffer it reads from or writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlannedRun {
    pub patch: usize,
    pub level: usize,
    pub run: RunDescriptor,
}

/// Splits `indices` (buffer order) into maximal runs of consecutive linear
/// indices that stay inside one file. Yields
/// `(start_index, count, position_of_first_sample)`.
pub(crate) fn coalesce(indices: &[u64], samples_per_file: u64) -> Vec<(u64, u64, u64)> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < indices.len() {
        let start = indices[i];
        let mut count = 1usize;
        while i + count < indices.len() {
            let next = start + count as u64;
            if indices[i + count] != next || next % samples_per_file == 0 {
                break;
            }
            count += 1;
        }
        runs.push((start, count as u64, i as u64));
        i += count;
    }
    runs
}

/// Every run the feed contributes, in issue order.
///
/// Regular groups move each non-empty level as one bulk run per variable.
/// Irregular groups coalesce their per-sample indices first and issue every
/// run once per variable.
pub(crate) fn plan_runs(feed: &HzFeed, derived: &DerivedMetadata) -> Result<Vec<PlannedRun>> {
    let samples_per_block = derived.samples_per_block();
    let mut plan = Vec::new();
    for (patch, group) in feed.groups().iter().enumerate() {
        match group.kind() {
            PatchGroupKind::Regular => {
                for variable in feed.variables() {
                    for (level, hz) in group.levels() {
                        let count = hz.bulk_count(level, samples_per_block)?;
                        if count == 0 {
                            continue;
                        }
                        plan.push(PlannedRun {
                            patch,
                            level,
                            run: RunDescriptor {
                                variable,
                                start_index: hz.start_hz_index,
                                count,
                                source_offset: 0,
                            },
                        });
                    }
                }
            }
            PatchGroupKind::Irregular => {
                for (level, hz) in group.levels() {
                    if hz.is_empty() {
                        continue;
                    }
                    let runs = if hz.sample_indices.is_empty() {
                        vec![(hz.start_hz_index, hz.samples, 0)]
                    } else {
                        coalesce(&hz.sample_indices, derived.samples_per_file())
                    };
                    for &(start_index, count, source_offset) in &runs {
                        for variable in feed.variables() {
                            plan.push(PlannedRun {
                                patch,
                                level,
                                run: RunDescriptor {
                                    variable,
                                    start_index,
                                    count,
                                    source_offset,
                                },
                            });
                        }
                    }
                }
            }
        }
    }
    Ok(plan)
}

/// The feed, borrowed for the direction of the call.
pub(crate) enum FeedAccess<'a> {
    Store(&'a HzFeed),
    Load(&'a mut HzFeed),
}

impl FeedAccess<'_> {
    fn feed(&self) -> &HzFeed {
        match self {
            FeedAccess::Store(feed) => *feed,
            FeedAccess::Load(feed) => &**feed,
        }
    }

    /// Bytes `[base, base + len)` of one level buffer.
    fn run_buffer(&mut self, planned: &PlannedRun, base: usize, len: usize) -> Result<RunBuffer<'_>> {
        let variable = planned.run.variable;
        let short = |available: usize| AggError::ShortBuffer {
            variable,
            needed: base + len,
            available,
        };
        match self {
            FeedAccess::Store(feed) => {
                let buf = feed.buffer(planned.patch, variable, planned.level)?;
                if buf.len() < base + len {
                    return Err(short(buf.len()));
                }
                Ok(RunBuffer::Store(&buf[base..base + len]))
            }
            FeedAccess::Load(feed) => {
                let buf = feed.buffer_mut(planned.patch, variable, planned.level)?;
                if buf.len() < base + len {
                    return Err(short(buf.len()));
                }
                Ok(RunBuffer::Load(&mut buf[base..base + len]))
            }
        }
    }
}

/// Trace sink of one collective call.
struct CallTrace {
    sink: Option<BoxedTraceSink>,
    injected: bool,
    failed: bool,
}

impl CallTrace {
    /// Appends `line`. The first failure silences the rest of the call.
    fn record(&mut self, line: &TraceRecord) {
        if self.failed {
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Err(err) = sink.record(line) {
            tracing::warn!(error = %err, "trace write failed, tracing disabled for this call");
            self.failed = true;
        }
    }
}

struct DriveContext<'a> {
    dataset: &'a DatasetDescriptor,
    derived: &'a DerivedMetadata,
    table: &'a OwnershipTable,
    rank: usize,
}

fn move_runs<W: RmaWindow>(
    ctx: &DriveContext<'_>,
    window: &W,
    access: &mut FeedAccess<'_>,
    stats: &mut AggregationStats,
    trace: &mut CallTrace,
) -> Result<()> {
    let router = Router {
        derived: ctx.derived,
        table: ctx.table,
    };
    let plan = plan_runs(access.feed(), ctx.derived)?;
    let mut traced_variable = None;
    let mut traced_level = None;

    for planned in &plan {
        let started = Instant::now();
        let run = planned.run;
        let geom = VariableGeometry::new(ctx.dataset, run.variable);
        let width = geom.bytes_per_sample();
        let base = run.source_offset as usize * width;
        let len = run.count as usize * width;

        let fragments = router.route(&run, geom)?;

        if traced_variable != Some(run.variable) {
            trace.record(&TraceRecord::Variable(run.variable));
            traced_variable = Some(run.variable);
            traced_level = None;
        }
        if traced_level != Some(planned.level) {
            trace.record(&TraceRecord::Level(planned.level));
            traced_level = Some(planned.level);
        }

        let mut buffer = access.run_buffer(planned, base, len)?;
        for fragment in &fragments {
            let served = execute(window, ctx.rank, fragment, &mut buffer)?;
            stats.record_fragment(served, fragment.len);
            trace.record(&TraceRecord::Fragment {
                shape: fragment.shape,
                remote: served == Served::Remote,
                target_rank: fragment.target_rank,
                bytes: fragment.len,
                local_offset: base + fragment.run_offset,
                target_offset: fragment.target_offset,
            });
        }

        stats.runs += 1;
        stats.record_level(
            LevelKey {
                patch: planned.patch,
                variable: run.variable,
                level: planned.level,
            },
            started.elapsed(),
        );
    }
    Ok(())
}

impl<G: ProcessGroup> Aggregator<G> {
    /// Sink for this call: the injected one if present, else a per-call file
    /// when the configuration traces the current timestep.
    fn open_trace(&mut self, rank: usize) -> CallTrace {
        if let Some(sink) = self.trace_sink.take() {
            return CallTrace {
                sink: Some(sink),
                injected: true,
                failed: false,
            };
        }
        let sink = match &self.config.trace_dir {
            Some(dir) if self.config.traces(self.dataset.current_time_step) => {
                match TraceSink::open(dir, rank) {
                    Ok(sink) => Some(sink.boxed()),
                    Err(err) => {
                        tracing::warn!(error = %err, rank, "cannot open trace file, tracing disabled");
                        None
                    }
                }
            }
            _ => None,
        };
        CallTrace {
            sink,
            injected: false,
            failed: false,
        }
    }

    /// Flushes the sink; an injected one goes back to the session.
    fn close_trace(&mut self, trace: CallTrace) {
        let Some(mut sink) = trace.sink else { return };
        if trace.injected {
            if let Err(err) = sink.flush() {
                tracing::warn!(error = %err, "trace flush failed");
            }
            self.trace_sink = Some(sink);
        } else if let Err(err) = sink.close() {
            tracing::warn!(error = %err, "trace close failed");
        }
    }

    /// One collective call in the direction of `access`.
    pub(crate) fn collective(&mut self, mut access: FeedAccess<'_>) -> Result<()> {
        if self.group.is_none() {
            return Err(AggError::State("no process group set"));
        }
        if self.assignment.is_none() {
            return Err(AggError::State("aggregation buffers not built"));
        }
        if access.feed().variables() != (self.start_var..=self.end_var) {
            return Err(AggError::State("feed variable range differs from the session's"));
        }

        let rank = self.group.as_ref().map_or(0, G::rank);
        let mut trace = self.open_trace(rank);

        let Some(mut assignment) = self.assignment.take() else {
            return Err(AggError::State("aggregation buffers not built"));
        };
        let Some(group) = self.group.as_ref() else {
            return Err(AggError::State("no process group set"));
        };

        let mut stats = AggregationStats::default();
        let owned = assignment.buffer.as_ref().map(AggregationBuffer::triple);
        let local = assignment
            .buffer
            .take()
            .map(AggregationBuffer::into_bytes)
            .unwrap_or_default();
        let exposed = local.len();

        let started = Instant::now();
        let window = match group.create_window(local) {
            Ok(window) => window,
            Err(err) => {
                // the exposed region is gone with the failed window
                tracing::error!(rank, error = %err, "window creation failed, buffer contents lost");
                assignment.buffer = owned
                    .map(|triple| AggregationBuffer::allocate(triple, exposed))
                    .transpose()?;
                self.assignment = Some(assignment);
                self.close_trace(trace);
                return Err(AggError::Window(err));
            }
        };
        stats.window_create = started.elapsed();

        let ctx = DriveContext {
            dataset: &self.dataset,
            derived: &self.derived,
            table: &assignment.table,
            rank,
        };
        let moved = move_runs(&ctx, &window, &mut access, &mut stats, &mut trace);
        if let Err(err) = &moved {
            tracing::error!(rank, error = %err, "aggregation call failed, closing window");
        }

        let started = Instant::now();
        let freed = group.free_window(window);
        stats.window_free = started.elapsed();
        let local = match freed {
            Ok(local) => local,
            Err(err) => {
                tracing::error!(rank, error = %err, "window free failed, aggregation buffers dropped");
                self.close_trace(trace);
                return Err(AggError::Window(err));
            }
        };

        assignment.buffer = owned.map(|triple| AggregationBuffer::from_parts(triple, local));
        trace.record(&match &assignment.buffer {
            Some(buffer) => TraceRecord::End {
                owned: Some(buffer.triple()),
                bytes: buffer.len(),
                crc32: buffer.checksum(),
            },
            None => TraceRecord::End {
                owned: None,
                bytes: 0,
                crc32: 0,
            },
        });
        self.assignment = Some(assignment);
        self.close_trace(trace);

        tracing::debug!(
            rank,
            runs = stats.runs,
            local = stats.local_fragments,
            remote = stats.remote_fragments,
            bytes = stats.bytes_moved,
            window_create_us = stats.window_create.as_micros() as u64,
            window_free_us = stats.window_free.as_micros() as u64,
            "aggregation call finished"
        );
        self.stats = stats;
        moved
    }
}
