//! Per-call timing and volume counters.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::executor::Served;

/// Handle of one (patch group, variable, level) triple in the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LevelKey {
    pub patch: usize,
    pub variable: usize,
    pub level: usize,
}

/// Counters collected during the last `write`/`read`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationStats {
    pub window_create: Duration,
    pub window_free: Duration,
    pub runs: usize,
    pub local_fragments: usize,
    pub remote_fragments: usize,
    pub bytes_moved: u64,
    /// Time spent routing and transferring each level.
    pub level_times: BTreeMap<LevelKey, Duration>,
}

impl AggregationStats {
    #[must_use]
    pub fn fragments(&self) -> usize {
        self.local_fragments + self.remote_fragments
    }

    pub(crate) fn record_fragment(&mut self, served: Served, len: usize) {
        match served {
            Served::Local => self.local_fragments += 1,
            Served::Remote => self.remote_fragments += 1,
        }
        self.bytes_moved += len as u64;
    }

    pub(crate) fn record_level(&mut self, key: LevelKey, elapsed: Duration) {
        *self.level_times.entry(key).or_default() += elapsed;
    }
}
