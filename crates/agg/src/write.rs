/// Write path: level buffers of the feed → aggregation buffers.
///
/// Every rank contributes its runs; after the call each owner's channel
/// buffer holds every sample of its (file, variable, channel) that any rank
/// supplied. Bytes no rank supplied keep their previous value.
use comm::ProcessGroup;
use patch::HzFeed;

use crate::drive::FeedAccess;
use crate::{Aggregator, Result};

impl<G: ProcessGroup> Aggregator<G> {
    /// Collectively moves the samples of `feed` into the aggregation buffers.
    ///
    /// On error the aggregation buffers are inconsistent for this call; the
    /// window has still been closed on every rank.
    pub fn write(&mut self, feed: &HzFeed) -> Result<()> {
        self.collective(FeedAccess::Store(feed))
    }
}
