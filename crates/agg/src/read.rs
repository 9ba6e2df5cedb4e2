/// Read path: aggregation buffers → level buffers of the feed.
///
/// The mirror of the write path over the same runs and fragments. The feed's
/// level buffers must already be sized for their samples (see
/// [`patch::HzFeed::zeroed_buffers`]).
use comm::ProcessGroup;
use patch::HzFeed;

use crate::drive::FeedAccess;
use crate::{Aggregator, Result};

impl<G: ProcessGroup> Aggregator<G> {
    /// Collectively fills the level buffers of `feed` from the aggregation
    /// buffers.
    pub fn read(&mut self, feed: &mut HzFeed) -> Result<()> {
        self.collective(FeedAccess::Load(feed))
    }
}
