//! Transfer executor: moves one fragment between the local level buffer and
//! the owning aggregator's channel buffer.
//!
//! - Owner is this rank: plain copy into/out of the local window region.
//! - Owner is a peer: `lock_shared` → `put`/`get` → `unlock` on the target.
//!   The unlock is issued even when the transfer fails, then the failure is
//!   returned; it voids the whole collective call.

use comm::RmaWindow;

use crate::error::{AggError, Result};
use crate::router::Fragment;

/// Direction of a collective call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Level buffers → aggregation buffers (write path).
    Store,
    /// Aggregation buffers → level buffers (read path).
    Load,
}

/// The run's slice of the local level buffer, borrowed for the direction.
pub enum RunBuffer<'a> {
    Store(&'a [u8]),
    Load(&'a mut [u8]),
}

impl RunBuffer<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            RunBuffer::Store(b) => b.len(),
            RunBuffer::Load(b) => b.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether a fragment was served locally or by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    Local,
    Remote,
}

/// Executes `fragment` for the rank `me`.
pub fn execute<W: RmaWindow>(
    window: &W,
    me: usize,
    fragment: &Fragment,
    run: &mut RunBuffer<'_>,
) -> Result<Served> {
    let range = fragment.run_offset..fragment.run_offset + fragment.len;
    assert!(
        range.end <= run.len(),
        "fragment {range:?} exceeds run of {} bytes",
        run.len()
    );
    let target = fragment.target_rank;
    let offset = fragment.target_offset;
    let fail = |source| AggError::Transfer {
        target_rank: target,
        offset,
        len: fragment.len,
        source,
    };

    if target == me {
        let copied = match run {
            RunBuffer::Store(src) => window.store_local(offset, &src[range]),
            RunBuffer::Load(dst) => window.load_local(offset, &mut dst[range]),
        };
        copied.map_err(fail)?;
        return Ok(Served::Local);
    }

    window.lock_shared(target).map_err(fail)?;
    let moved = match run {
        RunBuffer::Store(src) => window.put(target, offset, &src[range]),
        RunBuffer::Load(dst) => window.get(target, offset, &mut dst[range]),
    };
    let released = window.unlock(target);
    moved.map_err(fail)?;
    released.map_err(fail)?;
    Ok(Served::Remote)
}
