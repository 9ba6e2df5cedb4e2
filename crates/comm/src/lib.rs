//! # Comm - collective process group with one-sided windows
//!
//! The aggregation engine needs a small slice of an MPI-class RMA runtime:
//!
//! | Primitive            | Collective | Used for                               |
//! |----------------------|------------|----------------------------------------|
//! | `rank` / `size`      | no         | ownership assignment                   |
//! | `create_window`      | yes        | exposing the aggregation buffer        |
//! | `lock_shared`/`unlock` | no       | passive-target access epochs           |
//! | `put` / `get`        | no         | moving a fragment to/from a peer       |
//! | `free_window`        | yes        | closing the exposure, reclaiming bytes |
//! | `barrier`            | yes        | explicit synchronisation               |
//!
//! Collective calls must be made by every member in the same order or the
//! group deadlocks. There is no timeout: a member that never arrives blocks
//! the rest indefinitely.
//!
//! [`ThreadGroup`] implements the traits in-process, one thread per rank,
//! with windows backed by shared memory.
//!
//! ## Example
//!
//! ```rust
//! use comm::{ProcessGroup, RmaWindow, ThreadGroup};
//!
//! let got = ThreadGroup::run(2, |g| {
//!     let win = g.create_window(vec![0u8; 4]).unwrap();
//!     if g.rank() == 1 {
//!         win.lock_shared(0).unwrap();
//!         win.put(0, 1, &[9, 9]).unwrap();
//!         win.unlock(0).unwrap();
//!     }
//!     g.free_window(win).unwrap()
//! });
//! assert_eq!(got[0], vec![0, 9, 9, 0]);
//! ```

mod thread;

pub use thread::{ThreadGroup, ThreadWindow};

use thiserror::Error;

/// Failures of the communication layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommError {
    #[error("rank {target} is outside the group (size {size})")]
    NoSuchRank { target: usize, size: usize },

    /// A put/get was issued outside a lock/unlock epoch on the target.
    #[error("no access epoch open on rank {0}")]
    NoAccessEpoch(usize),

    #[error("unlock of rank {0} without a matching lock")]
    NotLocked(usize),

    #[error("access [{disp}, {disp}+{len}) exceeds window of {size} bytes on rank {target}")]
    OutOfBounds {
        target: usize,
        disp: usize,
        len: usize,
        size: usize,
    },

    #[error("window region of rank {0} is poisoned")]
    Poisoned(usize),

    /// A window was freed while peers still referenced the local region.
    #[error("window region of rank {0} still in use")]
    WindowInUse(usize),

    #[error("window free attempted with {0} access epochs still open")]
    EpochsOpen(usize),

    #[error("rank {0} did not expose a region")]
    MissingRegion(usize),
}

/// A group of cooperating processes.
pub trait ProcessGroup {
    type Window: RmaWindow;

    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Blocks until every member has called `barrier`.
    fn barrier(&self) -> Result<(), CommError>;

    /// Collectively exposes `local` for one-sided access. `local` may be
    /// empty; the caller still takes part in the collective.
    fn create_window(&self, local: Vec<u8>) -> Result<Self::Window, CommError>;

    /// Collectively closes `window` and hands the local region back.
    ///
    /// Returns only once every member has arrived, so no peer can still be
    /// targeting the region.
    fn free_window(&self, window: Self::Window) -> Result<Vec<u8>, CommError>;
}

/// An exposed window. Remote access must be bracketed by
/// [`lock_shared`](RmaWindow::lock_shared) / [`unlock`](RmaWindow::unlock)
/// on the target; local access needs no epoch.
pub trait RmaWindow {
    /// Opens a shared (reader-compatible) access epoch on `target`.
    fn lock_shared(&self, target: usize) -> Result<(), CommError>;

    /// Closes the epoch opened by the matching `lock_shared`.
    fn unlock(&self, target: usize) -> Result<(), CommError>;

    /// Writes `src` at byte `disp` of `target`'s region.
    fn put(&self, target: usize, disp: usize, src: &[u8]) -> Result<(), CommError>;

    /// Reads `dst.len()` bytes at byte `disp` of `target`'s region.
    fn get(&self, target: usize, disp: usize, dst: &mut [u8]) -> Result<(), CommError>;

    /// Copies `src` into the local region at `disp`.
    fn store_local(&self, disp: usize, src: &[u8]) -> Result<(), CommError>;

    /// Copies from the local region at `disp` into `dst`.
    fn load_local(&self, disp: usize, dst: &mut [u8]) -> Result<(), CommError>;
}
