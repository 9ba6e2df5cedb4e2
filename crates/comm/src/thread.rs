//! In-process process group: one scoped thread per rank.
//!
//! Each rank's exposed region lives in an `Arc<RwLock<Vec<u8>>>`. Window
//! creation publishes the regions through a shared slot table between two
//! barriers; freeing drops every peer reference, meets at a barrier, and then
//! unwraps the now-unique local region.

use std::cell::Cell;
use std::sync::{Arc, Barrier, Mutex, RwLock};

use crate::{CommError, ProcessGroup, RmaWindow};

type Region = Arc<RwLock<Vec<u8>>>;

struct Shared {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Option<Region>>>,
}

/// Handle of one rank inside an in-process group.
pub struct ThreadGroup {
    rank: usize,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}

impl ThreadGroup {
    /// Runs `f` on `size` ranks concurrently and returns the per-rank results
    /// ordered by rank. A panic on any rank is resumed on the caller.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        F: Fn(ThreadGroup) -> T + Sync,
        T: Send,
    {
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size.max(1)),
            slots: Mutex::new(vec![None; size]),
        });
        let f = &f;

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let group = ThreadGroup {
                        rank,
                        shared: Arc::clone(&shared),
                    };
                    s.spawn(move || f(group))
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Vec<Option<Region>>> {
        // A poisoned slot table only means a peer panicked; the data is a
        // plain table of handles and stays usable.
        self.shared
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProcessGroup for ThreadGroup {
    type Window = ThreadWindow;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.shared.barrier.wait();
        Ok(())
    }

    fn create_window(&self, local: Vec<u8>) -> Result<ThreadWindow, CommError> {
        let exposed = local.len();
        self.slots()[self.rank] = Some(Arc::new(RwLock::new(local)));
        self.shared.barrier.wait();

        let regions: Result<Vec<Region>, CommError> = self
            .slots()
            .iter()
            .enumerate()
            .map(|(r, slot)| slot.clone().ok_or(CommError::MissingRegion(r)))
            .collect();

        // nobody may clear a slot until every rank has collected all regions
        self.shared.barrier.wait();
        self.slots()[self.rank] = None;

        tracing::trace!(rank = self.rank, bytes = exposed, "window created");
        Ok(ThreadWindow {
            rank: self.rank,
            regions: regions?,
            epochs: (0..self.shared.size).map(|_| Cell::new(0)).collect(),
        })
    }

    fn free_window(&self, window: ThreadWindow) -> Result<Vec<u8>, CommError> {
        let open: usize = window.epochs.iter().map(|e| e.get() as usize).sum();
        let own = Arc::clone(&window.regions[self.rank]);
        drop(window);

        // after this barrier every peer has dropped its window as well
        self.shared.barrier.wait();

        if open > 0 {
            return Err(CommError::EpochsOpen(open));
        }
        let region = Arc::try_unwrap(own).map_err(|_| CommError::WindowInUse(self.rank))?;
        let bytes = region
            .into_inner()
            .map_err(|_| CommError::Poisoned(self.rank))?;
        tracing::trace!(rank = self.rank, bytes = bytes.len(), "window freed");
        Ok(bytes)
    }
}

/// A window over every rank's exposed region.
pub struct ThreadWindow {
    rank: usize,
    regions: Vec<Region>,
    /// Open shared-lock epochs per target.
    epochs: Vec<Cell<u32>>,
}

impl ThreadWindow {
    fn region(&self, target: usize) -> Result<&Region, CommError> {
        self.regions.get(target).ok_or(CommError::NoSuchRank {
            target,
            size: self.regions.len(),
        })
    }

    fn require_epoch(&self, target: usize) -> Result<(), CommError> {
        match self.epochs.get(target) {
            Some(e) if e.get() > 0 => Ok(()),
            Some(_) => Err(CommError::NoAccessEpoch(target)),
            None => Err(CommError::NoSuchRank {
                target,
                size: self.regions.len(),
            }),
        }
    }

    fn write_at(&self, target: usize, disp: usize, src: &[u8]) -> Result<(), CommError> {
        let mut region = self
            .region(target)?
            .write()
            .map_err(|_| CommError::Poisoned(target))?;
        let range = checked_range(target, disp, src.len(), region.len())?;
        region[range].copy_from_slice(src);
        Ok(())
    }

    fn read_at(&self, target: usize, disp: usize, dst: &mut [u8]) -> Result<(), CommError> {
        let region = self
            .region(target)?
            .read()
            .map_err(|_| CommError::Poisoned(target))?;
        let range = checked_range(target, disp, dst.len(), region.len())?;
        dst.copy_from_slice(&region[range]);
        Ok(())
    }
}

fn checked_range(
    target: usize,
    disp: usize,
    len: usize,
    size: usize,
) -> Result<std::ops::Range<usize>, CommError> {
    match disp.checked_add(len) {
        Some(end) if end <= size => Ok(disp..end),
        _ => Err(CommError::OutOfBounds {
            target,
            disp,
            len,
            size,
        }),
    }
}

impl RmaWindow for ThreadWindow {
    fn lock_shared(&self, target: usize) -> Result<(), CommError> {
        let epoch = self.epochs.get(target).ok_or(CommError::NoSuchRank {
            target,
            size: self.regions.len(),
        })?;
        epoch.set(epoch.get() + 1);
        Ok(())
    }

    fn unlock(&self, target: usize) -> Result<(), CommError> {
        let epoch = self.epochs.get(target).ok_or(CommError::NoSuchRank {
            target,
            size: self.regions.len(),
        })?;
        if epoch.get() == 0 {
            return Err(CommError::NotLocked(target));
        }
        epoch.set(epoch.get() - 1);
        Ok(())
    }

    fn put(&self, target: usize, disp: usize, src: &[u8]) -> Result<(), CommError> {
        self.require_epoch(target)?;
        self.write_at(target, disp, src)
    }

    fn get(&self, target: usize, disp: usize, dst: &mut [u8]) -> Result<(), CommError> {
        self.require_epoch(target)?;
        self.read_at(target, disp, dst)
    }

    fn store_local(&self, disp: usize, src: &[u8]) -> Result<(), CommError> {
        self.write_at(self.rank, disp, src)
    }

    fn load_local(&self, disp: usize, dst: &mut [u8]) -> Result<(), CommError> {
        self.read_at(self.rank, disp, dst)
    }
}
