use std::cell::{Cell, RefCell};

use comm::{CommError, RmaWindow};
use trace::FragmentShape;

use crate::{execute, AggError, Fragment, RunBuffer, Served};

/// Window that records every call and serves local copies from memory.
#[derive(Default)]
struct CountingWindow {
    local: RefCell<Vec<u8>>,
    locks: Cell<usize>,
    unlocks: Cell<usize>,
    puts: Cell<usize>,
    gets: Cell<usize>,
    fail_put: bool,
}

impl CountingWindow {
    fn with_local(bytes: usize) -> Self {
        Self {
            local: RefCell::new(vec![0; bytes]),
            ..Self::default()
        }
    }

    fn remote_calls(&self) -> usize {
        self.locks.get() + self.unlocks.get() + self.puts.get() + self.gets.get()
    }
}

impl RmaWindow for CountingWindow {
    fn lock_shared(&self, _target: usize) -> Result<(), CommError> {
        self.locks.set(self.locks.get() + 1);
        Ok(())
    }

    fn unlock(&self, _target: usize) -> Result<(), CommError> {
        self.unlocks.set(self.unlocks.get() + 1);
        Ok(())
    }

    fn put(&self, target: usize, _disp: usize, _src: &[u8]) -> Result<(), CommError> {
        self.puts.set(self.puts.get() + 1);
        if self.fail_put {
            return Err(CommError::NoAccessEpoch(target));
        }
        Ok(())
    }

    fn get(&self, _target: usize, _disp: usize, dst: &mut [u8]) -> Result<(), CommError> {
        self.gets.set(self.gets.get() + 1);
        dst.fill(0xAB);
        Ok(())
    }

    fn store_local(&self, disp: usize, src: &[u8]) -> Result<(), CommError> {
        self.local.borrow_mut()[disp..disp + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn load_local(&self, disp: usize, dst: &mut [u8]) -> Result<(), CommError> {
        dst.copy_from_slice(&self.local.borrow()[disp..disp + dst.len()]);
        Ok(())
    }
}

fn fragment(target_rank: usize, target_offset: usize, len: usize, run_offset: usize) -> Fragment {
    Fragment {
        shape: FragmentShape::Whole,
        target_rank,
        target_offset,
        len,
        run_offset,
    }
}

// --------------------- Local path ---------------------

#[test]
fn self_owned_fragment_issues_no_remote_calls() -> anyhow::Result<()> {
    let window = CountingWindow::with_local(8);
    let src = [1u8, 2, 3, 4, 5, 6];

    let served = execute(&window, 2, &fragment(2, 3, 4, 1), &mut RunBuffer::Store(&src))?;
    assert_eq!(served, Served::Local);
    assert_eq!(window.remote_calls(), 0);
    assert_eq!(*window.local.borrow(), vec![0, 0, 0, 2, 3, 4, 5, 0]);
    Ok(())
}

#[test]
fn local_load_copies_back_out() -> anyhow::Result<()> {
    let window = CountingWindow::with_local(4);
    window.local.borrow_mut().copy_from_slice(&[9, 8, 7, 6]);
    let mut dst = [0u8; 3];

    execute(&window, 0, &fragment(0, 1, 2, 1), &mut RunBuffer::Load(&mut dst))?;
    assert_eq!(dst, [0, 8, 7]);
    assert_eq!(window.remote_calls(), 0);
    Ok(())
}

// --------------------- Remote path ---------------------

#[test]
fn remote_fragment_is_bracketed_by_lock_and_unlock() -> anyhow::Result<()> {
    let window = CountingWindow::default();
    let src = [0u8; 4];

    let served = execute(&window, 0, &fragment(3, 0, 4, 0), &mut RunBuffer::Store(&src))?;
    assert_eq!(served, Served::Remote);
    assert_eq!((window.locks.get(), window.puts.get(), window.unlocks.get()), (1, 1, 1));
    Ok(())
}

#[test]
fn remote_load_uses_get() -> anyhow::Result<()> {
    let window = CountingWindow::default();
    let mut dst = [0u8; 4];

    execute(&window, 1, &fragment(0, 0, 2, 2), &mut RunBuffer::Load(&mut dst))?;
    assert_eq!(dst, [0, 0, 0xAB, 0xAB]);
    assert_eq!((window.gets.get(), window.puts.get()), (1, 0));
    Ok(())
}

#[test]
fn failed_put_still_unlocks_and_reports_target() {
    let window = CountingWindow {
        fail_put: true,
        ..CountingWindow::default()
    };
    let src = [0u8; 4];

    let err = execute(&window, 0, &fragment(5, 16, 4, 0), &mut RunBuffer::Store(&src)).unwrap_err();
    assert_eq!(window.unlocks.get(), 1, "epoch left open after failure");
    match err {
        AggError::Transfer {
            target_rank,
            offset,
            len,
            source,
        } => {
            assert_eq!((target_rank, offset, len), (5, 16, 4));
            assert_eq!(source, CommError::NoAccessEpoch(5));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
#[should_panic(expected = "exceeds run")]
fn fragment_past_run_end_panics() {
    let window = CountingWindow::with_local(8);
    let src = [0u8; 2];
    let _ = execute(&window, 0, &fragment(0, 0, 4, 0), &mut RunBuffer::Store(&src));
}
