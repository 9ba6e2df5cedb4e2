//! # Trace - per-rank aggregation diagnostics
//!
//! An append-only text log, one file per rank (`<dir>/rank_<r>`), recording
//! every fragment an aggregation call moves. Purely diagnostic: nothing reads
//! it back, and the engine keeps working if it cannot be written.
//!
//! ## Line format
//!
//! ```text
//! variable 0
//! level 3
//! whole remote rank=4 bytes=64 local=0 target=128
//! head local rank=0 bytes=16 local=0 target=48
//! end owned=0/0/1 bytes=512 crc32=1c291ca3
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use trace::{FragmentShape, TraceRecord, TraceSink};
//!
//! let mut sink = TraceSink::open("agg-trace", 3).unwrap();
//! sink.record(&TraceRecord::Variable(0)).unwrap();
//! sink.record(&TraceRecord::Fragment {
//!     shape: FragmentShape::Whole,
//!     remote: true,
//!     target_rank: 0,
//!     bytes: 64,
//!     local_offset: 0,
//!     target_offset: 128,
//! }).unwrap();
//! sink.close().unwrap();
//! ```

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur on the diagnostics path.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("cannot create trace directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("cannot open trace file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Position of a fragment within the run it was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentShape {
    /// The run fits inside one channel.
    Whole,
    /// Fills the rest of the first channel.
    Head,
    /// A full channel between head and tail.
    Middle,
    /// The remainder in the last channel.
    Tail,
}

impl fmt::Display for FragmentShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FragmentShape::Whole => "whole",
            FragmentShape::Head => "head",
            FragmentShape::Middle => "middle",
            FragmentShape::Tail => "tail",
        };
        f.write_str(s)
    }
}

/// One line of the trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    Variable(usize),
    Level(usize),
    Fragment {
        shape: FragmentShape,
        remote: bool,
        target_rank: usize,
        bytes: usize,
        /// Byte offset in the local level buffer.
        local_offset: usize,
        /// Byte offset in the target's aggregation buffer.
        target_offset: usize,
    },
    /// Closing line; carries the owned buffer's triple and CRC32 if any.
    End {
        owned: Option<(usize, usize, usize)>,
        bytes: usize,
        crc32: u32,
    },
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceRecord::Variable(v) => write!(f, "variable {v}"),
            TraceRecord::Level(l) => write!(f, "level {l}"),
            TraceRecord::Fragment {
                shape,
                remote,
                target_rank,
                bytes,
                local_offset,
                target_offset,
            } => write!(
                f,
                "{shape} {} rank={target_rank} bytes={bytes} local={local_offset} target={target_offset}",
                if *remote { "remote" } else { "local" }
            ),
            TraceRecord::End {
                owned: Some((file, var, channel)),
                bytes,
                crc32,
            } => write!(f, "end owned={file}/{var}/{channel} bytes={bytes} crc32={crc32:08x}"),
            TraceRecord::End { owned: None, .. } => write!(f, "end owned=none"),
        }
    }
}

/// Append-only trace writer.
///
/// Generic over any `Write` implementor so tests can capture into memory.
pub struct TraceSink<W: Write = BufWriter<File>> {
    out: W,
}

impl TraceSink<BufWriter<File>> {
    /// Creates `dir` if needed and opens `<dir>/rank_<rank>` in append mode.
    pub fn open<P: AsRef<Path>>(dir: P, rank: usize) -> Result<Self, TraceError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| TraceError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = Self::path_for(dir, rank);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TraceError::Open { path, source })?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Path of the trace file `rank` writes under `dir`.
    #[must_use]
    pub fn path_for(dir: &Path, rank: usize) -> PathBuf {
        dir.join(format!("rank_{rank}"))
    }
}

impl<W: Write> TraceSink<W> {
    pub fn from_writer(out: W) -> Self {
        Self { out }
    }

    /// Appends one line.
    pub fn record(&mut self, record: &TraceRecord) -> Result<(), TraceError> {
        writeln!(self.out, "{record}")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TraceError> {
        self.out.flush()?;
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    pub fn close(mut self) -> Result<W, TraceError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// A sink whose writer type has been erased, as held by long-lived sessions.
pub type BoxedTraceSink = TraceSink<Box<dyn Write + Send>>;

impl<W: Write + Send + 'static> TraceSink<W> {
    pub fn boxed(self) -> BoxedTraceSink {
        TraceSink {
            out: Box::new(self.out),
        }
    }
}

#[cfg(test)]
mod tests;
