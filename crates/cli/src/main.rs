//! # aggsim - in-process aggregation driver
//!
//! Simulates a group of ranks with [`comm::ThreadGroup`], builds a synthetic
//! dataset, pushes it through the aggregation engine and reads it back.
//! Every owned channel buffer is checked against the expected file layout
//! and every feed against what it sent.
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! AGG_PROCS    number of simulated ranks      (default: 4)
//! AGG_FILES    files in the dataset           (default: 1)
//! AGG_VARS     variables                      (default: 2)
//! AGG_VPS      values per sample              (default: 1)
//! AGG_BITS     bits per value: 8, 16, 32, 64  (default: 64)
//! AGG_SPB      samples per block              (default: 4)
//! AGG_BPF      blocks per file                (default: 4)
//! AGG_FACTOR   aggregation factor             (default: 1)
//! AGG_LEVELS   maximum HZ levels              (default: 8)
//! AGG_MODE     regular | irregular            (default: regular)
//!
//! AGG_ORDER, AGG_TRACE_DIR, AGG_TRACE_TIMESTEP  see the `config` crate
//! RUST_LOG                                      log filter (default: warn)
//! ```
//!
//! ## Example
//!
//! ```text
//! $ AGG_PROCS=4 AGG_VARS=2 cargo run -p cli
//! aggsim started (procs=4, files=1, vars=2, vps=1, bits=64, spb=4, bpf=4, factor=1, levels=8, mode=regular, order=ChannelMajor)
//! aggregator rank=0 file=0 var=0 channel=0 bytes=128 crc32=xxxxxxxx
//! aggregator rank=2 file=0 var=1 channel=0 bytes=128 crc32=xxxxxxxx
//! write: runs=24 fragments=24 local=4 remote=20 bytes=256
//! read: runs=24 fragments=24 local=4 remote=20 bytes=256
//! verify: OK
//! ```

use std::str::FromStr;
use std::sync::Arc;

use agg::{AggregationStats, Aggregator};
use anyhow::{Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use comm::{ProcessGroup, ThreadGroup};
use config::AggregationConfig;
use layout::{BlockLayout, DatasetDescriptor, DerivedMetadata, VariableDescriptor};
use patch::{HzFeed, HzLevel, PatchGroup, PatchGroupKind};
use tracing_subscriber::EnvFilter;

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = env_or(key, default);
    raw.parse()
        .with_context(|| format!("invalid value {raw:?} for {key}"))
}

/// How each rank's samples are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// One box-aligned group per (level, file) piece.
    Regular,
    /// One irregular group per rank; samples dealt out in strides of 3.
    Irregular,
}

#[derive(Debug, Clone)]
struct Settings {
    procs: usize,
    files: usize,
    vars: usize,
    vps: u32,
    bits: u32,
    spb: u64,
    bpf: u64,
    factor: u64,
    levels: usize,
    mode: Mode,
}

impl Settings {
    fn from_env() -> Result<Self> {
        let mode = match env_or("AGG_MODE", "regular").to_ascii_lowercase().as_str() {
            "regular" => Mode::Regular,
            "irregular" => Mode::Irregular,
            other => anyhow::bail!("invalid value {other:?} for AGG_MODE"),
        };
        let settings = Self {
            procs: parse_env("AGG_PROCS", "4")?,
            files: parse_env("AGG_FILES", "1")?,
            vars: parse_env("AGG_VARS", "2")?,
            vps: parse_env("AGG_VPS", "1")?,
            bits: parse_env("AGG_BITS", "64")?,
            spb: parse_env("AGG_SPB", "4")?,
            bpf: parse_env("AGG_BPF", "4")?,
            factor: parse_env("AGG_FACTOR", "1")?,
            levels: parse_env("AGG_LEVELS", "8")?,
            mode,
        };
        anyhow::ensure!(settings.procs > 0, "AGG_PROCS must be positive");
        anyhow::ensure!(settings.files > 0, "AGG_FILES must be positive");
        anyhow::ensure!(settings.vars > 0, "AGG_VARS must be positive");
        anyhow::ensure!(settings.levels > 0, "AGG_LEVELS must be positive");
        anyhow::ensure!(
            matches!(settings.bits, 8 | 16 | 32 | 64),
            "AGG_BITS must be 8, 16, 32 or 64"
        );
        Ok(settings)
    }

    fn samples_per_file(&self) -> u64 {
        self.spb * self.bpf
    }

    fn total_samples(&self) -> u64 {
        self.samples_per_file() * self.files as u64
    }

    fn metadata(&self) -> Result<(DatasetDescriptor, DerivedMetadata)> {
        let mut dataset = DatasetDescriptor::new(self.bpf);
        for v in 0..self.vars {
            dataset = dataset.with_variable(VariableDescriptor::new(
                format!("field_{v}"),
                self.vps,
                self.bits,
            ));
        }
        let layout = BlockLayout::dense(self.files, self.bpf);
        let derived = DerivedMetadata::new(self.spb, self.factor, layout)?;
        Ok((dataset, derived))
    }

    /// `(level, start, end)` spans: level 0 is `[0, 1)`, level `l` ends at
    /// `2^l`, the last level takes whatever is left.
    fn level_spans(&self) -> Vec<(usize, u64, u64)> {
        let total = self.total_samples();
        let mut spans = Vec::new();
        let mut start = 0;
        for level in 0..self.levels {
            if start >= total {
                break;
            }
            let end = if level + 1 == self.levels {
                total
            } else {
                (1u64 << level.min(63)).min(total)
            };
            spans.push((level, start, end));
            start = end;
        }
        spans
    }

    /// Pieces of `[start, end)` cut at file boundaries.
    fn file_segments(&self, start: u64, end: u64) -> Vec<(u64, u64)> {
        let spf = self.samples_per_file();
        let mut segments = Vec::new();
        let mut s = start;
        while s < end {
            let e = ((s / spf + 1) * spf).min(end);
            segments.push((s, e));
            s = e;
        }
        segments
    }
}

/// Encodes value `k` of `sample` of `var`, little-endian.
fn encode_value(out: &mut Vec<u8>, bits: u32, var: usize, sample: u64, k: u32) -> Result<()> {
    let v = var as f64 * 1.0e6 + sample as f64 + f64::from(k) / 8.0;
    match bits {
        64 => out.write_f64::<LittleEndian>(v)?,
        32 => out.write_f32::<LittleEndian>(v as f32)?,
        16 => out.write_u16::<LittleEndian>((sample as u16).wrapping_mul(7) ^ ((var as u16) << 12) ^ k as u16)?,
        _ => out.push((sample as u8).wrapping_mul(31) ^ ((var as u8) << 5) ^ k as u8),
    }
    Ok(())
}

fn encode_samples(
    settings: &Settings,
    var: usize,
    samples: impl IntoIterator<Item = u64>,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for sample in samples {
        for k in 0..settings.vps {
            encode_value(&mut out, settings.bits, var, sample, k)?;
        }
    }
    Ok(out)
}

/// The feed `rank` contributes.
fn build_feed(settings: &Settings, rank: usize) -> Result<HzFeed> {
    let vars = settings.vars;
    let procs = settings.procs as u64;
    let mut feed = HzFeed::new(0, vars - 1)?;

    match settings.mode {
        Mode::Regular => {
            for (level, start, end) in settings.level_spans() {
                for (s, e) in settings.file_segments(start, end) {
                    let len = e - s;
                    let a = s + len * rank as u64 / procs;
                    let b = s + len * (rank as u64 + 1) / procs;
                    if a == b {
                        continue;
                    }
                    let group = PatchGroup::new(
                        PatchGroupKind::Regular,
                        level,
                        vec![HzLevel::contiguous(a, b - a)],
                        vars,
                    );
                    let p = feed.push(group)?;
                    for var in 0..vars {
                        feed.set_buffer(p, var, level, encode_samples(settings, var, a..b)?)?;
                    }
                }
            }
        }
        Mode::Irregular => {
            let spans = settings.level_spans();
            let mine = |start: u64, end: u64| -> Vec<u64> {
                (start..end).filter(|i| (i / 3) % procs == rank as u64).collect()
            };
            let levels = spans
                .iter()
                .map(|(_, s, e)| HzLevel::scattered(mine(*s, *e)))
                .collect();
            let p = feed.push(PatchGroup::new(PatchGroupKind::Irregular, 0, levels, vars))?;
            for (level, s, e) in spans {
                let indices = mine(s, e);
                for var in 0..vars {
                    let bytes = encode_samples(settings, var, indices.iter().copied())?;
                    feed.set_buffer(p, var, level, bytes)?;
                }
            }
        }
    }
    Ok(feed)
}

/// Bytes channel `channel` of `(file, var)` must hold after a write.
fn expected_channel(settings: &Settings, file: usize, var: usize, channel: usize) -> Result<Vec<u8>> {
    let spf = settings.samples_per_file();
    let vps = u64::from(settings.vps);
    let extent = spf / settings.factor;
    let first = channel as u64 * extent;
    let mut out = Vec::new();
    for value in first..first + extent {
        let sample = file as u64 * spf + value / vps;
        encode_value(&mut out, settings.bits, var, sample, (value % vps) as u32)?;
    }
    Ok(out)
}

struct RankReport {
    rank: usize,
    owned: Option<((usize, usize, usize), Vec<u8>, u32)>,
    write: AggregationStats,
    read: AggregationStats,
    feed: HzFeed,
    read_back: HzFeed,
}

fn run_rank(
    group: ThreadGroup,
    settings: &Settings,
    dataset: &Arc<DatasetDescriptor>,
    derived: &Arc<DerivedMetadata>,
    config: &AggregationConfig,
) -> Result<RankReport> {
    let rank = group.rank();
    let mut session = Aggregator::init(
        Arc::clone(dataset),
        Arc::clone(derived),
        0,
        settings.vars - 1,
        config.clone(),
    )?;
    session.set_process_group(group);
    session.build_buffers()?;

    let feed = build_feed(settings, rank)?;
    session.write(&feed)?;
    let write = session.stats().clone();
    let owned = session
        .aggregation_buffer()
        .map(|b| (b.triple(), b.as_slice().to_vec(), b.checksum()));
    if let (Some(((file, var, channel), _, _)), Some(table)) = (&owned, session.ownership_table()) {
        anyhow::ensure!(
            table.rank(*file, *var, *channel) == Some(rank),
            "rank {rank} holds a buffer the ownership table gives to another rank"
        );
    }

    let mut read_back = feed.clone();
    read_back.zeroed_buffers(|v| settings.vps as usize * session.dataset().bytes_per_element(v));
    session.read(&mut read_back)?;
    let read = session.stats().clone();

    tracing::info!(
        rank,
        owner = owned.is_some(),
        write_us = write.window_create.as_micros() as u64,
        read_us = read.window_create.as_micros() as u64,
        "rank finished"
    );
    session.destroy_buffers();
    session.finalize();
    Ok(RankReport {
        rank,
        owned,
        write,
        read,
        feed,
        read_back,
    })
}

fn print_stats(label: &str, stats: &AggregationStats) {
    println!(
        "{label}: runs={} fragments={} local={} remote={} bytes={}",
        stats.runs,
        stats.fragments(),
        stats.local_fragments,
        stats.remote_fragments,
        stats.bytes_moved
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env()?;
    let config = AggregationConfig::from_env()?;
    let (dataset, derived) = settings.metadata()?;
    let dataset = Arc::new(dataset);
    let derived = Arc::new(derived);

    println!(
        "aggsim started (procs={}, files={}, vars={}, vps={}, bits={}, spb={}, bpf={}, factor={}, levels={}, mode={}, order={:?})",
        settings.procs,
        settings.files,
        settings.vars,
        settings.vps,
        settings.bits,
        settings.spb,
        settings.bpf,
        settings.factor,
        settings.levels,
        match settings.mode {
            Mode::Regular => "regular",
            Mode::Irregular => "irregular",
        },
        config.order
    );

    let results = ThreadGroup::run(settings.procs, |g| {
        run_rank(g, &settings, &dataset, &derived, &config)
    });
    let reports = results.into_iter().collect::<Result<Vec<_>>>()?;

    let mut total_write = AggregationStats::default();
    let mut total_read = AggregationStats::default();
    let mut aggregators = 0;
    for report in &reports {
        if let Some(((file, var, channel), bytes, crc)) = &report.owned {
            aggregators += 1;
            println!(
                "aggregator rank={} file={file} var={var} channel={channel} bytes={} crc32={crc:08x}",
                report.rank,
                bytes.len()
            );
            let expected = expected_channel(&settings, *file, *var, *channel)?;
            anyhow::ensure!(
                *bytes == expected,
                "rank {}: channel buffer of file {file} var {var} channel {channel} differs from the dataset",
                report.rank
            );
        }
        anyhow::ensure!(
            report.feed == report.read_back,
            "rank {}: read returned different samples than were written",
            report.rank
        );
        for (total, stats) in [(&mut total_write, &report.write), (&mut total_read, &report.read)] {
            total.runs += stats.runs;
            total.local_fragments += stats.local_fragments;
            total.remote_fragments += stats.remote_fragments;
            total.bytes_moved += stats.bytes_moved;
        }
    }

    let channels = settings.files * settings.vars * settings.vps as usize * settings.factor as usize;
    anyhow::ensure!(
        aggregators == channels,
        "{aggregators} aggregators for {channels} channels"
    );
    print_stats("write", &total_write);
    print_stats("read", &total_read);
    println!("verify: OK");
    Ok(())
}
