//! # Config - aggregation session settings
//!
//! Settings that every rank must agree on (the assignment order) plus the
//! optional diagnostics path. Loaded from environment variables with
//! defaults:
//!
//! ```text
//! AGG_ORDER           channel | file          (default: channel)
//! AGG_TRACE_DIR       trace output directory  (default: unset, tracing off)
//! AGG_TRACE_TIMESTEP  timestep to trace       (default: 0)
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Order in which (file, variable, channel) triples receive ranks.
///
/// Every rank walks the same order, so the choice only shifts which ranks
/// end up as aggregators; correctness does not depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentOrder {
    /// Files outermost, channels innermost: the channels of one file and
    /// variable get consecutive ranks.
    #[default]
    ChannelMajor,
    /// Variables outermost, files innermost: the same channel of successive
    /// files gets consecutive ranks.
    FileMajor,
}

impl FromStr for AssignmentOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "channel" | "channel-major" => Ok(AssignmentOrder::ChannelMajor),
            "file" | "file-major" => Ok(AssignmentOrder::FileMajor),
            _ => Err(ConfigError::Invalid {
                key: "AGG_ORDER",
                value: s.to_string(),
                reason: "expected `channel` or `file`",
            }),
        }
    }
}

/// Settings for one aggregation session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregationConfig {
    pub order: AssignmentOrder,
    /// Directory for per-rank trace files; `None` disables tracing.
    pub trace_dir: Option<PathBuf>,
    /// Only calls made at this timestep are traced.
    pub trace_timestep: u32,
}

impl AggregationConfig {
    pub fn with_order(mut self, order: AssignmentOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = Some(dir.into());
        self
    }

    pub fn with_trace_timestep(mut self, timestep: u32) -> Self {
        self.trace_timestep = timestep;
        self
    }

    /// Whether a call at `timestep` should be traced.
    #[must_use]
    pub fn traces(&self, timestep: u32) -> bool {
        self.trace_dir.is_some() && self.trace_timestep == timestep
    }

    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which returns the value of
    /// a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let order: AssignmentOrder = env_or("AGG_ORDER", "channel").parse()?;
        let trace_dir = lookup("AGG_TRACE_DIR")
            .filter(|d| !d.is_empty())
            .map(PathBuf::from);
        let raw = env_or("AGG_TRACE_TIMESTEP", "0");
        let trace_timestep = raw.parse::<u32>().map_err(|_| ConfigError::Invalid {
            key: "AGG_TRACE_TIMESTEP",
            value: raw.clone(),
            reason: "expected a non-negative integer",
        })?;

        Ok(Self {
            order,
            trace_dir,
            trace_timestep,
        })
    }
}

#[cfg(test)]
mod tests;
