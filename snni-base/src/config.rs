use crate::constants::{DEFAULT_FRACTIONAL_BITS, DEFAULT_SYNC_BUFFER_SIZE};
use crate::errors::Result;
use crate::party::PartyRole;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for fixed precision arithmetic.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Copy)]
pub struct FixedPrecisionConfig {
    /// Number of binary points for fixed precision.
    /// Integer `x` represents `x / 2^fractional_bits`.
    pub fractional_bits: u32,
}

impl Default for FixedPrecisionConfig {
    fn default() -> Self {
        Self {
            fractional_bits: DEFAULT_FRACTIONAL_BITS,
        }
    }
}

impl FixedPrecisionConfig {
    pub fn denominator(&self) -> u64 {
        1 << self.fractional_bits
    }

    /// Fails unless `sf` equals the configured precision.
    ///
    /// Called before any truncation round, since truncating by a different
    /// scale silently produces wrong values on every downstream layer.
    pub fn check_scale(&self, sf: u32) -> Result<()> {
        if sf != self.fractional_bits {
            return Err(precondition_error!(
                "Scale factor {} does not match the configured fixed-point precision {}",
                sf,
                self.fractional_bits
            ));
        }
        Ok(())
    }
}

/// Per-process settings of one party's run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub party: PartyRole,
    pub fixed_precision: FixedPrecisionConfig,
    /// Enables the communication-optimized 2-D convolution for large filters.
    pub conv_optimization: bool,
    pub sync_buffer_size: u64,
    /// Core count used to normalize CPU utilization; the host's available
    /// parallelism when unset.
    pub cores: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            party: PartyRole::A,
            fixed_precision: FixedPrecisionConfig::default(),
            conv_optimization: cfg!(feature = "conv-opti"),
            sync_buffer_size: DEFAULT_SYNC_BUFFER_SIZE,
            cores: None,
        }
    }
}

impl RunConfig {
    pub fn for_party(party: PartyRole) -> Self {
        Self {
            party,
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn cores(&self) -> usize {
        self.cores.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
