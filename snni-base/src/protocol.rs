//! The seam towards the secret-sharing protocol engine.
//!
//! Every primitive is blocking: it returns once all rounds of the protocol are
//! complete. Buffers are row-major and already sized by the caller.
pub mod clear_engine;

use crate::conv::{Conv2DParams, Conv3DParams, ConvTranspose3DParams};
use crate::errors::Result;
use crate::tensor::{Share, ShareTensor4, ShareTensor5};

use ndarray::{ArrayView4, ArrayView5};
use serde::{Deserialize, Serialize};

/// Snapshot of the transport's monotonic byte counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommCounters {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl CommCounters {
    /// Bytes exchanged between `earlier` and `self`.
    pub fn since(&self, earlier: &CommCounters) -> CommCounters {
        CommCounters {
            bytes_sent: self.bytes_sent.saturating_sub(earlier.bytes_sent),
            bytes_received: self.bytes_received.saturating_sub(earlier.bytes_received),
        }
    }
}

pub trait ProtocolEngine {
    /// Current totals of the transport. Read-only for callers.
    fn comm_counters(&self) -> CommCounters;

    /// Blocks until every party reached the barrier.
    fn synchronize(&mut self, buffer_size: u64) -> Result<()>;

    /// Prepares the run, e.g. materializes correlated randomness.
    fn start(&mut self) -> Result<()>;

    fn finish(&mut self) -> Result<()>;

    /// `z = x * y` for `x` of shape `i x j` and `y` of shape `j x k`.
    fn mat_mul(
        &mut self,
        x: &[Share],
        y: &[Share],
        z: &mut [Share],
        i: usize,
        j: usize,
        k: usize,
    ) -> Result<()>;

    /// Row-wise maximum of a `rows x cols` matrix; with `argmax`, also the column of each maximum.
    fn max(
        &mut self,
        input: &[Share],
        rows: usize,
        cols: usize,
        maxima: &mut [Share],
        argmax: Option<&mut [Share]>,
    ) -> Result<()>;

    fn relu(&mut self, input: &[Share], output: &mut [Share]) -> Result<()>;

    /// Removes `sf` bits of fixed-point scale in place.
    fn truncate(&mut self, values: &mut [Share], sf: u32) -> Result<()>;

    /// Elementwise product of two secret-shared vectors.
    fn dot_product(&mut self, a: &[Share], b: &[Share], output: &mut [Share]) -> Result<()>;

    fn conv_2d(
        &mut self,
        params: &Conv2DParams,
        input: ArrayView4<Share>,
        filter: ArrayView4<Share>,
        output: &mut ShareTensor4,
    ) -> Result<()>;

    /// Same result as [`ProtocolEngine::conv_2d`] with less communication for large filters.
    fn conv_2d_comm_optimized(
        &mut self,
        params: &Conv2DParams,
        input: ArrayView4<Share>,
        filter: ArrayView4<Share>,
        output: &mut ShareTensor4,
    ) -> Result<()>;

    fn conv_2d_group(
        &mut self,
        params: &Conv2DParams,
        groups: usize,
        input: ArrayView4<Share>,
        filter: ArrayView4<Share>,
        output: &mut ShareTensor4,
    ) -> Result<()>;

    /// 3-D convolution followed by truncation by `cons_sf` bits.
    fn conv_3d(
        &mut self,
        params: &Conv3DParams,
        input: ArrayView5<Share>,
        filter: ArrayView5<Share>,
        cons_sf: u32,
        output: &mut ShareTensor5,
    ) -> Result<()>;

    /// Transposed 3-D convolution followed by truncation by `cons_sf` bits.
    fn conv_transpose_3d(
        &mut self,
        params: &ConvTranspose3DParams,
        input: ArrayView5<Share>,
        filter: ArrayView5<Share>,
        cons_sf: u32,
        output: &mut ShareTensor5,
    ) -> Result<()>;
}
