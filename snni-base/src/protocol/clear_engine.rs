//! Plaintext stand-in for the secret-sharing engine.
//!
//! `ClearEngine` treats its local buffers as the complete values, so a single
//! process computes what the three parties would reconstruct. It backs dry runs
//! and tests of the dispatch layer. Traffic is simulated: every interactive
//! primitive books one ring element sent and one received per output element.
use crate::constants::SHARE_BYTES;
use crate::conv::{Conv2DParams, Conv3DParams, ConvTranspose3DParams};
use crate::errors::Result;
use crate::protocol::{CommCounters, ProtocolEngine};
use crate::tensor::{Share, ShareTensor4, ShareTensor5, SignedShare};

use ndarray::{ArrayView4, ArrayView5};

/// Primitive invoked on a [`ClearEngine`], in call order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Synchronize,
    Start,
    Finish,
    MatMul,
    Max,
    ArgMax,
    Relu,
    Truncate,
    DotProduct,
    Conv2D,
    Conv2DCommOptimized,
    Conv2DGroup,
    Conv3D,
    ConvTranspose3D,
}

#[derive(Debug, Default)]
pub struct ClearEngine {
    counters: CommCounters,
    history: Vec<Primitive>,
}

fn truncate_value(x: Share, sf: u32) -> Share {
    (x as SignedShare).wrapping_shr(sf) as Share
}

fn signed_max_position(row: &[Share]) -> (usize, Share) {
    let mut best = 0;
    for (i, x) in row.iter().enumerate().skip(1) {
        if (*x as SignedShare) > (row[best] as SignedShare) {
            best = i;
        }
    }
    (best, row[best])
}

/// Position along one axis of a window sample, if it lies inside `[0, len)`.
fn inside(corner: usize, offset: usize, pad_left: usize, len: usize) -> Option<usize> {
    let pos = (corner + offset) as i64 - pad_left as i64;
    if pos >= 0 && pos < len as i64 {
        Some(pos as usize)
    } else {
        None
    }
}

/// Position in a stride-dilated axis of `len` samples, if it hits a sample.
fn dilated(pos: i64, stride: usize, len: usize) -> Option<usize> {
    let stride = stride as i64;
    if pos < 0 || pos % stride != 0 || pos / stride >= len as i64 {
        None
    } else {
        Some((pos / stride) as usize)
    }
}

impl ClearEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[Primitive] {
        &self.history
    }

    fn exchange(&mut self, primitive: Primitive, elements: usize) {
        let bytes = elements as u64 * SHARE_BYTES;
        self.counters.bytes_sent += bytes;
        self.counters.bytes_received += bytes;
        self.history.push(primitive);
    }

    fn conv_2d_grouped(
        params: &Conv2DParams,
        groups: usize,
        input: ArrayView4<Share>,
        filter: ArrayView4<Share>,
        output: &mut ShareTensor4,
    ) {
        let (out_h, out_w) = params.output_dims();
        let ci_per_group = params.ci / groups;
        let co_per_group = params.co / groups;
        for n in 0..params.n {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    for co in 0..params.co {
                        let first_ci = (co / co_per_group) * ci_per_group;
                        let mut acc: Share = 0;
                        for fh in 0..params.fh {
                            let y = match inside(
                                oh * params.stride_h,
                                fh,
                                params.padding.h_left,
                                params.h,
                            ) {
                                Some(y) => y,
                                None => continue,
                            };
                            for fw in 0..params.fw {
                                let x = match inside(
                                    ow * params.stride_w,
                                    fw,
                                    params.padding.w_left,
                                    params.w,
                                ) {
                                    Some(x) => x,
                                    None => continue,
                                };
                                for k in 0..ci_per_group {
                                    acc = acc.wrapping_add(
                                        input[[n, y, x, first_ci + k]]
                                            .wrapping_mul(filter[[fh, fw, k, co]]),
                                    );
                                }
                            }
                        }
                        output[[n, oh, ow, co]] = acc;
                    }
                }
            }
        }
    }
}

impl ProtocolEngine for ClearEngine {
    fn comm_counters(&self) -> CommCounters {
        self.counters
    }

    fn synchronize(&mut self, _buffer_size: u64) -> Result<()> {
        self.history.push(Primitive::Synchronize);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.history.push(Primitive::Start);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.history.push(Primitive::Finish);
        Ok(())
    }

    fn mat_mul(
        &mut self,
        x: &[Share],
        y: &[Share],
        z: &mut [Share],
        i: usize,
        j: usize,
        k: usize,
    ) -> Result<()> {
        for row in 0..i {
            for col in 0..k {
                z[row * k + col] = (0..j).fold(0, |acc: Share, t| {
                    acc.wrapping_add(x[row * j + t].wrapping_mul(y[t * k + col]))
                });
            }
        }
        self.exchange(Primitive::MatMul, i * k);
        Ok(())
    }

    fn max(
        &mut self,
        input: &[Share],
        rows: usize,
        cols: usize,
        maxima: &mut [Share],
        argmax: Option<&mut [Share]>,
    ) -> Result<()> {
        let mut positions = Vec::with_capacity(rows);
        for (r, row) in input.chunks(cols).take(rows).enumerate() {
            let (position, value) = signed_max_position(row);
            maxima[r] = value;
            positions.push(position as Share);
        }
        match argmax {
            Some(indices) => {
                indices[..rows].copy_from_slice(&positions);
                self.exchange(Primitive::ArgMax, 2 * rows);
            }
            None => self.exchange(Primitive::Max, rows),
        }
        Ok(())
    }

    fn relu(&mut self, input: &[Share], output: &mut [Share]) -> Result<()> {
        for (o, x) in output.iter_mut().zip(input) {
            *o = if (*x as SignedShare) > 0 { *x } else { 0 };
        }
        self.exchange(Primitive::Relu, output.len());
        Ok(())
    }

    fn truncate(&mut self, values: &mut [Share], sf: u32) -> Result<()> {
        for x in values.iter_mut() {
            *x = truncate_value(*x, sf);
        }
        self.exchange(Primitive::Truncate, values.len());
        Ok(())
    }

    fn dot_product(&mut self, a: &[Share], b: &[Share], output: &mut [Share]) -> Result<()> {
        for ((o, x), y) in output.iter_mut().zip(a).zip(b) {
            *o = x.wrapping_mul(*y);
        }
        self.exchange(Primitive::DotProduct, output.len());
        Ok(())
    }

    fn conv_2d(
        &mut self,
        params: &Conv2DParams,
        input: ArrayView4<Share>,
        filter: ArrayView4<Share>,
        output: &mut ShareTensor4,
    ) -> Result<()> {
        Self::conv_2d_grouped(params, 1, input, filter, output);
        self.exchange(Primitive::Conv2D, output.len());
        Ok(())
    }

    fn conv_2d_comm_optimized(
        &mut self,
        params: &Conv2DParams,
        input: ArrayView4<Share>,
        filter: ArrayView4<Share>,
        output: &mut ShareTensor4,
    ) -> Result<()> {
        Self::conv_2d_grouped(params, 1, input, filter, output);
        self.exchange(Primitive::Conv2DCommOptimized, output.len());
        Ok(())
    }

    fn conv_2d_group(
        &mut self,
        params: &Conv2DParams,
        groups: usize,
        input: ArrayView4<Share>,
        filter: ArrayView4<Share>,
        output: &mut ShareTensor4,
    ) -> Result<()> {
        Self::conv_2d_grouped(params, groups, input, filter, output);
        self.exchange(Primitive::Conv2DGroup, output.len());
        Ok(())
    }

    fn conv_3d(
        &mut self,
        params: &Conv3DParams,
        input: ArrayView5<Share>,
        filter: ArrayView5<Share>,
        cons_sf: u32,
        output: &mut ShareTensor5,
    ) -> Result<()> {
        let [_, out_d, out_h, out_w, _] = params.output_shape();
        let p = &params.padding;
        for n in 0..params.n {
            for od in 0..out_d {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        for co in 0..params.co {
                            let mut acc: Share = 0;
                            for kd in 0..params.fd {
                                let z = match inside(od * params.stride_d, kd, p.d_left, params.d)
                                {
                                    Some(z) => z,
                                    None => continue,
                                };
                                for kh in 0..params.fh {
                                    let y = match inside(
                                        oh * params.stride_h,
                                        kh,
                                        p.h_left,
                                        params.h,
                                    ) {
                                        Some(y) => y,
                                        None => continue,
                                    };
                                    for kw in 0..params.fw {
                                        let x = match inside(
                                            ow * params.stride_w,
                                            kw,
                                            p.w_left,
                                            params.w,
                                        ) {
                                            Some(x) => x,
                                            None => continue,
                                        };
                                        for ci in 0..params.ci {
                                            acc = acc.wrapping_add(
                                                input[[n, z, y, x, ci]]
                                                    .wrapping_mul(filter[[kd, kh, kw, ci, co]]),
                                            );
                                        }
                                    }
                                }
                            }
                            output[[n, od, oh, ow, co]] = truncate_value(acc, cons_sf);
                        }
                    }
                }
            }
        }
        self.exchange(Primitive::Conv3D, output.len());
        Ok(())
    }

    fn conv_transpose_3d(
        &mut self,
        params: &ConvTranspose3DParams,
        input: ArrayView5<Share>,
        filter: ArrayView5<Share>,
        cons_sf: u32,
        output: &mut ShareTensor5,
    ) -> Result<()> {
        let p = &params.padding;
        for n in 0..params.n {
            for d in 0..params.d_out {
                for h in 0..params.h_out {
                    for w in 0..params.w_out {
                        for co in 0..params.co {
                            let mut acc: Share = 0;
                            for kd in 0..params.fd {
                                let z = (d + kd) as i64 - p.d_left as i64;
                                let z = match dilated(z, params.stride_d, params.d_in) {
                                    Some(z) => z,
                                    None => continue,
                                };
                                for kh in 0..params.fh {
                                    let y = (h + kh) as i64 - p.h_left as i64;
                                    let y = match dilated(y, params.stride_h, params.h_in) {
                                        Some(y) => y,
                                        None => continue,
                                    };
                                    for kw in 0..params.fw {
                                        let x = (w + kw) as i64 - p.w_left as i64;
                                        let x = match dilated(x, params.stride_w, params.w_in) {
                                            Some(x) => x,
                                            None => continue,
                                        };
                                        // The transposed convolution applies the filter flipped.
                                        let flipped = [
                                            params.fd - 1 - kd,
                                            params.fh - 1 - kh,
                                            params.fw - 1 - kw,
                                        ];
                                        for ci in 0..params.ci {
                                            acc = acc.wrapping_add(
                                                input[[n, z, y, x, ci]].wrapping_mul(
                                                    filter[[
                                                        flipped[0], flipped[1], flipped[2], co, ci,
                                                    ]],
                                                ),
                                            );
                                        }
                                    }
                                }
                            }
                            output[[n, d, h, w, co]] = truncate_value(acc, cons_sf);
                        }
                    }
                }
            }
        }
        self.exchange(Primitive::ConvTranspose3D, output.len());
        Ok(())
    }
}
