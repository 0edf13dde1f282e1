//! Convolution geometry and the choice between convolution protocol variants.
use crate::constants::CONV_OPTI_FILTER_THRESHOLD;
use crate::errors::Result;
use crate::window::{output_size, Padding2D};

use serde::{Deserialize, Serialize};

/// Protocol variant used for a 2-D convolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConvStrategy {
    General,
    /// Trades local computation for less communication; pays off for large filters.
    CommunicationOptimized,
}

impl ConvStrategy {
    /// Picks the variant from the filter shape alone, never from the data.
    pub fn select(filter_h: usize, filter_w: usize, optimization_enabled: bool) -> Self {
        if optimization_enabled
            && (filter_h >= CONV_OPTI_FILTER_THRESHOLD || filter_w >= CONV_OPTI_FILTER_THRESHOLD)
        {
            ConvStrategy::CommunicationOptimized
        } else {
            ConvStrategy::General
        }
    }
}

fn check_positive(what: &str, values: &[usize]) -> Result<()> {
    if values.iter().any(|v| *v == 0) {
        return Err(precondition_error!(
            "{} must all be positive, got {:?}",
            what,
            values
        ));
    }
    Ok(())
}

/// 2-D convolution over `[N, H, W, CI]` activations with a `[FH, FW, CI / groups, CO]` filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conv2DParams {
    pub n: usize,
    pub h: usize,
    pub w: usize,
    pub ci: usize,
    pub fh: usize,
    pub fw: usize,
    pub co: usize,
    pub padding: Padding2D,
    pub stride_h: usize,
    pub stride_w: usize,
}

impl Conv2DParams {
    pub fn validate(&self, groups: usize) -> Result<()> {
        check_positive(
            "Convolution filter, stride and group sizes",
            &[self.fh, self.fw, self.stride_h, self.stride_w, groups],
        )?;
        if self.ci % groups != 0 || self.co % groups != 0 {
            return Err(precondition_error!(
                "{} input and {} output channels cannot be split into {} groups",
                self.ci,
                self.co,
                groups
            ));
        }
        Ok(())
    }

    pub fn output_dims(&self) -> (usize, usize) {
        (
            output_size(
                self.h,
                self.padding.h_left,
                self.padding.h_right,
                self.fh,
                self.stride_h,
            ),
            output_size(
                self.w,
                self.padding.w_left,
                self.padding.w_right,
                self.fw,
                self.stride_w,
            ),
        )
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [self.n, self.h, self.w, self.ci]
    }

    pub fn filter_shape(&self, groups: usize) -> [usize; 4] {
        [self.fh, self.fw, self.ci / groups, self.co]
    }

    pub fn output_shape(&self) -> [usize; 4] {
        let (out_h, out_w) = self.output_dims();
        [self.n, out_h, out_w, self.co]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Padding3D {
    pub d_left: usize,
    pub d_right: usize,
    pub h_left: usize,
    pub h_right: usize,
    pub w_left: usize,
    pub w_right: usize,
}

/// 3-D convolution over `[N, D, H, W, CI]` activations with a `[FD, FH, FW, CI, CO]` filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conv3DParams {
    pub n: usize,
    pub d: usize,
    pub h: usize,
    pub w: usize,
    pub ci: usize,
    pub fd: usize,
    pub fh: usize,
    pub fw: usize,
    pub co: usize,
    pub padding: Padding3D,
    pub stride_d: usize,
    pub stride_h: usize,
    pub stride_w: usize,
}

impl Conv3DParams {
    pub fn validate(&self) -> Result<()> {
        check_positive(
            "3-D convolution filter and stride sizes",
            &[
                self.fd,
                self.fh,
                self.fw,
                self.stride_d,
                self.stride_h,
                self.stride_w,
            ],
        )
    }

    pub fn input_shape(&self) -> [usize; 5] {
        [self.n, self.d, self.h, self.w, self.ci]
    }

    pub fn filter_shape(&self) -> [usize; 5] {
        [self.fd, self.fh, self.fw, self.ci, self.co]
    }

    pub fn output_shape(&self) -> [usize; 5] {
        let p = &self.padding;
        [
            self.n,
            output_size(self.d, p.d_left, p.d_right, self.fd, self.stride_d),
            output_size(self.h, p.h_left, p.h_right, self.fh, self.stride_h),
            output_size(self.w, p.w_left, p.w_right, self.fw, self.stride_w),
            self.co,
        ]
    }
}

/// Transposed 3-D convolution from `[N, D_in, H_in, W_in, CI]` activations to
/// `[N, D_out, H_out, W_out, CO]` with a `[FD, FH, FW, CO, CI]` filter.
///
/// Equivalent to a stride-1 convolution with the flipped filter over the input
/// dilated by the strides and padded by `padding`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConvTranspose3DParams {
    pub n: usize,
    pub d_in: usize,
    pub h_in: usize,
    pub w_in: usize,
    pub ci: usize,
    pub fd: usize,
    pub fh: usize,
    pub fw: usize,
    pub co: usize,
    pub d_out: usize,
    pub h_out: usize,
    pub w_out: usize,
    pub padding: Padding3D,
    pub stride_d: usize,
    pub stride_h: usize,
    pub stride_w: usize,
}

fn transposed_output_size(
    input: usize,
    pad_left: usize,
    pad_right: usize,
    kernel: usize,
    stride: usize,
) -> usize {
    let dilated = if input == 0 { 0 } else { (input - 1) * stride + 1 };
    output_size(dilated, pad_left, pad_right, kernel, 1)
}

impl ConvTranspose3DParams {
    pub fn validate(&self) -> Result<()> {
        check_positive(
            "Transposed convolution filter and stride sizes",
            &[
                self.fd,
                self.fh,
                self.fw,
                self.stride_d,
                self.stride_h,
                self.stride_w,
            ],
        )?;
        let p = &self.padding;
        let expected = [
            transposed_output_size(self.d_in, p.d_left, p.d_right, self.fd, self.stride_d),
            transposed_output_size(self.h_in, p.h_left, p.h_right, self.fh, self.stride_h),
            transposed_output_size(self.w_in, p.w_left, p.w_right, self.fw, self.stride_w),
        ];
        let declared = [self.d_out, self.h_out, self.w_out];
        if expected != declared {
            return Err(precondition_error!(
                "Transposed convolution output {:?} does not follow from its input, filter and padding (expected {:?})",
                declared,
                expected
            ));
        }
        Ok(())
    }

    pub fn input_shape(&self) -> [usize; 5] {
        [self.n, self.d_in, self.h_in, self.w_in, self.ci]
    }

    pub fn filter_shape(&self) -> [usize; 5] {
        [self.fd, self.fh, self.fw, self.co, self.ci]
    }

    pub fn output_shape(&self) -> [usize; 5] {
        [self.n, self.d_out, self.h_out, self.w_out, self.co]
    }
}
