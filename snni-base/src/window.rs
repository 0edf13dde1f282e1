//! Receptive-field extraction (im2col) for pooling layers.
//!
//! Windows are enumerated batch-major, then channel, then by the position of
//! their top-left corner, rows outer and columns inner. Samples falling into
//! the padding read as the additive identity, so downstream reductions never
//! branch on borders.
use crate::errors::Result;
use crate::marshal::check_shape;

use ndarray::{Array2, Array4, ArrayView4};
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// Zero padding added on each side of the two spatial axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Padding2D {
    pub h_left: usize,
    pub h_right: usize,
    pub w_left: usize,
    pub w_right: usize,
}

impl Padding2D {
    pub fn new(h_left: usize, h_right: usize, w_left: usize, w_right: usize) -> Self {
        Padding2D {
            h_left,
            h_right,
            w_left,
            w_right,
        }
    }

    pub fn symmetric(pad_h: usize, pad_w: usize) -> Self {
        Self::new(pad_h, pad_h, pad_w, pad_w)
    }
}

/// Number of window positions along one axis:
/// `floor((input + pad_left + pad_right - kernel) / stride) + 1`, or 0 if the
/// kernel does not fit into the padded input at all.
pub fn output_size(
    input: usize,
    pad_left: usize,
    pad_right: usize,
    kernel: usize,
    stride: usize,
) -> usize {
    (input + pad_left + pad_right)
        .checked_sub(kernel)
        .map_or(0, |span| span / stride + 1)
}

/// Kernel, stride and padding of a 2-D sliding window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window2D {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub padding: Padding2D,
}

impl Window2D {
    pub fn new(kernel_h: usize, kernel_w: usize, stride_h: usize, stride_w: usize) -> Self {
        Window2D {
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            padding: Padding2D::default(),
        }
    }

    pub fn with_padding(mut self, padding: Padding2D) -> Self {
        self.padding = padding;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.kernel_h == 0 || self.kernel_w == 0 {
            return Err(precondition_error!(
                "Window kernel must be non-empty, got {}x{}",
                self.kernel_h,
                self.kernel_w
            ));
        }
        if self.stride_h == 0 || self.stride_w == 0 {
            return Err(precondition_error!(
                "Window stride must be positive, got {}x{}",
                self.stride_h,
                self.stride_w
            ));
        }
        Ok(())
    }

    /// Entries per receptive-field row.
    pub fn kernel_len(&self) -> usize {
        self.kernel_h * self.kernel_w
    }

    /// Output height and width for an `img_h` x `img_w` input.
    pub fn output_dims(&self, img_h: usize, img_w: usize) -> (usize, usize) {
        (
            output_size(
                img_h,
                self.padding.h_left,
                self.padding.h_right,
                self.kernel_h,
                self.stride_h,
            ),
            output_size(
                img_w,
                self.padding.w_left,
                self.padding.w_right,
                self.kernel_w,
                self.stride_w,
            ),
        )
    }

    /// Shape `[N, outH, outW, C]` produced from an input of shape `[N, H, W, C]`.
    pub fn output_shape(&self, input_shape: &[usize]) -> [usize; 4] {
        let (out_h, out_w) = self.output_dims(input_shape[1], input_shape[2]);
        [input_shape[0], out_h, out_w, input_shape[3]]
    }

    /// Calls `visit` once per receptive field, in extraction order, with a
    /// row of `kernel_h * kernel_w` samples ordered by (filter row, filter column).
    ///
    /// The row buffer is reused between calls. Returns the number of rows visited.
    pub fn for_each_window<A, F>(&self, input: ArrayView4<A>, mut visit: F) -> usize
    where
        A: Copy + Zero,
        F: FnMut(&[A]),
    {
        let (batch, img_h, img_w, channels) = input.dim();
        let (out_h, out_w) = self.output_dims(img_h, img_w);
        let mut row = vec![A::zero(); self.kernel_len()];
        let mut rows = 0;
        for n in 0..batch {
            for c in 0..channels {
                for oh in 0..out_h {
                    let top = (oh * self.stride_h) as i64 - self.padding.h_left as i64;
                    for ow in 0..out_w {
                        let left = (ow * self.stride_w) as i64 - self.padding.w_left as i64;
                        for fh in 0..self.kernel_h {
                            let h = top + fh as i64;
                            for fw in 0..self.kernel_w {
                                let w = left + fw as i64;
                                let inside =
                                    h >= 0 && h < img_h as i64 && w >= 0 && w < img_w as i64;
                                row[fh * self.kernel_w + fw] = if inside {
                                    input[[n, h as usize, w as usize, c]]
                                } else {
                                    A::zero()
                                };
                            }
                        }
                        visit(&row);
                        rows += 1;
                    }
                }
            }
        }
        rows
    }

    /// Materializes every receptive field as one row of a
    /// `(N * C * outH * outW) x (kernel_h * kernel_w)` matrix.
    pub fn extract<A>(&self, input: ArrayView4<A>) -> Result<Array2<A>>
    where
        A: Copy + Zero,
    {
        self.validate()?;
        let (batch, img_h, img_w, channels) = input.dim();
        let (out_h, out_w) = self.output_dims(img_h, img_w);
        let rows = batch * channels * out_h * out_w;
        let mut buffer = Vec::with_capacity(rows * self.kernel_len());
        self.for_each_window(input, |row| buffer.extend_from_slice(row));
        Ok(Array2::from_shape_vec((rows, self.kernel_len()), buffer)?)
    }

    /// Reduces every receptive field to a single value without materializing
    /// the window matrix. Results are in extraction order.
    pub fn reduce<A, F>(&self, input: ArrayView4<A>, mut reduce: F) -> Result<Vec<A>>
    where
        A: Copy + Zero,
        F: FnMut(&[A]) -> A,
    {
        self.validate()?;
        let mut reduced = vec![];
        self.for_each_window(input, |row| reduced.push(reduce(row)));
        Ok(reduced)
    }
}

/// Writes per-window results, indexed `n*C*H*W + c*H*W + h*W + w`, into the
/// `[batch, row, col, channel]` tensor `out`.
pub fn scatter_windows_nhwc<A: Copy>(reduced: &[A], out: &mut Array4<A>) -> Result<()> {
    let (batch, out_h, out_w, channels) = out.dim();
    check_shape(
        "Window reduction",
        &ndarray::ArrayView1::from(reduced),
        &[batch * channels * out_h * out_w],
    )?;
    let plane = out_h * out_w;
    for n in 0..batch {
        for c in 0..channels {
            for h in 0..out_h {
                for w in 0..out_w {
                    out[[n, h, w, c]] = reduced[n * channels * plane + c * plane + h * out_w + w];
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Share, ShareTensor4};
    use ndarray::array;

    fn numbered_input(n: usize, h: usize, w: usize, c: usize) -> ShareTensor4 {
        ShareTensor4::from_shape_fn((n, h, w, c), |(i, j, k, l)| {
            (1 + ((i * h + j) * w + k) * c + l) as Share
        })
    }

    #[test]
    fn test_output_size() {
        assert_eq!(output_size(4, 0, 0, 2, 2), 2);
        assert_eq!(output_size(5, 0, 0, 2, 2), 2);
        assert_eq!(output_size(5, 1, 1, 3, 1), 5);
        assert_eq!(output_size(7, 1, 0, 3, 2), 3);
        assert_eq!(output_size(1, 0, 0, 3, 1), 0);
        assert_eq!(output_size(1, 1, 1, 3, 1), 1);
    }

    #[test]
    fn test_extract_order() {
        || -> Result<()> {
            let input = numbered_input(1, 3, 3, 1);
            let rows = Window2D::new(2, 2, 1, 1).extract(input.view())?;
            assert_eq!(
                rows,
                array![[1, 2, 4, 5], [2, 3, 5, 6], [4, 5, 7, 8], [5, 6, 8, 9]]
            );
            Ok(())
        }()
        .unwrap();
    }

    #[test]
    fn test_extract_rectangular_window() {
        || -> Result<()> {
            // 3 x 4 image numbered 1..=12 row by row.
            let input = numbered_input(1, 3, 4, 1);
            let window = Window2D::new(1, 2, 2, 1);
            assert_eq!(window.output_dims(3, 4), (2, 3));
            let rows = window.extract(input.view())?;
            assert_eq!(
                rows,
                array![[1, 2], [2, 3], [3, 4], [9, 10], [10, 11], [11, 12]]
            );

            let window = Window2D::new(2, 3, 1, 2);
            assert_eq!(window.output_dims(3, 4), (2, 1));
            let rows = window.extract(input.view())?;
            assert_eq!(rows, array![[1, 2, 3, 5, 6, 7], [5, 6, 7, 9, 10, 11]]);
            Ok(())
        }()
        .unwrap();
    }

    #[test]
    fn test_extract_channel_major() {
        || -> Result<()> {
            // Channel-interleaved input: element (h, w, c) = 1 + 2*(2h + w) + c.
            let input = numbered_input(1, 2, 2, 2);
            let rows = Window2D::new(1, 1, 1, 1).extract(input.view())?;
            assert_eq!(
                rows.into_raw_vec(),
                vec![1, 3, 5, 7, 2, 4, 6, 8]
            );
            Ok(())
        }()
        .unwrap();
    }

    #[test]
    fn test_extract_padding_is_zero() {
        || -> Result<()> {
            let input = numbered_input(1, 2, 2, 1);
            let window = Window2D::new(2, 2, 1, 1).with_padding(Padding2D::new(1, 0, 0, 1));
            let rows = window.extract(input.view())?;
            // Corners start at rows {-1, 0} and columns {0, 1}.
            assert_eq!(
                rows,
                array![[0, 0, 1, 2], [0, 0, 2, 0], [1, 2, 3, 4], [2, 0, 4, 0]]
            );
            Ok(())
        }()
        .unwrap();
    }

    #[test]
    fn test_row_count_and_padding_positions() {
        || -> Result<()> {
            for (n, h, w, c) in [(1, 4, 4, 1), (2, 5, 3, 3), (1, 1, 6, 2)] {
                let input = numbered_input(n, h, w, c);
                for (kernel_h, kernel_w) in [(1, 1), (2, 2), (3, 3), (1, 3), (3, 2)] {
                    for (stride_h, stride_w) in [(1, 1), (2, 2), (1, 2), (3, 1)] {
                        for pad in 0..=2 {
                            let padding = Padding2D::new(pad, pad / 2, pad / 2, pad);
                            let window = Window2D::new(kernel_h, kernel_w, stride_h, stride_w)
                                .with_padding(padding);
                            let out_h = output_size(h, pad, pad / 2, kernel_h, stride_h);
                            let out_w = output_size(w, pad / 2, pad, kernel_w, stride_w);
                            assert_eq!(window.output_dims(h, w), (out_h, out_w));
                            let rows = window.extract(input.view())?;
                            assert_eq!(rows.nrows(), n * c * out_h * out_w);
                            assert_eq!(rows.ncols(), kernel_h * kernel_w);

                            let mut r = 0;
                            for b in 0..n {
                                for ch in 0..c {
                                    for oh in 0..out_h {
                                        for ow in 0..out_w {
                                            for fh in 0..kernel_h {
                                                for fw in 0..kernel_w {
                                                    let y = (oh * stride_h + fh) as i64
                                                        - padding.h_left as i64;
                                                    let x = (ow * stride_w + fw) as i64
                                                        - padding.w_left as i64;
                                                    let expected = if y < 0
                                                        || x < 0
                                                        || y >= h as i64
                                                        || x >= w as i64
                                                    {
                                                        0
                                                    } else {
                                                        input[[b, y as usize, x as usize, ch]]
                                                    };
                                                    assert_eq!(
                                                        rows[[r, fh * kernel_w + fw]],
                                                        expected
                                                    );
                                                }
                                            }
                                            r += 1;
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
            Ok(())
        }()
        .unwrap();
    }

    #[test]
    fn test_reduce_matches_extract() {
        || -> Result<()> {
            let input = numbered_input(2, 5, 4, 3);
            let window = Window2D::new(3, 2, 2, 1).with_padding(Padding2D::symmetric(1, 1));
            let rows = window.extract(input.view())?;
            let sums = window.reduce(input.view(), |row| row.iter().sum())?;
            let expected: Vec<Share> = rows.rows().into_iter().map(|r| r.sum()).collect();
            assert_eq!(sums, expected);
            Ok(())
        }()
        .unwrap();
    }

    #[test]
    fn test_invalid_window() {
        let input = numbered_input(1, 2, 2, 1);
        assert!(Window2D::new(0, 2, 1, 1).extract(input.view()).is_err());
        assert!(Window2D::new(2, 2, 0, 1)
            .reduce(input.view(), |row| row[0])
            .is_err());
    }

    #[test]
    fn test_scatter_nhwc() {
        || -> Result<()> {
            // N=1, C=2, H=1, W=2: flat order is (c0,w0), (c0,w1), (c1,w0), (c1,w1).
            let mut out = ShareTensor4::zeros((1, 1, 2, 2));
            scatter_windows_nhwc(&[10, 11, 20, 21], &mut out)?;
            assert_eq!(out[[0, 0, 0, 0]], 10);
            assert_eq!(out[[0, 0, 1, 0]], 11);
            assert_eq!(out[[0, 0, 0, 1]], 20);
            assert_eq!(out[[0, 0, 1, 1]], 21);

            assert!(scatter_windows_nhwc(&[1, 2, 3], &mut out).is_err());
            Ok(())
        }()
        .unwrap();
    }
}
