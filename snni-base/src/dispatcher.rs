//! One entry point per neural-network layer primitive.
//!
//! Every entry validates the declared shapes against the passed tensors, marshals
//! the inputs, invokes exactly one protocol primitive and writes the result into
//! the caller-owned output tensor. Each protocol call is measured by the
//! [`MetricsRecorder`] and booked to the category of the layer.
use crate::config::RunConfig;
use crate::conv::{Conv2DParams, Conv3DParams, ConvStrategy, ConvTranspose3DParams};
use crate::errors::Result;
use crate::marshal::{check_shape, flatten, unflatten_into, with_flat_mut};
use crate::metrics::{MetricsRecorder, OpCategory};
use crate::party::PartyArithmeticPolicy;
use crate::protocol::ProtocolEngine;
use crate::tensor::{Public, Share, ShareMatrix, ShareTensor4, ShareTensor5, ShareVector};
use crate::window::{scatter_windows_nhwc, Window2D};

use log::debug;
use ndarray::{Array, Dimension};

/// Dispatches layer primitives of one party to a [`ProtocolEngine`].
///
/// Obtained from [`crate::lifecycle::ComputationLifecycle::start_computation`], so
/// no layer can run before the parties have synchronized.
#[derive(Debug)]
pub struct OperationDispatcher<E: ProtocolEngine> {
    pub(crate) engine: E,
    pub(crate) policy: Box<dyn PartyArithmeticPolicy>,
    pub(crate) config: RunConfig,
    pub(crate) recorder: MetricsRecorder,
}

impl<E: ProtocolEngine> OperationDispatcher<E> {
    pub(crate) fn new(
        engine: E,
        policy: Box<dyn PartyArithmeticPolicy>,
        config: RunConfig,
        recorder: MetricsRecorder,
    ) -> Self {
        OperationDispatcher {
            engine,
            policy,
            config,
            recorder,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.recorder
    }

    /// Runs `call` as one measured segment booked to `category`.
    fn measured<T, F>(&mut self, op: &'static str, category: Option<OpCategory>, call: F) -> Result<T>
    where
        F: FnOnce(&mut E, &dyn PartyArithmeticPolicy) -> Result<T>,
    {
        let segment = self.recorder.begin(self.engine.comm_counters())?;
        let result = call(&mut self.engine, self.policy.as_ref())?;
        let metric = self
            .recorder
            .finish(segment, op, category, self.engine.comm_counters())?;
        debug!(
            "{} took {:.6} s, sent {} bytes, received {} bytes",
            op, metric.wall_time, metric.bytes_sent, metric.bytes_received
        );
        Ok(result)
    }

    /// `c = a * b` for `a` of shape `i x j` and `b` of shape `j x k`.
    pub fn mat_mul_2d(
        &mut self,
        i: usize,
        j: usize,
        k: usize,
        a: &ShareMatrix,
        b: &ShareMatrix,
        c: &mut ShareMatrix,
    ) -> Result<()> {
        debug!("Starting MatMul2D ...");
        check_shape("MatMul2D left operand", a, &[i, j])?;
        check_shape("MatMul2D right operand", b, &[j, k])?;
        check_shape("MatMul2D output", c, &[i, k])?;
        let x = flatten(a);
        let y = flatten(b);
        let mut z = vec![0; i * k];
        self.measured("matmul", Some(OpCategory::MatMul), |engine, _| {
            engine.mat_mul(&x, &y, &mut z, i, j, k)
        })?;
        unflatten_into(&z, c)
    }

    /// Column index of the maximum of every row of the `s1 x s2` matrix `input`.
    pub fn arg_max(
        &mut self,
        s1: usize,
        s2: usize,
        input: &ShareMatrix,
        output: &mut ShareVector,
    ) -> Result<()> {
        debug!("Starting ArgMax ...");
        if s2 == 0 {
            return Err(precondition_error!("ArgMax needs at least one column"));
        }
        check_shape("ArgMax input", input, &[s1, s2])?;
        check_shape("ArgMax output", output, &[s1])?;
        let flat = flatten(input);
        let mut maxima = vec![0; s1];
        self.measured("argmax", Some(OpCategory::ArgMax), |engine, _| {
            with_flat_mut(output, |indices| {
                engine.max(&flat, s1, s2, &mut maxima, Some(indices))
            })
        })
    }

    /// ReLU of `size` elements, optionally followed by a truncation by `sf` bits.
    ///
    /// The truncation round runs only on parties taking part in truncation.
    pub fn relu(
        &mut self,
        size: usize,
        input: &ShareVector,
        output: &mut ShareVector,
        sf: u32,
        do_truncation: bool,
    ) -> Result<()> {
        debug!("Starting Relu ...");
        check_shape("Relu input", input, &[size])?;
        check_shape("Relu output", output, &[size])?;
        if do_truncation {
            self.config.fixed_precision.check_scale(sf)?;
        }
        let flat = flatten(input);
        self.measured("relu", Some(OpCategory::Relu), |engine, _| {
            with_flat_mut(output, |out| engine.relu(&flat, out))
        })?;
        if do_truncation && self.policy.truncates() {
            self.measured("truncation", Some(OpCategory::Truncation), |engine, _| {
                with_flat_mut(output, |out| engine.truncate(out, sf))
            })?;
        }
        Ok(())
    }

    fn check_pool_shapes(
        name: &str,
        window: &Window2D,
        input: &ShareTensor4,
        output: &ShareTensor4,
    ) -> Result<()> {
        window.validate()?;
        let expected = window.output_shape(input.shape());
        check_shape(name, output, &expected)
    }

    /// 2-D max pooling of `[N, H, W, C]` activations.
    pub fn max_pool(
        &mut self,
        window: &Window2D,
        input: &ShareTensor4,
        output: &mut ShareTensor4,
    ) -> Result<()> {
        debug!("Starting MaxPool ...");
        Self::check_pool_shapes("MaxPool output", window, input, output)?;
        let windows = window.extract(input.view())?;
        let (rows, cols) = windows.dim();
        let flat = windows.into_raw_vec();
        let mut maxima = vec![0; rows];
        self.measured("maxpool", Some(OpCategory::MaxPool), |engine, _| {
            engine.max(&flat, rows, cols, &mut maxima, None)
        })?;
        scatter_windows_nhwc(&maxima, output)
    }

    /// 2-D average pooling of `[N, H, W, C]` activations.
    ///
    /// Purely local: every party divides its own window sums as its
    /// [`PartyArithmeticPolicy`] prescribes. The reconstructed result is at most
    /// one unit above the exact floor of the window average.
    pub fn avg_pool(
        &mut self,
        window: &Window2D,
        input: &ShareTensor4,
        output: &mut ShareTensor4,
    ) -> Result<()> {
        debug!("Starting AvgPool ...");
        Self::check_pool_shapes("AvgPool output", window, input, output)?;
        let divisor = window.kernel_len() as u64;
        let averages = self.measured("avgpool", Some(OpCategory::AvgPool), |_, policy| {
            window.reduce(input.view(), |row| {
                let sum = row.iter().fold(0 as Share, |acc, x| acc.wrapping_add(*x));
                policy.divide_share(sum, divisor)
            })
        })?;
        scatter_windows_nhwc(&averages, output)
    }

    fn elem_wise_mult(
        &mut self,
        op: &'static str,
        category: OpCategory,
        size: usize,
        a: &ShareVector,
        b: &ShareVector,
        output: &mut ShareVector,
    ) -> Result<()> {
        check_shape("Elementwise multiplication left operand", a, &[size])?;
        check_shape("Elementwise multiplication right operand", b, &[size])?;
        check_shape("Elementwise multiplication output", output, &[size])?;
        let x = flatten(a);
        let y = flatten(b);
        self.measured(op, Some(category), |engine, _| {
            with_flat_mut(output, |out| engine.dot_product(&x, &y, out))
        })
    }

    /// Elementwise product of two secret-shared vectors.
    pub fn elem_wise_secret_shared_vector_mult(
        &mut self,
        size: usize,
        a: &ShareVector,
        b: &ShareVector,
        output: &mut ShareVector,
    ) -> Result<()> {
        debug!("Starting ElemWiseSecretSharedVectorMult ...");
        self.elem_wise_mult(
            "elemwise secret mult",
            OpCategory::ElemWiseSecretMult,
            size,
            a,
            b,
            output,
        )
    }

    /// Elementwise product of activations with model parameters.
    pub fn elem_wise_act_model_vector_mult(
        &mut self,
        size: usize,
        activations: &ShareVector,
        model: &ShareVector,
        output: &mut ShareVector,
    ) -> Result<()> {
        debug!("Starting ElemWiseActModelVectorMult ...");
        self.elem_wise_mult(
            "elemwise act model mult",
            OpCategory::ElemWiseActModelMult,
            size,
            activations,
            model,
            output,
        )
    }

    /// Not supported by any protocol engine; calling it is a programming error.
    pub fn elem_wise_vector_public_div(
        &mut self,
        _size: usize,
        _input: &ShareVector,
        _divisor: Public,
        _output: &mut ShareVector,
    ) -> Result<()> {
        panic!("Elementwise division by a public value is not supported");
    }

    /// Not supported by any protocol engine; calling it is a programming error.
    pub fn floor(
        &mut self,
        _size: usize,
        _input: &ShareVector,
        _output: &mut ShareVector,
        _sf: u32,
    ) -> Result<()> {
        panic!("Floor is not supported");
    }

    /// Multiplies every element of `tensor` by `2^sf`. No communication.
    pub fn scale_up<D: Dimension>(&mut self, tensor: &mut Array<Share, D>, sf: u32) -> Result<()> {
        if sf >= Share::BITS {
            return Err(precondition_error!(
                "Cannot scale {}-bit shares up by {} bits",
                Share::BITS,
                sf
            ));
        }
        self.measured("scale up", None, |_, policy| {
            with_flat_mut(tensor, |values| {
                policy.scale_up(values, sf);
                Ok(())
            })
        })
    }

    /// Removes `sf` bits of fixed-point scale from every element of `tensor`.
    pub fn scale_down<D: Dimension>(
        &mut self,
        tensor: &mut Array<Share, D>,
        sf: u32,
    ) -> Result<()> {
        self.config.fixed_precision.check_scale(sf)?;
        self.measured("scale down", Some(OpCategory::Truncation), |engine, policy| {
            if !policy.truncates() {
                return Ok(());
            }
            with_flat_mut(tensor, |values| engine.truncate(values, sf))
        })
    }

    /// 2-D convolution; large filters may use the communication-optimized protocol.
    pub fn conv_2d(
        &mut self,
        params: &Conv2DParams,
        input: &ShareTensor4,
        filter: &ShareTensor4,
        output: &mut ShareTensor4,
    ) -> Result<()> {
        debug!("Starting Conv2D ...");
        params.validate(1)?;
        check_shape("Conv2D input", input, &params.input_shape())?;
        check_shape("Conv2D filter", filter, &params.filter_shape(1))?;
        check_shape("Conv2D output", output, &params.output_shape())?;
        let strategy = ConvStrategy::select(params.fh, params.fw, self.config.conv_optimization);
        debug!("Conv2D strategy: {:?}", strategy);
        self.measured("conv", Some(OpCategory::Conv), |engine, _| match strategy {
            ConvStrategy::General => engine.conv_2d(params, input.view(), filter.view(), output),
            ConvStrategy::CommunicationOptimized => {
                engine.conv_2d_comm_optimized(params, input.view(), filter.view(), output)
            }
        })
    }

    /// 2-D convolution with input and output channels split into `groups`.
    pub fn conv_2d_group(
        &mut self,
        params: &Conv2DParams,
        groups: usize,
        input: &ShareTensor4,
        filter: &ShareTensor4,
        output: &mut ShareTensor4,
    ) -> Result<()> {
        debug!("Starting Conv2DGroup ...");
        params.validate(groups)?;
        check_shape("Conv2DGroup input", input, &params.input_shape())?;
        check_shape("Conv2DGroup filter", filter, &params.filter_shape(groups))?;
        check_shape("Conv2DGroup output", output, &params.output_shape())?;
        self.measured("conv group", Some(OpCategory::Conv), |engine, _| {
            engine.conv_2d_group(params, groups, input.view(), filter.view(), output)
        })
    }

    /// 3-D convolution followed by a truncation by `cons_sf` bits.
    pub fn conv_3d(
        &mut self,
        params: &Conv3DParams,
        input: &ShareTensor5,
        filter: &ShareTensor5,
        cons_sf: u32,
        output: &mut ShareTensor5,
    ) -> Result<()> {
        debug!("Starting Conv3D ...");
        params.validate()?;
        check_shape("Conv3D input", input, &params.input_shape())?;
        check_shape("Conv3D filter", filter, &params.filter_shape())?;
        check_shape("Conv3D output", output, &params.output_shape())?;
        self.measured("conv3d", Some(OpCategory::Conv), |engine, _| {
            engine.conv_3d(params, input.view(), filter.view(), cons_sf, output)
        })
    }

    /// Transposed 3-D convolution followed by a truncation by `cons_sf` bits.
    pub fn conv_transpose_3d(
        &mut self,
        params: &ConvTranspose3DParams,
        input: &ShareTensor5,
        filter: &ShareTensor5,
        cons_sf: u32,
        output: &mut ShareTensor5,
    ) -> Result<()> {
        debug!("Starting ConvTranspose3D ...");
        params.validate()?;
        check_shape("ConvTranspose3D input", input, &params.input_shape())?;
        check_shape("ConvTranspose3D filter", filter, &params.filter_shape())?;
        check_shape("ConvTranspose3D output", output, &params.output_shape())?;
        self.measured("conv transpose3d", Some(OpCategory::Conv), |engine, _| {
            engine.conv_transpose_3d(params, input.view(), filter.view(), cons_sf, output)
        })
    }
}
