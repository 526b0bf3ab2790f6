use log::trace;

use crate::dispatch::grad_mask::{CONV2D_GRAD_INPUT, CONV2D_GRAD_PARAMETERS};
use crate::dispatch::{check_int_list, materialize_masked, Dispatcher, IntListSpec};
use crate::error::DispatchResult;
use crate::kernels::{
    Conv2dAccGradParameters, Conv2dAccGradParametersArgs, Conv2dForward, Conv2dForwardArgs,
    Conv2dGeometry, Conv2dGradInput, Conv2dGradInputArgs,
};
use crate::tensor::Tensor;

/// Scale applied when the backward pass accumulates parameter gradients.
const GRAD_PARAMETERS_SCALE: f64 = 1.0;

/// Positions of `kernel_size`, `stride` and `padding` in a call's argument list.
struct GeometryPositions {
    kernel_size: usize,
    stride: usize,
    padding: usize,
}

fn geometry(
    op: &'static str,
    kernel_size: &[i64],
    stride: &[i64],
    padding: &[i64],
    at: GeometryPositions,
) -> DispatchResult<Conv2dGeometry> {
    let list = |values: &[i64], name: &'static str, position: usize| {
        check_int_list::<2>(op, values, &IntListSpec::broadcasting(name, position))
    };
    Ok(Conv2dGeometry {
        kernel: list(kernel_size, "kernel_size", at.kernel_size)?,
        stride: list(stride, "stride", at.stride)?,
        padding: list(padding, "padding", at.padding)?,
    })
}

impl Dispatcher {
    /// 2-D convolution of an NCHW `input` with `weight` and an optional `bias`
    /// (pass [`Tensor::Undefined`] for none).
    ///
    /// Returns `(output, columns, ones)`; the last two are workspaces the backward pass
    /// consumes.
    pub fn conv2d_forward(
        &self,
        input: &Tensor,
        weight: &Tensor,
        kernel_size: &[i64],
        bias: &Tensor,
        stride: &[i64],
        padding: &[i64],
    ) -> DispatchResult<(Tensor, Tensor, Tensor)> {
        let site = self.resolve("conv2d_forward", input, "self", 1)?;
        let kernel = self.lookup::<Conv2dForward>(&site)?;
        let input_raw = site.require(input, "self", 1)?;
        let weight_raw = site.require(weight, "weight", 2)?;
        let bias_raw = site.optional(bias, "bias", 4)?;
        let geometry = geometry(
            site.op,
            kernel_size,
            stride,
            padding,
            GeometryPositions {
                kernel_size: 3,
                stride: 5,
                padding: 6,
            },
        )?;

        let output = self.materialize(&site, true)?;
        let columns = self.materialize(&site, true)?;
        let ones = self.materialize(&site, true)?;
        let args = Conv2dForwardArgs {
            output: site.require(&output, "output", 0)?,
            columns: site.require(&columns, "columns", 0)?,
            ones: site.require(&ones, "ones", 0)?,
            input: input_raw,
            weight: weight_raw,
            bias: bias_raw,
            geometry,
        };
        self.invoke(&site, "forward", |ctx| kernel(ctx, args))?;
        Ok((output, columns, ones))
    }

    /// [`Dispatcher::conv2d_forward`] writing into caller-supplied outputs.
    #[allow(clippy::too_many_arguments)]
    pub fn conv2d_forward_out(
        &self,
        output: &Tensor,
        columns: &Tensor,
        ones: &Tensor,
        input: &Tensor,
        weight: &Tensor,
        kernel_size: &[i64],
        bias: &Tensor,
        stride: &[i64],
        padding: &[i64],
    ) -> DispatchResult<(Tensor, Tensor, Tensor)> {
        let site = self.resolve("conv2d_forward_out", input, "self", 3)?;
        let kernel = self.lookup::<Conv2dForward>(&site)?;
        let args = Conv2dForwardArgs {
            output: site.require(output, "output", 0)?,
            columns: site.require(columns, "columns", 1)?,
            ones: site.require(ones, "ones", 2)?,
            input: site.require(input, "self", 3)?,
            weight: site.require(weight, "weight", 4)?,
            bias: site.optional(bias, "bias", 6)?,
            geometry: geometry(
                site.op,
                kernel_size,
                stride,
                padding,
                GeometryPositions {
                    kernel_size: 5,
                    stride: 7,
                    padding: 8,
                },
            )?,
        };
        self.invoke(&site, "forward", |ctx| kernel(ctx, args))?;
        Ok((output.clone(), columns.clone(), ones.clone()))
    }

    /// Gradients of [`Dispatcher::conv2d_forward`] with respect to `(input, weight, bias)`.
    /// The element kind and device are taken from `input`.
    ///
    /// Only slots whose `output_mask` bit is set are materialized; the rest come back as
    /// [`Tensor::Undefined`]. The input-gradient kernel runs only for slot 0 and the
    /// parameter-gradient kernel only when slot 1 or 2 is requested.
    #[allow(clippy::too_many_arguments)]
    pub fn conv2d_backward(
        &self,
        grad_output: &Tensor,
        input: &Tensor,
        weight: &Tensor,
        kernel_size: &[i64],
        stride: &[i64],
        padding: &[i64],
        columns: &Tensor,
        ones: &Tensor,
        output_mask: [bool; 3],
    ) -> DispatchResult<(Tensor, Tensor, Tensor)> {
        let site = self.resolve("conv2d_backward", input, "self", 2)?;
        let grad_input_kernel = self.lookup::<Conv2dGradInput>(&site)?;
        let grad_parameters_kernel = self.lookup::<Conv2dAccGradParameters>(&site)?;
        let grad_output_raw = site.require(grad_output, "grad_output", 1)?;
        let input_raw = site.require(input, "self", 2)?;
        let weight_raw = site.require(weight, "weight", 3)?;
        let geometry = geometry(
            site.op,
            kernel_size,
            stride,
            padding,
            GeometryPositions {
                kernel_size: 4,
                stride: 5,
                padding: 6,
            },
        )?;
        let columns_raw = site.require(columns, "columns", 7)?;
        let ones_raw = site.require(ones, "ones", 8)?;

        let outputs = materialize_masked(output_mask, self.allocator(), site.kind, site.device)?;
        let [grad_input, grad_weight, grad_bias] = &outputs;

        if CONV2D_GRAD_INPUT.should_run(&outputs) {
            let args = Conv2dGradInputArgs {
                grad_input: site.require(grad_input, "grad_input", 0)?,
                grad_output: grad_output_raw,
                input: input_raw,
                weight: weight_raw,
                columns: columns_raw,
                ones: ones_raw,
                geometry,
            };
            self.invoke(&site, CONV2D_GRAD_INPUT.name, |ctx| grad_input_kernel(ctx, args))?;
        } else {
            trace!("conv2d_backward: skipping {} phase", CONV2D_GRAD_INPUT.name);
        }

        if CONV2D_GRAD_PARAMETERS.should_run(&outputs) {
            let args = Conv2dAccGradParametersArgs {
                grad_weight: site.optional(grad_weight, "grad_weight", 1)?,
                grad_bias: site.optional(grad_bias, "grad_bias", 2)?,
                grad_output: grad_output_raw,
                input: input_raw,
                columns: columns_raw,
                ones: ones_raw,
                geometry,
                scale: GRAD_PARAMETERS_SCALE,
            };
            self.invoke(&site, CONV2D_GRAD_PARAMETERS.name, |ctx| {
                grad_parameters_kernel(ctx, args)
            })?;
        } else {
            trace!(
                "conv2d_backward: skipping {} phase",
                CONV2D_GRAD_PARAMETERS.name
            );
        }

        let [grad_input, grad_weight, grad_bias] = outputs;
        Ok((grad_input, grad_weight, grad_bias))
    }

    /// [`Dispatcher::conv2d_backward`] writing into caller-supplied gradients. Any gradient
    /// may be [`Tensor::Undefined`]; phases with no defined target are skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn conv2d_backward_out(
        &self,
        grad_input: &Tensor,
        grad_weight: &Tensor,
        grad_bias: &Tensor,
        grad_output: &Tensor,
        input: &Tensor,
        weight: &Tensor,
        kernel_size: &[i64],
        stride: &[i64],
        padding: &[i64],
        columns: &Tensor,
        ones: &Tensor,
    ) -> DispatchResult<(Tensor, Tensor, Tensor)> {
        let site = self.resolve("conv2d_backward_out", input, "self", 4)?;
        let grad_input_kernel = self.lookup::<Conv2dGradInput>(&site)?;
        let grad_parameters_kernel = self.lookup::<Conv2dAccGradParameters>(&site)?;
        let grad_input_raw = site.optional(grad_input, "grad_input", 0)?;
        let grad_weight_raw = site.optional(grad_weight, "grad_weight", 1)?;
        let grad_bias_raw = site.optional(grad_bias, "grad_bias", 2)?;
        let grad_output_raw = site.require(grad_output, "grad_output", 3)?;
        let input_raw = site.require(input, "self", 4)?;
        let weight_raw = site.require(weight, "weight", 5)?;
        let geometry = geometry(
            site.op,
            kernel_size,
            stride,
            padding,
            GeometryPositions {
                kernel_size: 6,
                stride: 7,
                padding: 8,
            },
        )?;
        let columns_raw = site.require(columns, "columns", 9)?;
        let ones_raw = site.require(ones, "ones", 10)?;

        let targets = [grad_input.clone(), grad_weight.clone(), grad_bias.clone()];
        if let Some(grad_input_raw) = grad_input_raw {
            let args = Conv2dGradInputArgs {
                grad_input: grad_input_raw,
                grad_output: grad_output_raw,
                input: input_raw,
                weight: weight_raw,
                columns: columns_raw,
                ones: ones_raw,
                geometry,
            };
            self.invoke(&site, CONV2D_GRAD_INPUT.name, |ctx| grad_input_kernel(ctx, args))?;
        }
        if CONV2D_GRAD_PARAMETERS.should_run(&targets) {
            let args = Conv2dAccGradParametersArgs {
                grad_weight: grad_weight_raw,
                grad_bias: grad_bias_raw,
                grad_output: grad_output_raw,
                input: input_raw,
                columns: columns_raw,
                ones: ones_raw,
                geometry,
                scale: GRAD_PARAMETERS_SCALE,
            };
            self.invoke(&site, CONV2D_GRAD_PARAMETERS.name, |ctx| {
                grad_parameters_kernel(ctx, args)
            })?;
        }

        let [grad_input, grad_weight, grad_bias] = targets;
        Ok((grad_input, grad_weight, grad_bias))
    }
}
