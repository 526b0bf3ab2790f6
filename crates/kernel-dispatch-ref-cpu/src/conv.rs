//! im2col convolution kernels.
//!
//! Inputs are NCHW (or CHW, treated as a batch of one) and weights are
//! `[out_channels, in_channels, kh, kw]` or the flattened `[out_channels, in_channels * kh * kw]`.
//! The unfolded input of one image is a `[in_channels * kh * kw, oh * ow]` matrix, so the
//! forward pass is a single matrix product per image.

use anyhow::{bail, ensure};
use kernel_dispatch::kernels::{
    Conv2dAccGradParametersArgs, Conv2dForwardArgs, Conv2dGeometry, Conv2dGradInputArgs,
};
use kernel_dispatch::tensor::TensorImpl;
use kernel_dispatch::ExecutionContext;

use crate::element::{read_f64, write_f64, CpuFloat};
use crate::ensure_host;

#[derive(Debug, Clone, Copy)]
struct Window {
    kh: usize,
    kw: usize,
    sh: usize,
    sw: usize,
    ph: usize,
    pw: usize,
}

impl Window {
    fn from_geometry(geometry: &Conv2dGeometry) -> anyhow::Result<Self> {
        let Conv2dGeometry {
            kernel,
            stride,
            padding,
        } = *geometry;
        ensure!(
            kernel.iter().all(|&k| k > 0),
            "conv2d kernel size must be > 0, got {kernel:?}"
        );
        ensure!(
            stride.iter().all(|&s| s > 0),
            "conv2d stride must be > 0, got {stride:?}"
        );
        ensure!(
            padding.iter().all(|&p| p >= 0),
            "conv2d padding must be >= 0, got {padding:?}"
        );
        Ok(Window {
            kh: kernel[0] as usize,
            kw: kernel[1] as usize,
            sh: stride[0] as usize,
            sw: stride[1] as usize,
            ph: padding[0] as usize,
            pw: padding[1] as usize,
        })
    }
}

/// Problem dimensions shared by all three kernels.
#[derive(Debug, Clone, Copy)]
struct Plan {
    batched: bool,
    n: usize,
    c_in: usize,
    h: usize,
    w: usize,
    c_out: usize,
    oh: usize,
    ow: usize,
    window: Window,
}

impl Plan {
    fn new(input: &TensorImpl, c_out: usize, window: Window) -> anyhow::Result<Self> {
        let shape = input.shape();
        let (batched, n, c_in, h, w) = match shape.as_slice() {
            &[n, c, h, w] => (true, n, c, h, w),
            &[c, h, w] => (false, 1, c, h, w),
            other => bail!("conv2d expects a 3-D or 4-D input, got shape {other:?}"),
        };
        let pad = |extent: usize, p: usize| p.checked_mul(2).and_then(|p| p.checked_add(extent));
        let (Some(padded_h), Some(padded_w)) = (pad(h, window.ph), pad(w, window.pw)) else {
            bail!(
                "conv2d padding {}x{} overflows input {h}x{w}",
                window.ph,
                window.pw
            );
        };
        ensure!(
            padded_h >= window.kh && padded_w >= window.kw,
            "conv2d kernel {}x{} exceeds padded input {padded_h}x{padded_w}",
            window.kh,
            window.kw
        );
        let oh = (padded_h - window.kh) / window.sh + 1;
        let ow = (padded_w - window.kw) / window.sw + 1;
        let columns = c_in
            .checked_mul(window.kh)
            .and_then(|k| k.checked_mul(window.kw))
            .and_then(|k| k.checked_mul(oh))
            .and_then(|k| k.checked_mul(ow));
        ensure!(
            columns.is_some(),
            "conv2d unfolded input of {c_in}x{}x{} by {oh}x{ow} overflows",
            window.kh,
            window.kw
        );
        Ok(Plan {
            batched,
            n,
            c_in,
            h,
            w,
            c_out,
            oh,
            ow,
            window,
        })
    }

    /// Rows of the unfolded input.
    fn k(&self) -> usize {
        self.c_in * self.window.kh * self.window.kw
    }

    /// Output pixels per channel.
    fn l(&self) -> usize {
        self.oh * self.ow
    }

    fn image_len(&self) -> usize {
        self.c_in * self.h * self.w
    }

    fn output_shape(&self) -> Vec<usize> {
        if self.batched {
            vec![self.n, self.c_out, self.oh, self.ow]
        } else {
            vec![self.c_out, self.oh, self.ow]
        }
    }

    fn weight_shape(&self) -> [usize; 4] {
        [self.c_out, self.c_in, self.window.kh, self.window.kw]
    }

    fn check_weight(&self, weight: &TensorImpl) -> anyhow::Result<()> {
        let shape = weight.shape();
        let flat = [self.c_out, self.k()];
        ensure!(
            shape.as_slice() == self.weight_shape() || shape.as_slice() == flat,
            "conv2d weight shape {:?} does not match {:?} or {:?}",
            shape.as_slice(),
            self.weight_shape(),
            flat
        );
        Ok(())
    }

    fn check_grad_output(&self, grad_output: &TensorImpl) -> anyhow::Result<()> {
        let shape = grad_output.shape();
        ensure!(
            shape.as_slice() == self.output_shape().as_slice(),
            "conv2d grad_output shape {:?} does not match output shape {:?}",
            shape.as_slice(),
            self.output_shape()
        );
        Ok(())
    }

    /// Unfolds one image into `cols` (`k x l`); out-of-bounds taps read zero.
    fn im2col(&self, image: &[f64], cols: &mut [f64]) {
        let Window {
            kh,
            kw,
            sh,
            sw,
            ph,
            pw,
        } = self.window;
        let l = self.l();
        for c in 0..self.c_in {
            for i in 0..kh {
                for j in 0..kw {
                    let row = (c * kh + i) * kw + j;
                    for y in 0..self.oh {
                        let in_y = (y * sh + i) as isize - ph as isize;
                        for x in 0..self.ow {
                            let in_x = (x * sw + j) as isize - pw as isize;
                            let inside = in_y >= 0
                                && in_x >= 0
                                && (in_y as usize) < self.h
                                && (in_x as usize) < self.w;
                            cols[row * l + y * self.ow + x] = if inside {
                                image[(c * self.h + in_y as usize) * self.w + in_x as usize]
                            } else {
                                0.0
                            };
                        }
                    }
                }
            }
        }
    }

    /// Folds `cols` back into one image, summing overlapping taps.
    fn col2im(&self, cols: &[f64], image: &mut [f64]) {
        let Window {
            kh,
            kw,
            sh,
            sw,
            ph,
            pw,
        } = self.window;
        let l = self.l();
        for c in 0..self.c_in {
            for i in 0..kh {
                for j in 0..kw {
                    let row = (c * kh + i) * kw + j;
                    for y in 0..self.oh {
                        let in_y = (y * sh + i) as isize - ph as isize;
                        if in_y < 0 || in_y as usize >= self.h {
                            continue;
                        }
                        for x in 0..self.ow {
                            let in_x = (x * sw + j) as isize - pw as isize;
                            if in_x < 0 || in_x as usize >= self.w {
                                continue;
                            }
                            image[(c * self.h + in_y as usize) * self.w + in_x as usize] +=
                                cols[row * l + y * self.ow + x];
                        }
                    }
                }
            }
        }
    }
}

/// Leading dimension of a weight tensor.
fn out_channels(weight: &TensorImpl) -> anyhow::Result<usize> {
    match weight.shape().first() {
        Some(&c_out) => Ok(c_out),
        None => bail!("conv2d weight must have at least one dimension"),
    }
}

/// Channel dimension of a 3-D or 4-D gradient.
fn grad_channels(grad_output: &TensorImpl) -> anyhow::Result<usize> {
    let shape = grad_output.shape();
    match shape.as_slice() {
        &[_, c, _, _] | &[c, _, _] => Ok(c),
        other => bail!("conv2d expects a 3-D or 4-D grad_output, got shape {other:?}"),
    }
}

pub(crate) fn conv2d_forward<T: CpuFloat>(
    ctx: &ExecutionContext,
    args: Conv2dForwardArgs<'_>,
) -> anyhow::Result<()> {
    ensure_host(ctx)?;
    let window = Window::from_geometry(&args.geometry)?;
    let plan = Plan::new(&args.input, out_channels(&args.weight)?, window)?;
    plan.check_weight(&args.weight)?;

    let input = read_f64::<T>(&args.input)?;
    let weight = read_f64::<T>(&args.weight)?;
    let bias = match args.bias {
        Some(bias) => {
            ensure!(
                bias.numel() == plan.c_out,
                "conv2d bias has {} elements, expected {}",
                bias.numel(),
                plan.c_out
            );
            Some(read_f64::<T>(&bias)?)
        }
        None => None,
    };

    let (k, l) = (plan.k(), plan.l());
    let mut cols = vec![0.0; k * l];
    let mut output = vec![0.0; plan.n * plan.c_out * l];
    for b in 0..plan.n {
        plan.im2col(&input[b * plan.image_len()..][..plan.image_len()], &mut cols);
        for co in 0..plan.c_out {
            let row = &mut output[(b * plan.c_out + co) * l..][..l];
            if let Some(bias) = &bias {
                row.fill(bias[co]);
            }
            for (kk, col) in cols.chunks_exact(l).enumerate() {
                let w = weight[co * k + kk];
                if w == 0.0 {
                    continue;
                }
                for (acc, &v) in row.iter_mut().zip(col) {
                    *acc += w * v;
                }
            }
        }
    }

    args.columns.resize(&[k, l]);
    write_f64::<T>(&args.columns, &cols)?;
    args.ones.resize(&[plan.oh, plan.ow]);
    write_f64::<T>(&args.ones, &vec![1.0; l])?;
    args.output.resize(&plan.output_shape());
    write_f64::<T>(&args.output, &output)?;
    Ok(())
}

pub(crate) fn conv2d_grad_input<T: CpuFloat>(
    ctx: &ExecutionContext,
    args: Conv2dGradInputArgs<'_>,
) -> anyhow::Result<()> {
    ensure_host(ctx)?;
    let window = Window::from_geometry(&args.geometry)?;
    let plan = Plan::new(&args.input, out_channels(&args.weight)?, window)?;
    plan.check_weight(&args.weight)?;
    plan.check_grad_output(&args.grad_output)?;

    let grad_output = read_f64::<T>(&args.grad_output)?;
    let weight = read_f64::<T>(&args.weight)?;
    let (k, l) = (plan.k(), plan.l());
    let mut grad_cols = vec![0.0; k * l];
    let mut grad_input = vec![0.0; plan.n * plan.image_len()];
    for b in 0..plan.n {
        grad_cols.fill(0.0);
        for co in 0..plan.c_out {
            let go = &grad_output[(b * plan.c_out + co) * l..][..l];
            for (kk, col) in grad_cols.chunks_exact_mut(l).enumerate() {
                let w = weight[co * k + kk];
                if w == 0.0 {
                    continue;
                }
                for (acc, &g) in col.iter_mut().zip(go) {
                    *acc += w * g;
                }
            }
        }
        plan.col2im(
            &grad_cols,
            &mut grad_input[b * plan.image_len()..][..plan.image_len()],
        );
    }

    args.grad_input.resize(&args.input.shape());
    write_f64::<T>(&args.grad_input, &grad_input)?;
    Ok(())
}

/// Resets `target` to `shape` filled with zeros unless it already holds `numel` elements.
fn prepare_accumulator<T: CpuFloat>(target: &TensorImpl, shape: &[usize]) -> anyhow::Result<Vec<f64>> {
    let numel: usize = shape.iter().product();
    if target.numel() != numel {
        target.resize(shape);
        write_f64::<T>(target, &vec![0.0; numel])?;
    }
    read_f64::<T>(target)
}

pub(crate) fn conv2d_acc_grad_parameters<T: CpuFloat>(
    ctx: &ExecutionContext,
    args: Conv2dAccGradParametersArgs<'_>,
) -> anyhow::Result<()> {
    ensure_host(ctx)?;
    if args.grad_weight.is_none() && args.grad_bias.is_none() {
        return Ok(());
    }
    let window = Window::from_geometry(&args.geometry)?;
    let plan = Plan::new(&args.input, grad_channels(&args.grad_output)?, window)?;
    plan.check_grad_output(&args.grad_output)?;

    let grad_output = read_f64::<T>(&args.grad_output)?;
    let (k, l) = (plan.k(), plan.l());
    let scale = args.scale;

    if let Some(grad_weight) = args.grad_weight {
        let mut acc = prepare_accumulator::<T>(&grad_weight, &plan.weight_shape())?;
        let input = read_f64::<T>(&args.input)?;
        let mut cols = vec![0.0; k * l];
        for b in 0..plan.n {
            plan.im2col(&input[b * plan.image_len()..][..plan.image_len()], &mut cols);
            for co in 0..plan.c_out {
                let go = &grad_output[(b * plan.c_out + co) * l..][..l];
                for (kk, col) in cols.chunks_exact(l).enumerate() {
                    let dot: f64 = go.iter().zip(col).map(|(&g, &v)| g * v).sum();
                    acc[co * k + kk] += scale * dot;
                }
            }
        }
        write_f64::<T>(&grad_weight, &acc)?;
    }

    if let Some(grad_bias) = args.grad_bias {
        let mut acc = prepare_accumulator::<T>(&grad_bias, &[plan.c_out])?;
        for b in 0..plan.n {
            for (co, slot) in acc.iter_mut().enumerate() {
                let go = &grad_output[(b * plan.c_out + co) * l..][..l];
                *slot += scale * go.iter().sum::<f64>();
            }
        }
        write_f64::<T>(&grad_bias, &acc)?;
    }
    Ok(())
}
