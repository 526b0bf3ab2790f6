//! Reference CPU kernels for every `kernel-dispatch` operation.
//!
//! The kernels favour clarity over speed: floating-point math is carried out in `f64` and
//! narrowed on write. Linking this crate contributes the kernels to the global CPU table.

mod cat;
mod conv;
mod copy;
mod element;
mod lstsq;

use anyhow::ensure;
use half::{bf16, f16};
use kernel_dispatch::kernels::{
    Cat, Conv2dAccGradParameters, Conv2dForward, Conv2dGradInput, CopyIgnoringOverlaps, Gels,
    KernelRegistrar,
};
use kernel_dispatch::{DeviceKind, DispatchResult, ElementKind, ExecutionContext, KernelTable};
use log::debug;

pub use element::CpuFloat;

/// Element kinds with a CPU copy kernel.
pub const COPY_KINDS: [ElementKind; 8] = [
    ElementKind::UInt8,
    ElementKind::Int8,
    ElementKind::Float64,
    ElementKind::Float32,
    ElementKind::Int32,
    ElementKind::Int64,
    ElementKind::Int16,
    ElementKind::Float16,
];

/// Element kinds with CPU convolution kernels.
pub const CONV_KINDS: [ElementKind; 4] = [
    ElementKind::Float64,
    ElementKind::Float32,
    ElementKind::Float16,
    ElementKind::BFloat16,
];

/// Element kinds with a CPU least-squares kernel.
pub const GELS_KINDS: [ElementKind; 2] = [ElementKind::Float32, ElementKind::Float64];

pub(crate) fn ensure_host(ctx: &ExecutionContext) -> anyhow::Result<()> {
    ensure!(
        ctx.device.kind == DeviceKind::Cpu,
        "reference CPU kernel invoked for {}",
        ctx.device
    );
    Ok(())
}

fn register_conv<T: CpuFloat>(table: &mut KernelTable) -> DispatchResult<()> {
    table.register::<Conv2dForward>(T::KIND, Conv2dForward::kernel(conv::conv2d_forward::<T>))?;
    table.register::<Conv2dGradInput>(
        T::KIND,
        Conv2dGradInput::kernel(conv::conv2d_grad_input::<T>),
    )?;
    table.register::<Conv2dAccGradParameters>(
        T::KIND,
        Conv2dAccGradParameters::kernel(conv::conv2d_acc_grad_parameters::<T>),
    )?;
    Ok(())
}

/// Adds every reference CPU kernel to `table`.
pub fn register_cpu_kernels(table: &mut KernelTable) -> DispatchResult<()> {
    table.register::<Gels>(ElementKind::Float32, Gels::kernel(lstsq::gels::<f32>))?;
    table.register::<Gels>(ElementKind::Float64, Gels::kernel(lstsq::gels::<f64>))?;
    table.register_kinds::<CopyIgnoringOverlaps>(
        &COPY_KINDS,
        CopyIgnoringOverlaps::kernel(copy::copy_ignoring_overlaps),
    )?;
    register_conv::<f64>(table)?;
    register_conv::<f32>(table)?;
    register_conv::<f16>(table)?;
    register_conv::<bf16>(table)?;
    table.register_kinds::<Cat>(&ElementKind::ALL, Cat::kernel(cat::cat))?;
    debug!("registered {} reference CPU kernels", table.len());
    Ok(())
}

/// A fresh CPU table holding only the reference kernels.
pub fn cpu_kernel_table() -> DispatchResult<KernelTable> {
    let mut table = KernelTable::new(DeviceKind::Cpu);
    register_cpu_kernels(&mut table)?;
    Ok(table)
}

#[kernel_dispatch::linkme::distributed_slice(kernel_dispatch::kernels::KERNEL_REGISTRARS)]
#[linkme(crate = kernel_dispatch::linkme)]
static REGISTER_CPU_KERNELS: KernelRegistrar = KernelRegistrar {
    device: DeviceKind::Cpu,
    register: register_cpu_kernels,
};
