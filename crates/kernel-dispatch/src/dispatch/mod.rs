//! The operation dispatcher.
//!
//! Every public operation (see [`crate::ops`]) follows the same sequence: resolve the dispatch
//! key from its primary input, look up the kernel(s), validate every remaining argument and
//! caller-supplied output, materialize fresh outputs, then invoke the kernel under a
//! [`DeviceGuard`]. Nothing is allocated or written until every check has passed.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, trace};

use crate::config::{global_config, DispatchConfig};
use crate::context::{current_context, DeviceGuard, ExecutionContext};
use crate::error::{DispatchError, DispatchResult};
use crate::kernels::{global_kernel_table, KernelOp, KernelTable};
use crate::tensor::{Allocator, Device, DeviceKind, ElementKind, HostAllocator, RawTensor, Tensor};

pub mod grad_mask;
pub mod materialize;
pub mod unwrap;

pub use grad_mask::{materialize_masked, KernelPhase};
pub use materialize::{materialize_empty, materialize_empty_if};
pub use unwrap::{check_int_list, unwrap, IntListSpec};

/// Entry point for every tensor operation.
#[derive(Clone)]
pub struct Dispatcher {
    kernels: Arc<KernelTable>,
    allocator: Arc<dyn Allocator>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Dispatcher over an explicit table and allocator, using the process configuration.
    pub fn new(kernels: Arc<KernelTable>, allocator: Arc<dyn Allocator>) -> Self {
        Dispatcher {
            kernels,
            allocator,
            config: global_config().clone(),
        }
    }

    /// Dispatcher over the global table for `device`, allocating from host memory.
    pub fn for_device(device: DeviceKind) -> DispatchResult<Self> {
        Ok(Dispatcher::new(
            global_kernel_table(device)?,
            Arc::new(HostAllocator::new()),
        ))
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn kernels(&self) -> &KernelTable {
        &self.kernels
    }

    pub fn allocator(&self) -> &dyn Allocator {
        self.allocator.as_ref()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Derives the dispatch key of `op` from its primary argument.
    pub(crate) fn resolve(
        &self,
        op: &'static str,
        primary: &Tensor,
        arg: &'static str,
        position: usize,
    ) -> DispatchResult<CallSite> {
        let inner = primary
            .defined()
            .ok_or(DispatchError::RequiredTensorUndefined { op, arg, position })?;
        let device = inner.device();
        if device.kind != self.kernels.device() {
            return Err(DispatchError::DeviceMismatch {
                op,
                arg,
                position,
                expected: Device::new(self.kernels.device(), device.index),
                actual: device,
            });
        }
        let site = CallSite {
            op,
            device,
            kind: inner.kind(),
        };
        debug!("{op}: dispatching on {} ({})", site.kind, site.device);
        Ok(site)
    }

    /// Derives the dispatch key from the first element of a tensor list.
    pub(crate) fn resolve_list(
        &self,
        op: &'static str,
        tensors: &[Tensor],
        arg: &'static str,
        position: usize,
    ) -> DispatchResult<CallSite> {
        let first = tensors.first().ok_or(DispatchError::EmptyTensorList { op })?;
        self.resolve(op, first, arg, position)
    }

    /// Kernel for `K` at the call's element kind; failures are reported under the caller's
    /// operation name.
    pub(crate) fn lookup<K: KernelOp>(&self, site: &CallSite) -> DispatchResult<Arc<K::Kernel>> {
        self.kernels.lookup::<K>(site.kind).map_err(|err| match err {
            DispatchError::UnsupportedElementKind { kind, .. } => {
                DispatchError::UnsupportedElementKind { op: site.op, kind }
            }
            other => other,
        })
    }

    pub(crate) fn materialize(&self, site: &CallSite, want: bool) -> DispatchResult<Tensor> {
        materialize_empty_if(want, self.allocator.as_ref(), site.kind, site.device)
    }

    /// Runs one kernel phase on the call's device.
    pub(crate) fn invoke(
        &self,
        site: &CallSite,
        phase: &'static str,
        run: impl FnOnce(&ExecutionContext) -> anyhow::Result<()>,
    ) -> DispatchResult<()> {
        let _device = DeviceGuard::new(site.device);
        let ctx = current_context(site.device);
        trace!("{}: running {phase} kernel on {}", site.op, ctx.stream);
        let started = self.config.trace_kernels.then(Instant::now);
        let result = run(&ctx);
        if let Some(started) = started {
            debug!(
                "{}: {phase} kernel took {:?}",
                site.op,
                started.elapsed()
            );
        }
        result.map_err(|source| DispatchError::KernelFailed {
            op: site.op,
            source,
        })
    }
}

/// Dispatch key of a single call, fixed once per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CallSite {
    pub op: &'static str,
    pub device: Device,
    pub kind: ElementKind,
}

impl CallSite {
    /// Validates a tensor that must be present.
    pub(crate) fn require<'a>(
        &self,
        handle: &'a Tensor,
        arg: &'static str,
        position: usize,
    ) -> DispatchResult<RawTensor<'a>> {
        unwrap(handle, arg, position, self.op, false, self.device, self.kind)?.ok_or(
            DispatchError::RequiredTensorUndefined {
                op: self.op,
                arg,
                position,
            },
        )
    }

    /// Validates a tensor that may be the undefined sentinel.
    pub(crate) fn optional<'a>(
        &self,
        handle: &'a Tensor,
        arg: &'static str,
        position: usize,
    ) -> DispatchResult<Option<RawTensor<'a>>> {
        unwrap(handle, arg, position, self.op, true, self.device, self.kind)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kernels", &self.kernels)
            .field("allocator", &self.allocator.name())
            .field("config", &self.config)
            .finish()
    }
}
