//! Kernel table: maps `(operation, element kind)` to a kernel with the operation's calling
//! convention.
//!
//! Each operation is a marker type implementing [`KernelOp`]. The marker fixes the kernel
//! signature at compile time, so a lookup for `Conv2dForward` can only ever yield a kernel
//! that accepts [`Conv2dForwardArgs`]. Entries are stored type-erased and downcast on lookup.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::{DispatchError, DispatchResult};
use crate::tensor::{DeviceKind, ElementKind, RawTensor};

mod registry;

pub use registry::{build_table, global_kernel_table, KernelRegistrar, KERNEL_REGISTRARS};

/// Identifier of a kernel entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpId {
    Gels,
    CopyIgnoringOverlaps,
    Conv2dForward,
    Conv2dGradInput,
    Conv2dAccGradParameters,
    Cat,
}

impl OpId {
    pub const fn name(self) -> &'static str {
        match self {
            OpId::Gels => "gels",
            OpId::CopyIgnoringOverlaps => "copy_ignoring_overlaps",
            OpId::Conv2dForward => "conv2d_forward",
            OpId::Conv2dGradInput => "conv2d_grad_input",
            OpId::Conv2dAccGradParameters => "conv2d_acc_grad_parameters",
            OpId::Cat => "cat",
        }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ties an [`OpId`] to the kernel signature used for it.
pub trait KernelOp: 'static {
    const ID: OpId;
    type Kernel: ?Sized + Send + Sync + 'static;
}

/// Least-squares solve of `a * x = b`. `res1` receives the solution (in its leading rows),
/// `res2` the factorization of `a`.
#[derive(Debug, Clone, Copy)]
pub struct GelsArgs<'a> {
    pub res1: RawTensor<'a>,
    pub res2: RawTensor<'a>,
    pub b: RawTensor<'a>,
    pub a: RawTensor<'a>,
}

/// Element-wise copy of `src` into `dst` without checking for overlapping memory.
#[derive(Debug, Clone, Copy)]
pub struct CopyArgs<'a> {
    pub dst: RawTensor<'a>,
    pub src: RawTensor<'a>,
}

/// 2-D convolution hyper-parameters, each `[height, width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dGeometry {
    pub kernel: [i64; 2],
    pub stride: [i64; 2],
    pub padding: [i64; 2],
}

#[derive(Debug, Clone, Copy)]
pub struct Conv2dForwardArgs<'a> {
    pub output: RawTensor<'a>,
    /// Unfolded-input workspace.
    pub columns: RawTensor<'a>,
    /// Bias-broadcast workspace.
    pub ones: RawTensor<'a>,
    pub input: RawTensor<'a>,
    pub weight: RawTensor<'a>,
    pub bias: Option<RawTensor<'a>>,
    pub geometry: Conv2dGeometry,
}

#[derive(Debug, Clone, Copy)]
pub struct Conv2dGradInputArgs<'a> {
    pub grad_input: RawTensor<'a>,
    pub grad_output: RawTensor<'a>,
    pub input: RawTensor<'a>,
    pub weight: RawTensor<'a>,
    pub columns: RawTensor<'a>,
    pub ones: RawTensor<'a>,
    pub geometry: Conv2dGeometry,
}

/// At least one of `grad_weight` and `grad_bias` is present; both are accumulated into,
/// scaled by `scale`.
#[derive(Debug, Clone, Copy)]
pub struct Conv2dAccGradParametersArgs<'a> {
    pub grad_weight: Option<RawTensor<'a>>,
    pub grad_bias: Option<RawTensor<'a>>,
    pub grad_output: RawTensor<'a>,
    pub input: RawTensor<'a>,
    pub columns: RawTensor<'a>,
    pub ones: RawTensor<'a>,
    pub geometry: Conv2dGeometry,
    pub scale: f64,
}

/// Concatenation of `inputs` along `dim` into `result`.
#[derive(Debug, Clone, Copy)]
pub struct CatArgs<'a> {
    pub result: RawTensor<'a>,
    pub inputs: &'a [RawTensor<'a>],
    pub dim: i64,
}

macro_rules! kernel_ops {
    ($($(#[$meta:meta])* $marker:ident, $kernel:ident, $args:ident;)*) => {
        $(
            pub type $kernel =
                dyn for<'a> Fn(&ExecutionContext, $args<'a>) -> anyhow::Result<()> + Send + Sync;

            $(#[$meta])*
            #[derive(Debug, Clone, Copy)]
            pub struct $marker;

            impl KernelOp for $marker {
                const ID: OpId = OpId::$marker;
                type Kernel = $kernel;
            }

            impl $marker {
                /// Wraps a function or closure as a kernel entry for this operation.
                pub fn kernel<F>(f: F) -> Arc<$kernel>
                where
                    F: for<'a> Fn(&ExecutionContext, $args<'a>) -> anyhow::Result<()>
                        + Send
                        + Sync
                        + 'static,
                {
                    Arc::new(f)
                }
            }
        )*
    };
}

kernel_ops! {
    Gels, GelsKernel, GelsArgs;
    CopyIgnoringOverlaps, CopyKernel, CopyArgs;
    Conv2dForward, Conv2dForwardKernel, Conv2dForwardArgs;
    /// Backward phase producing the input gradient.
    Conv2dGradInput, Conv2dGradInputKernel, Conv2dGradInputArgs;
    /// Backward phase accumulating weight and bias gradients.
    Conv2dAccGradParameters, Conv2dAccGradParametersKernel, Conv2dAccGradParametersArgs;
    Cat, CatKernel, CatArgs;
}

type ErasedKernel = Box<dyn Any + Send + Sync>;

/// Immutable-after-setup map from `(operation, element kind)` to kernels for one device kind.
pub struct KernelTable {
    device: DeviceKind,
    entries: HashMap<(OpId, ElementKind), ErasedKernel>,
}

impl KernelTable {
    pub fn new(device: DeviceKind) -> Self {
        KernelTable {
            device,
            entries: HashMap::new(),
        }
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    /// Adds the kernel for `(K, kind)`. A second registration for the same pair is rejected
    /// and leaves the first entry in place.
    pub fn register<K: KernelOp>(
        &mut self,
        kind: ElementKind,
        kernel: Arc<K::Kernel>,
    ) -> DispatchResult<()> {
        let key = (K::ID, kind);
        if self.entries.contains_key(&key) {
            return Err(DispatchError::DuplicateKernel {
                op: K::ID.name(),
                kind,
            });
        }
        self.entries.insert(key, Box::new(kernel));
        Ok(())
    }

    /// Registers the same kernel for several element kinds.
    pub fn register_kinds<K: KernelOp>(
        &mut self,
        kinds: &[ElementKind],
        kernel: Arc<K::Kernel>,
    ) -> DispatchResult<()> {
        for &kind in kinds {
            self.register::<K>(kind, Arc::clone(&kernel))?;
        }
        Ok(())
    }

    pub fn lookup<K: KernelOp>(&self, kind: ElementKind) -> DispatchResult<Arc<K::Kernel>> {
        self.entries
            .get(&(K::ID, kind))
            .and_then(|entry| entry.downcast_ref::<Arc<K::Kernel>>())
            .cloned()
            .ok_or(DispatchError::UnsupportedElementKind {
                op: K::ID.name(),
                kind,
            })
    }

    pub fn contains(&self, op: OpId, kind: ElementKind) -> bool {
        self.entries.contains_key(&(op, kind))
    }

    /// Element kinds with a kernel for `op`, sorted by kind.
    pub fn supported_kinds(&self, op: OpId) -> Vec<ElementKind> {
        self.entries
            .keys()
            .filter(|(entry_op, _)| *entry_op == op)
            .map(|(_, kind)| *kind)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for KernelTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().copied().collect();
        keys.sort();
        f.debug_struct("KernelTable")
            .field("device", &self.device)
            .field("entries", &keys)
            .finish()
    }
}
