extern crate self as kernel_dispatch;

pub use linkme;

pub mod config;
pub mod context;
pub mod deprecation;
pub mod dispatch;
mod env;
pub mod error;
pub mod kernels;
pub mod ops;
pub mod tensor;

pub use config::{global_config, DispatchConfig};
pub use context::{current_context, DeviceGuard, ExecutionContext, StreamGuard, StreamId};
pub use dispatch::Dispatcher;
pub use error::{DispatchError, DispatchResult};
pub use kernels::{global_kernel_table, KernelOp, KernelTable, OpId};
pub use tensor::{Allocator, Device, DeviceKind, ElementKind, HostAllocator, RawTensor, Tensor};
