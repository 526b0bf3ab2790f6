//! Tensor handles, element kinds, devices and storage.
//!
//! Handles are the values that flow through dispatch. A handle is either the undefined
//! sentinel or a reference to device storage described by shape, strides and offset.

mod device;
pub mod dtype;
mod handle;
pub mod shape;
pub mod storage;

pub use device::{Device, DeviceKind};
pub use dtype::ElementKind;
pub use handle::{RawTensor, Tensor, TensorImpl};
pub use shape::Dims;
pub use storage::{Allocator, Element, HostAllocator, Storage};
