//! Fresh output handles for allocating variants.

use crate::error::{DispatchError, DispatchResult};
use crate::tensor::{Allocator, Device, ElementKind, Tensor};

/// A defined, zero-element tensor of `kind` on `device`, backed by new storage from
/// `allocator`. Kernels resize it to the real output shape.
pub fn materialize_empty(
    allocator: &dyn Allocator,
    kind: ElementKind,
    device: Device,
) -> DispatchResult<Tensor> {
    let storage = allocator.allocate(kind, device)?;
    if storage.device() != device {
        return Err(DispatchError::Allocation {
            device,
            message: format!(
                "allocator '{}' returned storage on {}",
                allocator.name(),
                storage.device()
            ),
        });
    }
    Ok(Tensor::from_storage(kind, storage, &[0], &[1], 0))
}

/// [`materialize_empty`] when `want` is set, otherwise the undefined sentinel without
/// touching the allocator.
pub fn materialize_empty_if(
    want: bool,
    allocator: &dyn Allocator,
    kind: ElementKind,
    device: Device,
) -> DispatchResult<Tensor> {
    if want {
        materialize_empty(allocator, kind, device)
    } else {
        Ok(Tensor::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{HostAllocator, Storage};

    #[test]
    fn fresh_outputs_are_defined_and_empty() {
        let allocator = HostAllocator::new();
        let tensor = materialize_empty(&allocator, ElementKind::BFloat16, Device::cuda(2)).unwrap();
        assert!(tensor.is_defined());
        assert_eq!(tensor.shape().unwrap().as_slice(), &[0]);
        assert_eq!(tensor.strides().unwrap().as_slice(), &[1]);
        assert_eq!(tensor.device(), Some(Device::cuda(2)));
        assert_eq!(tensor.kind(), Some(ElementKind::BFloat16));
    }

    #[test]
    fn unwanted_outputs_skip_the_allocator() {
        let allocator = HostAllocator::new();
        let tensor = materialize_empty_if(false, &allocator, ElementKind::Float32, Device::CPU).unwrap();
        assert!(!tensor.is_defined());
        assert_eq!(allocator.allocation_count(), 0);
    }

    struct MisplacedAllocator;

    impl Allocator for MisplacedAllocator {
        fn name(&self) -> &str {
            "misplaced"
        }

        fn allocate(&self, _kind: ElementKind, _device: Device) -> DispatchResult<Storage> {
            Ok(Storage::empty(Device::CPU))
        }
    }

    #[test]
    fn storage_on_the_wrong_device_is_an_allocation_error() {
        let err = materialize_empty(&MisplacedAllocator, ElementKind::Float32, Device::cuda(0))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Allocation { .. }));
    }
}
