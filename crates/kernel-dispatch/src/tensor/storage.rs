//! Shared byte storage backing tensor handles, plus the allocator collaborator that hands it out.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytemuck::Pod;
use half::{bf16, f16};

use super::{Device, ElementKind};
use crate::error::DispatchResult;

/// Scalar types that can be read from and written to tensor storage.
///
/// The associated [`ElementKind`] ties a Rust type to the runtime tag used for dispatch, so
/// typed host access can be checked against a handle's kind.
pub trait Element: Pod + Send + Sync + 'static {
    const KIND: ElementKind;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(impl Element for $ty {
            const KIND: ElementKind = ElementKind::$kind;
        })*
    };
}

impl_element!(
    f16 => Float16,
    bf16 => BFloat16,
    f32 => Float32,
    f64 => Float64,
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
);

/// Reference-counted storage region. Every handle (and view) holding a clone keeps the region
/// alive; the bytes are released when the last holder drops.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    device: Device,
    bytes: RwLock<Vec<u8>>,
}

impl Storage {
    pub fn new(device: Device, bytes: Vec<u8>) -> Self {
        Storage {
            inner: Arc::new(StorageInner {
                device,
                bytes: RwLock::new(bytes),
            }),
        }
    }

    /// Zero-length storage on `device`.
    pub fn empty(device: Device) -> Self {
        Storage::new(device, Vec::new())
    }

    pub fn device(&self) -> Device {
        self.inner.device
    }

    pub fn nbytes(&self) -> usize {
        self.read(|bytes| bytes.len())
    }

    /// Grows the region in place so that at least `nbytes` are addressable. Existing bytes are
    /// preserved and new bytes are zeroed; every alias observes the growth.
    pub fn ensure_capacity(&self, nbytes: usize) {
        let mut guard = self
            .inner
            .bytes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.len() < nbytes {
            guard.resize(nbytes, 0);
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self
            .inner
            .bytes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(guard.as_slice())
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self
            .inner
            .bytes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(guard.as_mut_slice())
    }

    /// Whether two storages are the same region.
    pub fn ptr_eq(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live holders (handles, views, or raw clones) of this region.
    pub fn holder_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("device", &self.inner.device)
            .field("nbytes", &self.nbytes())
            .finish()
    }
}

/// Device allocator collaborator used by output materialization.
///
/// Implementations must be safe to call from concurrent dispatches targeting distinct outputs.
pub trait Allocator: Send + Sync {
    /// Human-readable allocator identifier used in logs.
    fn name(&self) -> &str;

    /// Returns a fresh, zero-length storage region for `kind` on `device`.
    fn allocate(&self, kind: ElementKind, device: Device) -> DispatchResult<Storage>;
}

/// Allocator backed by host memory; device identity is carried as a tag only.
#[derive(Debug, Default)]
pub struct HostAllocator {
    allocations: AtomicUsize,
}

impl HostAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of storages handed out so far.
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }
}

impl Allocator for HostAllocator {
    fn name(&self) -> &str {
        "host"
    }

    fn allocate(&self, _kind: ElementKind, device: Device) -> DispatchResult<Storage> {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(Storage::empty(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_is_visible_through_every_alias() {
        let storage = Storage::empty(Device::CPU);
        let alias = storage.clone();
        storage.ensure_capacity(16);
        assert_eq!(alias.nbytes(), 16);
        assert!(alias.ptr_eq(&storage));
        assert_eq!(storage.holder_count(), 2);
        drop(alias);
        assert_eq!(storage.holder_count(), 1);
    }

    #[test]
    fn host_allocator_counts_allocations() {
        let allocator = HostAllocator::new();
        let storage = allocator
            .allocate(ElementKind::Float32, Device::cuda(1))
            .unwrap();
        assert_eq!(storage.nbytes(), 0);
        assert_eq!(storage.device(), Device::cuda(1));
        assert_eq!(allocator.allocation_count(), 1);
    }
}
