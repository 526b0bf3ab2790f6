//! Tensor handles: the tagged `Defined`/`Undefined` value passed through dispatch, and the
//! validated raw reference handed to kernels.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};

use smallvec::SmallVec;

use super::shape::{self, Dims};
use super::storage::{Element, Storage};
use super::{Device, ElementKind};
use crate::error::{DispatchError, DispatchResult};

/// A tensor handle as seen by callers of the dispatch layer.
///
/// `Undefined` means "no tensor here" (an absent optional input or an output that was not
/// requested) and is distinct from a defined tensor with zero elements. Cloning a `Defined`
/// handle yields another reference to the same tensor, so results written by a kernel are
/// visible through every clone.
#[derive(Clone, Default)]
pub enum Tensor {
    #[default]
    Undefined,
    Defined(Arc<TensorImpl>),
}

/// Metadata and storage of a defined tensor.
pub struct TensorImpl {
    kind: ElementKind,
    device: Device,
    layout: RwLock<Layout>,
}

#[derive(Clone)]
struct Layout {
    shape: Dims,
    strides: Dims,
    offset: usize,
    storage: Storage,
}

impl TensorImpl {
    fn new(kind: ElementKind, storage: Storage, shape: Dims, strides: Dims, offset: usize) -> Self {
        assert_eq!(
            shape.len(),
            strides.len(),
            "shape rank {} does not match stride rank {}",
            shape.len(),
            strides.len()
        );
        TensorImpl {
            kind,
            device: storage.device(),
            layout: RwLock::new(Layout {
                shape,
                strides,
                offset,
                storage,
            }),
        }
    }

    fn layout(&self) -> Layout {
        self.layout
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn shape(&self) -> Dims {
        self.layout().shape
    }

    pub fn strides(&self) -> Dims {
        self.layout().strides
    }

    pub fn storage_offset(&self) -> usize {
        self.layout().offset
    }

    pub fn storage(&self) -> Storage {
        self.layout().storage
    }

    pub fn dim(&self) -> usize {
        self.layout().shape.len()
    }

    pub fn numel(&self) -> usize {
        shape::numel(&self.layout().shape)
    }

    pub fn is_contiguous(&self) -> bool {
        let layout = self.layout();
        shape::is_contiguous(&layout.shape, &layout.strides)
    }

    /// Storage elements required by the current layout, saturating on overflow.
    pub fn required_elements(&self) -> usize {
        let layout = self.layout();
        shape::storage_extent(&layout.shape, &layout.strides, layout.offset).unwrap_or(usize::MAX)
    }

    /// Elements addressable in the backing storage.
    pub fn available_elements(&self) -> usize {
        self.storage().nbytes() / self.kind.size_in_bytes()
    }

    /// Fails unless every element of the layout lies inside the backing storage.
    pub fn check_bounds(
        &self,
        op: &'static str,
        arg: &'static str,
        position: usize,
    ) -> DispatchResult<()> {
        let required = self.required_elements();
        let available = self.available_elements();
        if required > available {
            return Err(DispatchError::StorageOutOfBounds {
                op,
                arg,
                position,
                required,
                available,
            });
        }
        Ok(())
    }

    /// Reshapes the tensor to `new_shape` with contiguous strides, growing the underlying
    /// storage when it is too small. Resizing to the current shape keeps the current strides.
    pub fn resize(&self, new_shape: &[usize]) {
        let mut layout = self
            .layout
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if layout.shape.as_slice() != new_shape {
            layout.shape = SmallVec::from_slice(new_shape);
            layout.strides = shape::contiguous_strides(new_shape);
        }
        let needed = (layout.offset + shape::numel(new_shape)) * self.kind.size_in_bytes();
        layout.storage.ensure_capacity(needed);
    }

    /// Copies the logical elements, in row-major order, as raw bytes.
    pub fn read_bytes(&self) -> Vec<u8> {
        let layout = self.layout();
        let width = self.kind.size_in_bytes();
        let mut out = Vec::with_capacity(shape::numel(&layout.shape) * width);
        layout.storage.read(|bytes| {
            shape::for_each_offset(&layout.shape, &layout.strides, layout.offset, |elem| {
                let start = elem * width;
                out.extend_from_slice(&bytes[start..start + width]);
            });
        });
        out
    }

    /// Writes row-major logical elements from raw bytes, honouring the tensor's strides.
    ///
    /// Panics if `src` does not hold exactly `numel` elements.
    pub fn write_bytes(&self, src: &[u8]) {
        let layout = self.layout();
        let width = self.kind.size_in_bytes();
        assert_eq!(
            src.len(),
            shape::numel(&layout.shape) * width,
            "byte count does not match tensor extent"
        );
        layout.storage.write(|bytes| {
            let mut cursor = 0usize;
            shape::for_each_offset(&layout.shape, &layout.strides, layout.offset, |elem| {
                let start = elem * width;
                bytes[start..start + width].copy_from_slice(&src[cursor..cursor + width]);
                cursor += width;
            });
        });
    }

    /// Reads the logical elements as `T`, which must match the tensor's element kind.
    pub fn read_values<T: Element>(&self) -> DispatchResult<Vec<T>> {
        self.check_element::<T>("read_values")?;
        self.check_bounds("read_values", "self", 0)?;
        Ok(bytemuck::pod_collect_to_vec(&self.read_bytes()))
    }

    /// Writes `values` in row-major order; `values.len()` must equal `numel`.
    pub fn write_values<T: Element>(&self, values: &[T]) -> DispatchResult<()> {
        self.check_element::<T>("write_values")?;
        self.check_bounds("write_values", "self", 0)?;
        self.write_bytes(bytemuck::cast_slice(values));
        Ok(())
    }

    fn check_element<T: Element>(&self, op: &'static str) -> DispatchResult<()> {
        if T::KIND != self.kind {
            return Err(DispatchError::ElementKindMismatch {
                op,
                arg: "self",
                position: 0,
                expected: self.kind,
                actual: T::KIND,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for TensorImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = self.layout();
        f.debug_struct("TensorImpl")
            .field("kind", &self.kind)
            .field("device", &self.device)
            .field("shape", &layout.shape.as_slice())
            .field("strides", &layout.strides.as_slice())
            .field("offset", &layout.offset)
            .finish()
    }
}

impl Tensor {
    pub fn undefined() -> Self {
        Tensor::Undefined
    }

    /// Builds a contiguous tensor from host values.
    ///
    /// Panics if `values.len()` does not match the product of `shape`.
    pub fn from_vec<T: Element>(values: Vec<T>, shape: &[usize], device: Device) -> Self {
        assert_eq!(
            values.len(),
            shape::numel(shape),
            "value count does not match shape {:?}",
            shape
        );
        let bytes = bytemuck::cast_slice::<T, u8>(&values).to_vec();
        Tensor::from_bytes(T::KIND, bytes, shape, device)
    }

    /// Builds a contiguous tensor of `kind` from raw row-major bytes.
    pub fn from_bytes(kind: ElementKind, bytes: Vec<u8>, shape: &[usize], device: Device) -> Self {
        assert_eq!(
            bytes.len(),
            shape::numel(shape) * kind.size_in_bytes(),
            "byte count does not match shape {:?}",
            shape
        );
        let storage = Storage::new(device, bytes);
        Tensor::from_storage(kind, storage, shape, &shape::contiguous_strides(shape), 0)
    }

    pub fn zeros(kind: ElementKind, shape: &[usize], device: Device) -> Self {
        let bytes = vec![0u8; shape::numel(shape) * kind.size_in_bytes()];
        Tensor::from_bytes(kind, bytes, shape, device)
    }

    /// Wraps an existing storage region with explicit layout metadata.
    pub fn from_storage(
        kind: ElementKind,
        storage: Storage,
        shape: &[usize],
        strides: &[usize],
        offset: usize,
    ) -> Self {
        Tensor::Defined(Arc::new(TensorImpl::new(
            kind,
            storage,
            SmallVec::from_slice(shape),
            SmallVec::from_slice(strides),
            offset,
        )))
    }

    /// Creates a view sharing this tensor's storage with its own shape, strides and offset.
    /// A view of an undefined handle is undefined.
    ///
    /// The layout is not checked against the storage here; dispatch rejects views that reach
    /// past the end of their storage with [`DispatchError::StorageOutOfBounds`].
    pub fn as_strided(&self, shape: &[usize], strides: &[usize], offset: usize) -> Tensor {
        match self {
            Tensor::Undefined => Tensor::Undefined,
            Tensor::Defined(inner) => {
                Tensor::from_storage(inner.kind(), inner.storage(), shape, strides, offset)
            }
        }
    }

    /// Reinterprets a contiguous tensor with a new shape of the same element count.
    ///
    /// Panics if the tensor is not contiguous or the element counts differ.
    pub fn view(&self, shape: &[usize]) -> Tensor {
        match self {
            Tensor::Undefined => Tensor::Undefined,
            Tensor::Defined(inner) => {
                assert!(inner.is_contiguous(), "view requires a contiguous tensor");
                assert_eq!(
                    inner.numel(),
                    shape::numel(shape),
                    "view shape {:?} does not match element count",
                    shape
                );
                self.as_strided(shape, &shape::contiguous_strides(shape), inner.storage_offset())
            }
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Tensor::Defined(_))
    }

    pub fn defined(&self) -> Option<&Arc<TensorImpl>> {
        match self {
            Tensor::Defined(inner) => Some(inner),
            Tensor::Undefined => None,
        }
    }

    pub fn kind(&self) -> Option<ElementKind> {
        self.defined().map(|inner| inner.kind())
    }

    pub fn device(&self) -> Option<Device> {
        self.defined().map(|inner| inner.device())
    }

    pub fn shape(&self) -> Option<Dims> {
        self.defined().map(|inner| inner.shape())
    }

    pub fn strides(&self) -> Option<Dims> {
        self.defined().map(|inner| inner.strides())
    }

    pub fn numel(&self) -> usize {
        self.defined().map_or(0, |inner| inner.numel())
    }

    /// Reads the logical elements of a defined tensor as `T`.
    pub fn to_vec<T: Element>(&self) -> DispatchResult<Vec<T>> {
        match self {
            Tensor::Defined(inner) => inner.read_values(),
            Tensor::Undefined => Err(DispatchError::RequiredTensorUndefined {
                op: "to_vec",
                arg: "self",
                position: 0,
            }),
        }
    }

    /// Logical elements of a defined tensor as raw row-major bytes.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        self.defined().map(|inner| inner.read_bytes())
    }

    /// Snapshot of the entire backing storage, independent of shape and strides.
    pub fn storage_bytes(&self) -> Option<Vec<u8>> {
        self.defined()
            .map(|inner| inner.storage().read(|bytes| bytes.to_vec()))
    }

    /// Whether both handles refer to the same tensor (not merely the same storage).
    pub fn same_handle(&self, other: &Tensor) -> bool {
        match (self, other) {
            (Tensor::Defined(lhs), Tensor::Defined(rhs)) => Arc::ptr_eq(lhs, rhs),
            _ => false,
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tensor::Undefined => f.write_str("Tensor::Undefined"),
            Tensor::Defined(inner) => fmt::Debug::fmt(inner.as_ref(), f),
        }
    }
}

impl From<Option<Tensor>> for Tensor {
    fn from(value: Option<Tensor>) -> Self {
        value.unwrap_or_default()
    }
}

/// Validated, borrowed reference to a defined tensor, as passed to kernels.
///
/// Obtained only through the unwrap layer, which guarantees that the tensor matches the
/// dispatch key of the call.
#[derive(Clone, Copy)]
pub struct RawTensor<'a> {
    inner: &'a TensorImpl,
}

impl<'a> RawTensor<'a> {
    pub(crate) fn new(inner: &'a TensorImpl) -> Self {
        RawTensor { inner }
    }

    pub fn get(self) -> &'a TensorImpl {
        self.inner
    }

    /// Whether two raw references point at the same tensor.
    pub fn same_tensor(self, other: RawTensor<'_>) -> bool {
        std::ptr::eq(self.inner, other.inner)
    }
}

impl Deref for RawTensor<'_> {
    type Target = TensorImpl;

    fn deref(&self) -> &TensorImpl {
        self.inner
    }
}

impl fmt::Debug for RawTensor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.inner, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_is_distinct_from_zero_size() {
        let empty = Tensor::zeros(ElementKind::Float32, &[0], Device::CPU);
        assert!(empty.is_defined());
        assert_eq!(empty.numel(), 0);
        assert!(!Tensor::undefined().is_defined());
        assert!(Tensor::undefined().shape().is_none());
    }

    #[test]
    fn views_alias_storage_but_keep_their_own_layout() {
        let base = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], Device::CPU);
        let transposed = base.as_strided(&[3, 2], &[1, 3], 0);
        assert_eq!(
            transposed.to_vec::<f32>().unwrap(),
            vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
        );
        assert_eq!(base.shape().unwrap().as_slice(), &[2, 3]);

        let column = base.as_strided(&[2], &[3], 1);
        column
            .defined()
            .unwrap()
            .write_values(&[20.0f32, 50.0])
            .unwrap();
        assert_eq!(
            base.to_vec::<f32>().unwrap(),
            vec![1.0, 20.0, 3.0, 4.0, 50.0, 6.0]
        );
    }

    #[test]
    fn resize_grows_storage_and_resets_strides() {
        let tensor = Tensor::zeros(ElementKind::Float64, &[0], Device::CPU);
        let inner = tensor.defined().unwrap();
        inner.resize(&[2, 5]);
        assert_eq!(inner.strides().as_slice(), &[5, 1]);
        assert_eq!(inner.storage().nbytes(), 80);
    }

    #[test]
    fn typed_access_checks_element_kind() {
        let tensor = Tensor::from_vec(vec![1i32, 2, 3], &[3], Device::CPU);
        let err = tensor.to_vec::<f32>().unwrap_err();
        assert!(matches!(err, DispatchError::ElementKindMismatch { .. }));
        assert!(Tensor::undefined().to_vec::<i32>().is_err());
    }

    #[test]
    fn views_past_the_end_of_storage_fail_bounds_checks() {
        let base = Tensor::zeros(ElementKind::Float32, &[4], Device::CPU);
        let shifted = base.as_strided(&[4], &[1], 2);
        let inner = shifted.defined().unwrap();
        assert_eq!(inner.required_elements(), 6);
        assert_eq!(inner.available_elements(), 4);
        assert!(matches!(
            shifted.to_vec::<f32>().unwrap_err(),
            DispatchError::StorageOutOfBounds {
                required: 6,
                available: 4,
                ..
            }
        ));
        assert!(inner.write_values(&[1.0f32; 4]).is_err());
        assert_eq!(base.to_vec::<f32>().unwrap(), vec![0.0; 4]);

        let empty = base.as_strided(&[0, 3], &[100, 100], 100);
        assert_eq!(empty.defined().unwrap().required_elements(), 0);
        assert!(empty.to_vec::<f32>().unwrap().is_empty());
    }
}
