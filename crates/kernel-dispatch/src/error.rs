//! Structured failures surfaced by the dispatch layer.
//!
//! Every variant names the operation (and, where relevant, the argument and its position)
//! so callers can tell "this element kind is unsupported for this op" apart from
//! "the arguments were malformed".

use thiserror::Error;

use crate::tensor::{Device, DeviceKind, ElementKind};

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{op} not supported for element kind {kind}")]
    UnsupportedElementKind { op: &'static str, kind: ElementKind },

    #[error(
        "expected element kind {expected} but got {actual} for argument #{position} '{arg}' in call to {op}"
    )]
    ElementKindMismatch {
        op: &'static str,
        arg: &'static str,
        position: usize,
        expected: ElementKind,
        actual: ElementKind,
    },

    #[error(
        "expected device {expected} but got {actual} for argument #{position} '{arg}' in call to {op}"
    )]
    DeviceMismatch {
        op: &'static str,
        arg: &'static str,
        position: usize,
        expected: Device,
        actual: Device,
    },

    #[error("expected a defined tensor for argument #{position} '{arg}' in call to {op}")]
    RequiredTensorUndefined {
        op: &'static str,
        arg: &'static str,
        position: usize,
    },

    #[error(
        "argument #{position} '{arg}' in call to {op} addresses {required} elements but its storage holds {available}"
    )]
    StorageOutOfBounds {
        op: &'static str,
        arg: &'static str,
        position: usize,
        required: usize,
        available: usize,
    },

    #[error(
        "expected a list of {expected} ints but got {actual} for argument #{position} '{arg}' in call to {op}"
    )]
    InvalidArity {
        op: &'static str,
        arg: &'static str,
        position: usize,
        expected: usize,
        actual: usize,
    },

    #[error("expected a non-empty list of tensors in call to {op}")]
    EmptyTensorList { op: &'static str },

    #[error("kernel for {op} is already registered for element kind {kind}")]
    DuplicateKernel { op: &'static str, kind: ElementKind },

    #[error("registering {device} kernels failed: {message}")]
    Registration { device: DeviceKind, message: String },

    #[error("{op} kernel failed")]
    KernelFailed {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("allocation on {device} failed: {message}")]
    Allocation { device: Device, message: String },
}

impl DispatchError {
    /// Returns the operation name carried by the error, when the failure is tied to one.
    pub fn op(&self) -> Option<&'static str> {
        match self {
            DispatchError::UnsupportedElementKind { op, .. }
            | DispatchError::ElementKindMismatch { op, .. }
            | DispatchError::DeviceMismatch { op, .. }
            | DispatchError::RequiredTensorUndefined { op, .. }
            | DispatchError::StorageOutOfBounds { op, .. }
            | DispatchError::InvalidArity { op, .. }
            | DispatchError::EmptyTensorList { op }
            | DispatchError::DuplicateKernel { op, .. }
            | DispatchError::KernelFailed { op, .. } => Some(op),
            DispatchError::Registration { .. } | DispatchError::Allocation { .. } => None,
        }
    }

    /// True for failures caused by the element kind not being implemented, as opposed to
    /// malformed arguments.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, DispatchError::UnsupportedElementKind { .. })
    }
}
