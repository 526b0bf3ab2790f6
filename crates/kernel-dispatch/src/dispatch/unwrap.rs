//! Argument validation against a call's dispatch key.

use crate::error::{DispatchError, DispatchResult};
use crate::tensor::{Device, ElementKind, RawTensor, Tensor};

/// Validates `handle` as argument `position` (named `arg`) of `op`.
///
/// Defined handles must live on `expected_device`, hold `expected_kind` elements and address
/// only elements inside their storage. An
/// undefined handle yields `None` when `allow_undefined` is set and
/// [`DispatchError::RequiredTensorUndefined`] otherwise.
#[allow(clippy::too_many_arguments)]
pub fn unwrap<'a>(
    handle: &'a Tensor,
    arg: &'static str,
    position: usize,
    op: &'static str,
    allow_undefined: bool,
    expected_device: Device,
    expected_kind: ElementKind,
) -> DispatchResult<Option<RawTensor<'a>>> {
    let inner = match handle {
        Tensor::Defined(inner) => inner,
        Tensor::Undefined if allow_undefined => return Ok(None),
        Tensor::Undefined => {
            return Err(DispatchError::RequiredTensorUndefined { op, arg, position });
        }
    };
    if inner.device() != expected_device {
        return Err(DispatchError::DeviceMismatch {
            op,
            arg,
            position,
            expected: expected_device,
            actual: inner.device(),
        });
    }
    if inner.kind() != expected_kind {
        return Err(DispatchError::ElementKindMismatch {
            op,
            arg,
            position,
            expected: expected_kind,
            actual: inner.kind(),
        });
    }
    inner.check_bounds(op, arg, position)?;
    Ok(Some(RawTensor::new(inner.as_ref())))
}

/// Describes one integer-list parameter for arity checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntListSpec {
    pub name: &'static str,
    pub position: usize,
    /// Whether a single value may stand in for every entry.
    pub broadcast: bool,
}

impl IntListSpec {
    /// Spec for a parameter that accepts either `N` values or one broadcast value.
    pub const fn broadcasting(name: &'static str, position: usize) -> Self {
        IntListSpec {
            name,
            position,
            broadcast: true,
        }
    }

    pub const fn exact(name: &'static str, position: usize) -> Self {
        IntListSpec {
            name,
            position,
            broadcast: false,
        }
    }
}

/// Normalizes `list`, passed to `op`, to exactly `N` entries.
pub fn check_int_list<const N: usize>(
    op: &'static str,
    list: &[i64],
    spec: &IntListSpec,
) -> DispatchResult<[i64; N]> {
    if list.len() == N {
        let mut out = [0i64; N];
        out.copy_from_slice(list);
        return Ok(out);
    }
    if list.len() == 1 && N > 1 && spec.broadcast {
        return Ok([list[0]; N]);
    }
    Err(DispatchError::InvalidArity {
        op,
        arg: spec.name,
        position: spec.position,
        expected: N,
        actual: list.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_fills_every_slot() {
        let spec = IntListSpec::broadcasting("stride", 5);
        assert_eq!(check_int_list::<2>("conv2d_forward", &[3], &spec).unwrap(), [3, 3]);
        assert_eq!(check_int_list::<2>("conv2d_forward", &[1, 2], &spec).unwrap(), [1, 2]);
    }

    #[test]
    fn wrong_lengths_report_arity() {
        let spec = IntListSpec::broadcasting("kernel_size", 3);
        let err = check_int_list::<2>("conv2d_forward", &[1, 2, 3], &spec).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InvalidArity {
                op: "conv2d_forward",
                arg: "kernel_size",
                position: 3,
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(
            err.to_string(),
            "expected a list of 2 ints but got 3 for argument #3 'kernel_size' in call to conv2d_forward"
        );
        assert!(check_int_list::<2>("conv2d_forward", &[], &spec).is_err());
    }

    #[test]
    fn exact_lists_do_not_broadcast() {
        let spec = IntListSpec::exact("padding", 6);
        assert!(check_int_list::<2>("conv2d_forward", &[1], &spec).is_err());
        assert_eq!(check_int_list::<1>("conv2d_forward", &[4], &spec).unwrap(), [4]);
    }

    #[test]
    fn undefined_handles_follow_allow_flag() {
        let undefined = Tensor::undefined();
        let ok = unwrap(
            &undefined,
            "bias",
            4,
            "conv2d_forward",
            true,
            Device::CPU,
            ElementKind::Float32,
        )
        .unwrap();
        assert!(ok.is_none());

        let err = unwrap(
            &undefined,
            "weight",
            2,
            "conv2d_forward",
            false,
            Device::CPU,
            ElementKind::Float32,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::RequiredTensorUndefined {
                arg: "weight",
                position: 2,
                ..
            }
        ));
    }

    #[test]
    fn device_is_checked_before_kind() {
        let tensor = Tensor::zeros(ElementKind::Float64, &[2], Device::cuda(1));
        let err = unwrap(
            &tensor,
            "self",
            1,
            "cat",
            false,
            Device::cuda(0),
            ElementKind::Float32,
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::DeviceMismatch { .. }));

        let err = unwrap(
            &tensor,
            "self",
            1,
            "cat",
            false,
            Device::cuda(1),
            ElementKind::Float32,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ElementKindMismatch {
                expected: ElementKind::Float32,
                actual: ElementKind::Float64,
                ..
            }
        ));
    }

    #[test]
    fn layouts_must_fit_their_storage() {
        let base = Tensor::zeros(ElementKind::Int32, &[6], Device::CPU);
        let check = |tensor: &Tensor| {
            unwrap(
                tensor,
                "src",
                2,
                "copy_ignoring_overlaps_",
                false,
                Device::CPU,
                ElementKind::Int32,
            )
            .map(|raw| raw.is_some())
        };
        assert!(check(&base.as_strided(&[3], &[2], 1)).unwrap());

        let err = check(&base.as_strided(&[3], &[3], 0)).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::StorageOutOfBounds {
                op: "copy_ignoring_overlaps_",
                arg: "src",
                position: 2,
                required: 7,
                available: 6
            }
        ));
    }
}
