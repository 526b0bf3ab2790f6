//! Selective materialization of backward outputs.
//!
//! A backward operation produces a fixed number of gradient slots. The caller's mask decides
//! which slots are materialized; kernel phases then run only when they have something to
//! write.

use crate::error::DispatchResult;
use crate::tensor::{Allocator, Device, ElementKind, Tensor};

use super::materialize::materialize_empty_if;

/// A kernel invocation that writes a group of output slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelPhase {
    pub name: &'static str,
    pub slots: &'static [usize],
}

impl KernelPhase {
    /// A phase runs when at least one of its slots holds a defined handle.
    pub fn should_run(&self, outputs: &[Tensor]) -> bool {
        self.slots
            .iter()
            .any(|&slot| outputs.get(slot).is_some_and(Tensor::is_defined))
    }
}

pub const CONV2D_GRAD_INPUT: KernelPhase = KernelPhase {
    name: "grad_input",
    slots: &[0],
};

pub const CONV2D_GRAD_PARAMETERS: KernelPhase = KernelPhase {
    name: "grad_parameters",
    slots: &[1, 2],
};

pub const CONV2D_BACKWARD_PHASES: [KernelPhase; 2] = [CONV2D_GRAD_INPUT, CONV2D_GRAD_PARAMETERS];

/// One empty output per set mask bit, the undefined sentinel elsewhere.
pub fn materialize_masked<const K: usize>(
    mask: [bool; K],
    allocator: &dyn Allocator,
    kind: ElementKind,
    device: Device,
) -> DispatchResult<[Tensor; K]> {
    let mut outputs: [Tensor; K] = std::array::from_fn(|_| Tensor::Undefined);
    for (slot, want) in mask.into_iter().enumerate() {
        outputs[slot] = materialize_empty_if(want, allocator, kind, device)?;
    }
    Ok(outputs)
}
