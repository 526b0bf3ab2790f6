//! Process-wide kernel tables assembled from link-time registrars.
//!
//! Kernel providers contribute a [`KernelRegistrar`] to [`KERNEL_REGISTRARS`]; the table for a
//! device kind is built on first request and never mutated afterwards.
//!
//! ```ignore
//! #[kernel_dispatch::linkme::distributed_slice(kernel_dispatch::kernels::KERNEL_REGISTRARS)]
//! static REGISTER_MY_KERNELS: KernelRegistrar = KernelRegistrar {
//!     device: DeviceKind::Cpu,
//!     register: register_my_kernels,
//! };
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use once_cell::sync::Lazy;

use super::KernelTable;
use crate::error::{DispatchError, DispatchResult};
use crate::tensor::{DeviceKind, ElementKind};

/// One provider's contribution to the global table of a device kind.
pub struct KernelRegistrar {
    pub device: DeviceKind,
    pub register: fn(&mut KernelTable) -> DispatchResult<()>,
}

#[linkme::distributed_slice]
pub static KERNEL_REGISTRARS: [KernelRegistrar] = [..];

/// Outcome of building one device kind's table; failures keep enough to be re-raised.
enum Built {
    Ready(Arc<KernelTable>),
    Duplicate { op: &'static str, kind: ElementKind },
    Failed(String),
}

static GLOBAL_TABLES: Lazy<HashMap<DeviceKind, Built>> = Lazy::new(|| {
    [DeviceKind::Cpu, DeviceKind::Cuda]
        .into_iter()
        .map(|device| {
            let built = match build_table(device, &KERNEL_REGISTRARS) {
                Ok(table) => Built::Ready(Arc::new(table)),
                Err(DispatchError::DuplicateKernel { op, kind }) => Built::Duplicate { op, kind },
                Err(other) => Built::Failed(other.to_string()),
            };
            (device, built)
        })
        .collect()
});

/// Runs every registrar in `registrars` that targets `device` against a fresh table.
///
/// Duplicate pairs keep their [`DispatchError::DuplicateKernel`] error; any other failure is
/// reported as [`DispatchError::Registration`].
pub fn build_table(
    device: DeviceKind,
    registrars: &[KernelRegistrar],
) -> DispatchResult<KernelTable> {
    let mut table = KernelTable::new(device);
    for registrar in registrars.iter().filter(|r| r.device == device) {
        match (registrar.register)(&mut table) {
            Ok(()) => {}
            Err(err @ DispatchError::DuplicateKernel { .. }) => return Err(err),
            Err(other) => {
                return Err(DispatchError::Registration {
                    device,
                    message: other.to_string(),
                })
            }
        }
    }
    debug!("built {device} kernel table with {} entries", table.len());
    Ok(table)
}

/// Returns the process-wide table for `device`, built from every linked registrar.
///
/// Two providers registering the same `(operation, kind)` pair make the table unusable; the
/// conflict is reported on every request.
pub fn global_kernel_table(device: DeviceKind) -> DispatchResult<Arc<KernelTable>> {
    match GLOBAL_TABLES.get(&device) {
        Some(Built::Ready(table)) => Ok(Arc::clone(table)),
        Some(Built::Duplicate { op, kind }) => Err(DispatchError::DuplicateKernel {
            op: *op,
            kind: *kind,
        }),
        Some(Built::Failed(message)) => Err(DispatchError::Registration {
            device,
            message: message.clone(),
        }),
        None => Ok(Arc::new(KernelTable::new(device))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::CopyIgnoringOverlaps;

    fn register_copy(table: &mut KernelTable) -> DispatchResult<()> {
        table.register::<CopyIgnoringOverlaps>(
            ElementKind::Float32,
            CopyIgnoringOverlaps::kernel(|_, _| Ok(())),
        )
    }

    fn register_nothing_usable(_: &mut KernelTable) -> DispatchResult<()> {
        Err(DispatchError::Allocation {
            device: crate::tensor::Device::CPU,
            message: "scratch buffer unavailable".to_string(),
        })
    }

    #[test]
    fn registrars_only_populate_their_device() {
        let registrars = [KernelRegistrar {
            device: DeviceKind::Cuda,
            register: register_copy,
        }];
        assert!(build_table(DeviceKind::Cpu, &registrars).unwrap().is_empty());
        assert_eq!(build_table(DeviceKind::Cuda, &registrars).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_and_failed_registrations_are_distinguished() {
        let twice = [
            KernelRegistrar {
                device: DeviceKind::Cpu,
                register: register_copy,
            },
            KernelRegistrar {
                device: DeviceKind::Cpu,
                register: register_copy,
            },
        ];
        assert!(matches!(
            build_table(DeviceKind::Cpu, &twice).unwrap_err(),
            DispatchError::DuplicateKernel {
                kind: ElementKind::Float32,
                ..
            }
        ));

        let failing = [KernelRegistrar {
            device: DeviceKind::Cpu,
            register: register_nothing_usable,
        }];
        let err = build_table(DeviceKind::Cpu, &failing).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Registration {
                device: DeviceKind::Cpu,
                ..
            }
        ));
        assert!(err.to_string().contains("scratch buffer unavailable"));
        assert_eq!(err.op(), None);
    }
}
