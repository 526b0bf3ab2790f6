use kernel_dispatch::{global_kernel_table, DeviceKind, ElementKind, OpId};
use kernel_dispatch_ref_cpu::{CONV_KINDS, COPY_KINDS, GELS_KINDS};

#[test]
fn test_kernel_registry() {
    // Linking the reference crate registers its kernels with the global CPU table.
    let cpu = global_kernel_table(DeviceKind::Cpu).expect("failed to build cpu table");
    println!("cpu table: {:?}", cpu);

    assert_eq!(cpu.device(), DeviceKind::Cpu);
    assert_eq!(cpu.supported_kinds(OpId::Gels).len(), GELS_KINDS.len());
    assert_eq!(
        cpu.supported_kinds(OpId::CopyIgnoringOverlaps).len(),
        COPY_KINDS.len()
    );
    for kind in CONV_KINDS {
        assert!(cpu.contains(OpId::Conv2dForward, kind));
        assert!(cpu.contains(OpId::Conv2dGradInput, kind));
        assert!(cpu.contains(OpId::Conv2dAccGradParameters, kind));
    }
    assert!(!cpu.contains(OpId::Gels, ElementKind::Float16));
    assert!(cpu.contains(OpId::Cat, ElementKind::Bool));

    // Repeated lookups share one table.
    let again = global_kernel_table(DeviceKind::Cpu).unwrap();
    assert!(std::sync::Arc::ptr_eq(&cpu, &again));

    let cuda = global_kernel_table(DeviceKind::Cuda).unwrap();
    assert!(cuda.is_empty());
}
