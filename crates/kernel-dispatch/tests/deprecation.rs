use std::sync::Arc;

use kernel_dispatch::deprecation::GELS_DEPRECATION;
use kernel_dispatch::{
    global_kernel_table, Device, DeviceKind, DispatchConfig, DispatchError, Dispatcher,
    ElementKind, HostAllocator, OpId, Tensor,
};
use kernel_dispatch_tests::KernelRecorder;

#[test]
fn gels_fires_its_notice_once_and_still_dispatches() {
    let _ = env_logger::builder().is_test(true).try_init();
    let recorder = KernelRecorder::new();
    let dispatcher = Dispatcher::new(
        Arc::new(recorder.table(&[ElementKind::Float64]).unwrap()),
        Arc::new(HostAllocator::new()),
    )
    .with_config(DispatchConfig::default().with_deprecation_warnings(true));
    let a = Tensor::zeros(ElementKind::Float64, &[3, 2], Device::CPU);
    let b = Tensor::zeros(ElementKind::Float64, &[3, 1], Device::CPU);

    dispatcher.gels(&b, &a).unwrap();
    assert!(GELS_DEPRECATION.has_fired());
    assert!(!GELS_DEPRECATION.emit(dispatcher.config()));

    let res1 = Tensor::zeros(ElementKind::Float64, &[0], Device::CPU);
    let res2 = Tensor::zeros(ElementKind::Float64, &[0], Device::CPU);
    dispatcher.gels_out(&res1, &res2, &b, &a).unwrap();
    assert_eq!(recorder.count(OpId::Gels), 2);
}

#[test]
fn config_round_trips_through_json() {
    let config = DispatchConfig::default().with_trace_kernels(true);
    let text = serde_json::to_string(&config).unwrap();
    assert_eq!(DispatchConfig::from_json(&text).unwrap(), config);
}

#[test]
fn unpopulated_device_tables_report_unsupported_kinds() {
    let table = global_kernel_table(DeviceKind::Cuda).unwrap();
    assert!(table.is_empty());

    let dispatcher = Dispatcher::for_device(DeviceKind::Cuda)
        .unwrap()
        .with_config(DispatchConfig::default().with_deprecation_warnings(false));
    let dst = Tensor::zeros(ElementKind::Float32, &[1], Device::cuda(0));
    let err = dispatcher.copy_ignoring_overlaps_(&dst, &dst).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::UnsupportedElementKind {
            kind: ElementKind::Float32,
            ..
        }
    ));
}
