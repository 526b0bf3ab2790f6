use std::sync::Arc;

use half::{bf16, f16};
use kernel_dispatch::{
    Device, DispatchConfig, DispatchError, Dispatcher, ElementKind, HostAllocator, Tensor,
};
use kernel_dispatch_ref_cpu::cpu_kernel_table;

fn dispatcher() -> Dispatcher {
    let _ = env_logger::builder().is_test(true).try_init();
    Dispatcher::new(
        Arc::new(cpu_kernel_table().unwrap()),
        Arc::new(HostAllocator::new()),
    )
    .with_config(DispatchConfig::default().with_deprecation_warnings(false))
}

#[test]
fn conv2d_forward_in_half_precision() {
    let input: Vec<f16> = (1..=9).map(|v| f16::from_f32(v as f32)).collect();
    let input = Tensor::from_vec(input, &[1, 3, 3], Device::CPU);
    let weight = Tensor::from_vec(vec![f16::ONE; 4], &[1, 1, 2, 2], Device::CPU);

    let (output, _, _) = dispatcher()
        .conv2d_forward(&input, &weight, &[2, 2], &Tensor::undefined(), &[1, 1], &[0, 0])
        .unwrap();
    assert_eq!(output.shape().unwrap().as_slice(), &[1, 2, 2]);
    let values: Vec<f32> = output
        .to_vec::<f16>()
        .unwrap()
        .into_iter()
        .map(f16::to_f32)
        .collect();
    assert_eq!(values, vec![12.0, 16.0, 24.0, 28.0]);
}

#[test]
fn conv2d_backward_in_bfloat16() {
    let dispatcher = dispatcher();
    let input = Tensor::from_vec(vec![bf16::ONE; 4], &[1, 1, 2, 2], Device::CPU);
    let weight = Tensor::from_vec(vec![bf16::from_f32(3.0)], &[1, 1, 1, 1], Device::CPU);
    let (_, columns, ones) = dispatcher
        .conv2d_forward(&input, &weight, &[1], &Tensor::undefined(), &[1], &[0])
        .unwrap();
    let grad_output = Tensor::from_vec(vec![bf16::ONE; 4], &[1, 1, 2, 2], Device::CPU);

    let (grad_input, grad_weight, grad_bias) = dispatcher
        .conv2d_backward(
            &grad_output,
            &input,
            &weight,
            &[1],
            &[1],
            &[0],
            &columns,
            &ones,
            [true, false, false],
        )
        .unwrap();
    assert_eq!(grad_input.to_vec::<bf16>().unwrap(), vec![bf16::from_f32(3.0); 4]);
    assert!(!grad_weight.is_defined());
    assert!(!grad_bias.is_defined());
}

#[test]
fn copy_supports_half_but_not_bfloat16() {
    let dispatcher = dispatcher();
    let src = Tensor::from_vec(vec![f16::from_f32(1.5), f16::NEG_ONE], &[2], Device::CPU);
    let dst = Tensor::zeros(ElementKind::Float16, &[2], Device::CPU);
    dispatcher.copy_ignoring_overlaps_(&dst, &src).unwrap();
    assert_eq!(dst.to_bytes(), src.to_bytes());

    let src = Tensor::from_vec(vec![bf16::ONE], &[1], Device::CPU);
    let dst = Tensor::zeros(ElementKind::BFloat16, &[1], Device::CPU);
    let err = dispatcher.copy_ignoring_overlaps_(&dst, &src).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::UnsupportedElementKind {
            op: "copy_ignoring_overlaps_",
            kind: ElementKind::BFloat16
        }
    ));
}

#[test]
fn cat_of_booleans() {
    let a = Tensor::from_bytes(ElementKind::Bool, vec![1, 0], &[2], Device::CPU);
    let b = Tensor::from_bytes(ElementKind::Bool, vec![0, 1, 1], &[3], Device::CPU);
    let joined = dispatcher().cat(&[a, b], 0).unwrap();
    assert_eq!(joined.kind(), Some(ElementKind::Bool));
    assert_eq!(joined.to_bytes(), Some(vec![1, 0, 0, 1, 1]));
}

#[test]
fn cat_skips_legacy_empty_inputs() {
    let empty = Tensor::zeros(ElementKind::Int16, &[0], Device::CPU);
    let block = Tensor::from_vec(vec![1i16, 2, 3, 4], &[2, 2], Device::CPU);
    let joined = dispatcher().cat(&[empty, block], 0).unwrap();
    assert_eq!(joined.shape().unwrap().as_slice(), &[2, 2]);
    assert_eq!(joined.to_vec::<i16>().unwrap(), vec![1, 2, 3, 4]);
}
