//! End-to-end checks any complete CPU kernel provider must pass.

use kernel_dispatch::{Device, Dispatcher, ElementKind, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_f32(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (index, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tol,
            "element {index}: got {a}, expected {e} (tol {tol})"
        );
    }
}

fn fresh(kind: ElementKind) -> Tensor {
    Tensor::zeros(kind, &[0], Device::CPU)
}

pub fn copy_respects_strides(dispatcher: &Dispatcher) {
    let src = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], Device::CPU);
    let dst_base = Tensor::zeros(ElementKind::Float32, &[3, 2], Device::CPU);
    // Transposed view of a 3x2 buffer: writing it row by row fills the buffer column-wise.
    let dst = dst_base.as_strided(&[2, 3], &[1, 2], 0);

    let returned = dispatcher.copy_ignoring_overlaps_(&dst, &src).unwrap();
    assert!(returned.same_handle(&dst));
    assert_eq!(
        dst_base.to_vec::<f32>().unwrap(),
        vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
    );
}

pub fn copy_supports_integer_kinds(dispatcher: &Dispatcher) {
    let src = Tensor::from_vec(vec![-3i64, 7, i64::MAX], &[3], Device::CPU);
    let dst = Tensor::zeros(ElementKind::Int64, &[3], Device::CPU);
    dispatcher.copy_ignoring_overlaps_(&dst, &src).unwrap();
    assert_eq!(dst.to_vec::<i64>().unwrap(), vec![-3, 7, i64::MAX]);
}

pub fn cat_matches_expected(dispatcher: &Dispatcher) {
    let a = Tensor::from_vec(vec![1i32, 2, 3, 4], &[2, 2], Device::CPU);
    let b = Tensor::from_vec(vec![5i32, 6], &[2, 1], Device::CPU);

    let along_columns = dispatcher.cat(&[a.clone(), b], 1).unwrap();
    assert_eq!(along_columns.shape().unwrap().as_slice(), &[2, 3]);
    assert_eq!(along_columns.to_vec::<i32>().unwrap(), vec![1, 2, 5, 3, 4, 6]);

    let c = Tensor::from_vec(vec![9i32, 8], &[1, 2], Device::CPU);
    let along_rows = dispatcher.cat(&[a, c], -2).unwrap();
    assert_eq!(along_rows.shape().unwrap().as_slice(), &[3, 2]);
    assert_eq!(along_rows.to_vec::<i32>().unwrap(), vec![1, 2, 3, 4, 9, 8]);
}

pub fn conv2d_forward_matches_expected(dispatcher: &Dispatcher) {
    let input = Tensor::from_vec(
        (1..=9).map(|v| v as f32).collect::<Vec<_>>(),
        &[1, 1, 3, 3],
        Device::CPU,
    );
    let weight = Tensor::from_vec(vec![1.0f32; 4], &[1, 1, 2, 2], Device::CPU);
    let bias = Tensor::from_vec(vec![0.5f32], &[1], Device::CPU);

    let (output, columns, ones) = dispatcher
        .conv2d_forward(&input, &weight, &[2], &bias, &[1], &[0])
        .unwrap();
    assert_eq!(output.shape().unwrap().as_slice(), &[1, 1, 2, 2]);
    assert_close(
        &output.to_vec::<f32>().unwrap(),
        &[12.5, 16.5, 24.5, 28.5],
        1e-6,
    );
    assert_eq!(columns.shape().unwrap().as_slice(), &[4, 4]);
    assert_eq!(ones.to_vec::<f32>().unwrap(), vec![1.0; 4]);
}

pub fn conv2d_forward_without_bias(dispatcher: &Dispatcher) {
    let input = Tensor::from_vec(vec![1.0f64, 2.0, 3.0, 4.0], &[1, 1, 2, 2], Device::CPU);
    let weight = Tensor::from_vec(vec![2.0f64], &[1, 1, 1, 1], Device::CPU);
    let (output, _, _) = dispatcher
        .conv2d_forward(&input, &weight, &[1, 1], &Tensor::undefined(), &[1, 1], &[0, 0])
        .unwrap();
    assert_eq!(output.to_vec::<f64>().unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
}

pub fn conv2d_backward_matches_expected(dispatcher: &Dispatcher) {
    let input = Tensor::from_vec(
        (1..=9).map(|v| v as f32).collect::<Vec<_>>(),
        &[1, 1, 3, 3],
        Device::CPU,
    );
    let weight = Tensor::from_vec(vec![1.0f32; 4], &[1, 1, 2, 2], Device::CPU);
    let (_, columns, ones) = dispatcher
        .conv2d_forward(&input, &weight, &[2], &Tensor::undefined(), &[1], &[0])
        .unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32; 4], &[1, 1, 2, 2], Device::CPU);

    let (grad_input, grad_weight, grad_bias) = dispatcher
        .conv2d_backward(
            &grad_output,
            &input,
            &weight,
            &[2],
            &[1],
            &[0],
            &columns,
            &ones,
            [true, true, true],
        )
        .unwrap();
    assert_eq!(grad_input.shape().unwrap().as_slice(), &[1, 1, 3, 3]);
    assert_close(
        &grad_input.to_vec::<f32>().unwrap(),
        &[1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0],
        1e-6,
    );
    assert_eq!(grad_weight.shape().unwrap().as_slice(), &[1, 1, 2, 2]);
    assert_close(
        &grad_weight.to_vec::<f32>().unwrap(),
        &[12.0, 16.0, 24.0, 28.0],
        1e-6,
    );
    assert_close(&grad_bias.to_vec::<f32>().unwrap(), &[4.0], 1e-6);
}

pub fn conv2d_backward_respects_mask(dispatcher: &Dispatcher) {
    let input = Tensor::from_vec(vec![1.0f32; 16], &[1, 1, 4, 4], Device::CPU);
    let weight = Tensor::from_vec(vec![1.0f32; 9], &[1, 1, 3, 3], Device::CPU);
    let (_, columns, ones) = dispatcher
        .conv2d_forward(&input, &weight, &[3], &Tensor::undefined(), &[1], &[1])
        .unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32; 16], &[1, 1, 4, 4], Device::CPU);

    let (grad_input, grad_weight, grad_bias) = dispatcher
        .conv2d_backward(
            &grad_output,
            &input,
            &weight,
            &[3],
            &[1],
            &[1],
            &columns,
            &ones,
            [false, false, true],
        )
        .unwrap();
    assert!(!grad_input.is_defined());
    assert!(!grad_weight.is_defined());
    assert_close(&grad_bias.to_vec::<f32>().unwrap(), &[16.0], 1e-6);
}

pub fn conv2d_out_variant_accumulates_parameter_gradients(dispatcher: &Dispatcher) {
    let input = Tensor::from_vec(vec![1.0f64, 2.0, 3.0, 4.0], &[1, 1, 2, 2], Device::CPU);
    let weight = Tensor::from_vec(vec![1.0f64], &[1, 1, 1, 1], Device::CPU);
    let grad_output = Tensor::from_vec(vec![1.0f64; 4], &[1, 1, 2, 2], Device::CPU);
    let (_, columns, ones) = dispatcher
        .conv2d_forward(&input, &weight, &[1], &Tensor::undefined(), &[1], &[0])
        .unwrap();
    let grad_weight = Tensor::from_vec(vec![100.0f64], &[1, 1, 1, 1], Device::CPU);

    let (grad_input, returned_weight, grad_bias) = dispatcher
        .conv2d_backward_out(
            &Tensor::undefined(),
            &grad_weight,
            &Tensor::undefined(),
            &grad_output,
            &input,
            &weight,
            &[1],
            &[1],
            &[0],
            &columns,
            &ones,
        )
        .unwrap();
    assert!(!grad_input.is_defined());
    assert!(!grad_bias.is_defined());
    assert!(returned_weight.same_handle(&grad_weight));
    assert_eq!(grad_weight.to_vec::<f64>().unwrap(), vec![110.0]);
}

pub fn allocating_and_out_variants_agree(dispatcher: &Dispatcher) {
    let mut rng = StdRng::seed_from_u64(42);
    let input = Tensor::from_vec(random_f32(&mut rng, 2 * 3 * 5 * 4), &[2, 3, 5, 4], Device::CPU);
    let weight = Tensor::from_vec(random_f32(&mut rng, 4 * 3 * 3 * 2), &[4, 3, 3, 2], Device::CPU);
    let bias = Tensor::from_vec(random_f32(&mut rng, 4), &[4], Device::CPU);

    let (output, columns, ones) = dispatcher
        .conv2d_forward(&input, &weight, &[3, 2], &bias, &[2, 1], &[1, 0])
        .unwrap();
    let (out_output, out_columns, out_ones) = (
        fresh(ElementKind::Float32),
        fresh(ElementKind::Float32),
        fresh(ElementKind::Float32),
    );
    dispatcher
        .conv2d_forward_out(
            &out_output,
            &out_columns,
            &out_ones,
            &input,
            &weight,
            &[3, 2],
            &bias,
            &[2, 1],
            &[1, 0],
        )
        .unwrap();
    assert_eq!(output.shape(), out_output.shape());
    assert_eq!(output.to_bytes(), out_output.to_bytes());
    assert_eq!(columns.to_bytes(), out_columns.to_bytes());
    assert_eq!(ones.to_bytes(), out_ones.to_bytes());

    let parts = [
        Tensor::from_vec(random_f32(&mut rng, 6), &[2, 3], Device::CPU),
        Tensor::from_vec(random_f32(&mut rng, 4), &[2, 2], Device::CPU),
    ];
    let allocated = dispatcher.cat(&parts, 1).unwrap();
    let result = fresh(ElementKind::Float32);
    dispatcher.cat_out(&result, &parts, 1).unwrap();
    assert_eq!(allocated.shape(), result.shape());
    assert_eq!(allocated.to_bytes(), result.to_bytes());
}

pub fn gels_solves_line_fit(dispatcher: &Dispatcher) {
    let a = Tensor::from_vec(vec![1.0f64, 1.0, 1.0, 2.0, 1.0, 3.0], &[3, 2], Device::CPU);
    let b = Tensor::from_vec(vec![1.0f64, 2.0, 2.0], &[3, 1], Device::CPU);
    let (solution, qr) = dispatcher.gels(&b, &a).unwrap();
    assert_eq!(solution.shape().unwrap().as_slice(), &[3, 1]);
    assert_eq!(qr.shape().unwrap().as_slice(), &[3, 2]);
    let values = solution.to_vec::<f64>().unwrap();
    assert!((values[0] - 2.0 / 3.0).abs() < 1e-10);
    assert!((values[1] - 0.5).abs() < 1e-10);

    let res1 = fresh(ElementKind::Float64);
    let res2 = fresh(ElementKind::Float64);
    dispatcher.gels_out(&res1, &res2, &b, &a).unwrap();
    assert_eq!(res1.to_bytes(), solution.to_bytes());
    assert_eq!(res2.to_bytes(), qr.to_bytes());
}

pub fn gels_rejects_underdetermined_systems(dispatcher: &Dispatcher) {
    let a = Tensor::from_vec(vec![1.0f32, 2.0, 3.0], &[1, 3], Device::CPU);
    let b = Tensor::from_vec(vec![1.0f32], &[1, 1], Device::CPU);
    let err = dispatcher.gels(&b, &a).unwrap_err();
    assert_eq!(err.op(), Some("gels"));
    assert!(!err.is_unsupported());
}
