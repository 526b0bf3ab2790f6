use std::sync::Arc;

use kernel_dispatch::{
    Device, DispatchConfig, Dispatcher, ElementKind, HostAllocator, OpId, Tensor,
};
use kernel_dispatch_tests::KernelRecorder;

struct Backward {
    grad_output: Tensor,
    input: Tensor,
    weight: Tensor,
    columns: Tensor,
    ones: Tensor,
}

impl Backward {
    fn new() -> Self {
        let tensor = |shape: &[usize]| Tensor::zeros(ElementKind::Float32, shape, Device::CPU);
        Backward {
            grad_output: tensor(&[1, 2, 3, 3]),
            input: tensor(&[1, 1, 5, 5]),
            weight: tensor(&[2, 1, 3, 3]),
            columns: tensor(&[9, 9]),
            ones: tensor(&[3, 3]),
        }
    }

    fn run(&self, dispatcher: &Dispatcher, mask: [bool; 3]) -> (Tensor, Tensor, Tensor) {
        dispatcher
            .conv2d_backward(
                &self.grad_output,
                &self.input,
                &self.weight,
                &[3],
                &[1],
                &[0],
                &self.columns,
                &self.ones,
                mask,
            )
            .unwrap()
    }

    fn run_out(
        &self,
        dispatcher: &Dispatcher,
        grads: [&Tensor; 3],
    ) -> (Tensor, Tensor, Tensor) {
        dispatcher
            .conv2d_backward_out(
                grads[0],
                grads[1],
                grads[2],
                &self.grad_output,
                &self.input,
                &self.weight,
                &[3, 3],
                &[1, 1],
                &[0, 0],
                &self.columns,
                &self.ones,
            )
            .unwrap()
    }
}

fn setup() -> (Dispatcher, Arc<KernelRecorder>, Arc<HostAllocator>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let recorder = KernelRecorder::new();
    let allocator = Arc::new(HostAllocator::new());
    let dispatcher = Dispatcher::new(
        Arc::new(recorder.table(&[ElementKind::Float32]).unwrap()),
        allocator.clone(),
    )
    .with_config(DispatchConfig::default());
    (dispatcher, recorder, allocator)
}

#[test]
fn empty_mask_runs_no_phase() {
    let (dispatcher, recorder, allocator) = setup();
    let (gi, gw, gb) = Backward::new().run(&dispatcher, [false, false, false]);
    assert!(!gi.is_defined() && !gw.is_defined() && !gb.is_defined());
    assert!(recorder.invocations().is_empty());
    assert_eq!(allocator.allocation_count(), 0);
}

#[test]
fn input_gradient_alone_runs_only_its_phase() {
    let (dispatcher, recorder, allocator) = setup();
    let (gi, gw, gb) = Backward::new().run(&dispatcher, [true, false, false]);
    assert!(gi.is_defined());
    assert_eq!(gi.shape().unwrap().as_slice(), &[0]);
    assert!(!gw.is_defined() && !gb.is_defined());
    assert_eq!(recorder.ops(), vec![OpId::Conv2dGradInput]);
    assert_eq!(allocator.allocation_count(), 1);
}

#[test]
fn parameter_gradients_run_only_the_parameter_phase() {
    let (dispatcher, recorder, _) = setup();
    let (gi, gw, gb) = Backward::new().run(&dispatcher, [false, true, true]);
    assert!(!gi.is_defined());
    assert!(gw.is_defined() && gb.is_defined());
    let calls = recorder.invocations();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].op, OpId::Conv2dAccGradParameters);
    assert_eq!(calls[0].targets, vec!["grad_weight", "grad_bias"]);
}

#[test]
fn bias_gradient_alone_still_runs_the_parameter_phase() {
    let (dispatcher, recorder, _) = setup();
    let (_, gw, gb) = Backward::new().run(&dispatcher, [false, false, true]);
    assert!(!gw.is_defined() && gb.is_defined());
    let calls = recorder.invocations();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].targets, vec!["grad_bias"]);
}

#[test]
fn full_mask_runs_phases_in_order() {
    let (dispatcher, recorder, allocator) = setup();
    Backward::new().run(&dispatcher, [true, true, true]);
    assert_eq!(
        recorder.ops(),
        vec![OpId::Conv2dGradInput, OpId::Conv2dAccGradParameters]
    );
    assert_eq!(allocator.allocation_count(), 3);
}

#[test]
fn out_variant_applies_the_same_phase_rule() {
    let (dispatcher, recorder, allocator) = setup();
    let backward = Backward::new();
    let undefined = Tensor::undefined();
    let grad_weight = Tensor::zeros(ElementKind::Float32, &[0], Device::CPU);

    let (gi, gw, gb) = backward.run_out(&dispatcher, [&undefined, &grad_weight, &undefined]);
    assert!(!gi.is_defined() && !gb.is_defined());
    assert!(gw.same_handle(&grad_weight));
    assert_eq!(recorder.ops(), vec![OpId::Conv2dAccGradParameters]);

    backward.run_out(&dispatcher, [&undefined, &undefined, &undefined]);
    assert_eq!(recorder.invocations().len(), 1);
    assert_eq!(allocator.allocation_count(), 0);
}
