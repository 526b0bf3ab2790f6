pub mod recording_kernels;
pub mod smoke;

pub use recording_kernels::{Invocation, KernelRecorder};

/// Instantiates the shared smoke suite for a kernel provider.
///
/// `$dispatcher_ctor` is any expression callable with no arguments that returns a
/// [`kernel_dispatch::Dispatcher`] backed by the provider under test.
#[macro_export]
macro_rules! define_kernel_tests {
    ($module:ident, $dispatcher_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            #[allow(unused_imports)]
            use super::*;
            use $crate::smoke;

            macro_rules! smoke_test {
                ($name:ident) => {
                    #[test]
                    fn $name() {
                        let dispatcher = ($dispatcher_ctor)();
                        smoke::$name(&dispatcher);
                    }
                };
            }

            smoke_test!(copy_respects_strides);
            smoke_test!(copy_supports_integer_kinds);
            smoke_test!(cat_matches_expected);
            smoke_test!(conv2d_forward_matches_expected);
            smoke_test!(conv2d_forward_without_bias);
            smoke_test!(conv2d_backward_matches_expected);
            smoke_test!(conv2d_backward_respects_mask);
            smoke_test!(conv2d_out_variant_accumulates_parameter_gradients);
            smoke_test!(allocating_and_out_variants_agree);
            smoke_test!(gels_solves_line_fit);
            smoke_test!(gels_rejects_underdetermined_systems);
        }
    };
}
