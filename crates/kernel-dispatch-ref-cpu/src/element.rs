use half::{bf16, f16};
use kernel_dispatch::tensor::{Element, TensorImpl};

/// Floating-point element types the reference kernels compute with.
///
/// Kernels read operands into `f64`, compute, and convert back on write, so reduced
/// precision kinds share one implementation.
pub trait CpuFloat: Element + Copy {
    /// Converts from a 64-bit float into this element type.
    fn from_f64(v: f64) -> Self;
    /// Converts the element into a 64-bit float.
    fn to_f64(self) -> f64;
}

impl CpuFloat for f32 {
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl CpuFloat for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }

    fn to_f64(self) -> f64 {
        self
    }
}

impl CpuFloat for f16 {
    fn from_f64(v: f64) -> Self {
        f16::from_f64(v)
    }

    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }
}

impl CpuFloat for bf16 {
    fn from_f64(v: f64) -> Self {
        bf16::from_f64(v)
    }

    fn to_f64(self) -> f64 {
        bf16::to_f64(self)
    }
}

/// Logical elements of `tensor` widened to `f64`, in row-major order.
pub(crate) fn read_f64<T: CpuFloat>(tensor: &TensorImpl) -> anyhow::Result<Vec<f64>> {
    Ok(tensor
        .read_values::<T>()?
        .into_iter()
        .map(CpuFloat::to_f64)
        .collect())
}

/// Narrows `values` to `T` and writes them in row-major order.
pub(crate) fn write_f64<T: CpuFloat>(tensor: &TensorImpl, values: &[f64]) -> anyhow::Result<()> {
    let narrowed: Vec<T> = values.iter().map(|&v| T::from_f64(v)).collect();
    tensor.write_values(&narrowed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduced_precision_round_trips_representable_values() {
        for value in [0.0, 1.0, -2.5, 1024.0] {
            assert_eq!(f16::from_f64(value).to_f64(), value);
            assert_eq!(<bf16 as CpuFloat>::from_f64(value).to_f64(), value);
        }
    }
}
