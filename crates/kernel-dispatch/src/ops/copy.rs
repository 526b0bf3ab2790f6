use crate::dispatch::Dispatcher;
use crate::error::DispatchResult;
use crate::kernels::{CopyArgs, CopyIgnoringOverlaps};
use crate::tensor::Tensor;

impl Dispatcher {
    /// Copies `src` into `dst` in place without checking whether the two overlap in memory,
    /// and returns `dst`. Both must share `dst`'s element kind and device.
    pub fn copy_ignoring_overlaps_(&self, dst: &Tensor, src: &Tensor) -> DispatchResult<Tensor> {
        let site = self.resolve("copy_ignoring_overlaps_", dst, "self", 1)?;
        let kernel = self.lookup::<CopyIgnoringOverlaps>(&site)?;
        let args = CopyArgs {
            dst: site.require(dst, "self", 1)?,
            src: site.require(src, "src", 2)?,
        };
        self.invoke(&site, "copy", |ctx| kernel(ctx, args))?;
        Ok(dst.clone())
    }
}
