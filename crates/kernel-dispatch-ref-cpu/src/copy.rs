use anyhow::ensure;
use kernel_dispatch::kernels::CopyArgs;
use kernel_dispatch::ExecutionContext;

use crate::ensure_host;

/// Element-wise copy honouring both tensors' strides. The source is read in full before the
/// destination is written, so aliasing views produce the pre-copy source values.
pub(crate) fn copy_ignoring_overlaps(ctx: &ExecutionContext, args: CopyArgs<'_>) -> anyhow::Result<()> {
    ensure_host(ctx)?;
    let CopyArgs { dst, src } = args;
    ensure!(
        dst.numel() == src.numel(),
        "copy expects matching element counts, got {} (dst) and {} (src)",
        dst.numel(),
        src.numel()
    );
    let bytes = src.read_bytes();
    dst.write_bytes(&bytes);
    Ok(())
}
