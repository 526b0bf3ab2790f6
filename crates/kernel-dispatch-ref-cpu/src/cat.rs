use anyhow::{bail, ensure};
use kernel_dispatch::kernels::CatArgs;
use kernel_dispatch::tensor::Dims;
use kernel_dispatch::ExecutionContext;

use crate::ensure_host;

fn normalize_dim(dim: i64, rank: usize) -> anyhow::Result<usize> {
    let wrapped = if dim < 0 { dim + rank as i64 } else { dim };
    if wrapped < 0 || wrapped >= rank as i64 {
        bail!("cat dimension {dim} out of range for rank {rank}");
    }
    Ok(wrapped as usize)
}

/// Concatenation along `dim`. One-dimensional empty inputs are skipped, so they can seed an
/// accumulation of differently shaped tensors.
pub(crate) fn cat(ctx: &ExecutionContext, args: CatArgs<'_>) -> anyhow::Result<()> {
    ensure_host(ctx)?;
    let parts: Vec<_> = args
        .inputs
        .iter()
        .filter(|tensor| !(tensor.dim() == 1 && tensor.numel() == 0))
        .collect();
    let Some(first) = parts.first() else {
        args.result.resize(&[0]);
        return Ok(());
    };

    let mut out_shape: Dims = first.shape();
    let rank = out_shape.len();
    ensure!(rank > 0, "cat expects tensors with at least one dimension");
    let axis = normalize_dim(args.dim, rank)?;

    let mut axis_total = 0usize;
    let mut chunks = Vec::with_capacity(parts.len());
    for (index, tensor) in parts.iter().enumerate() {
        let shape = tensor.shape();
        ensure!(
            shape.len() == rank,
            "cat expects tensors of rank {rank}, tensor {index} has rank {}",
            shape.len()
        );
        for (d, (&extent, &expected)) in shape.iter().zip(out_shape.iter()).enumerate() {
            ensure!(
                d == axis || extent == expected,
                "cat size mismatch in dimension {d}: expected {expected}, tensor {index} has {extent}"
            );
        }
        axis_total += shape[axis];
        chunks.push((shape[axis], tensor.read_bytes()));
    }
    out_shape[axis] = axis_total;

    let width = args.result.kind().size_in_bytes();
    let inner: usize = out_shape.iter().skip(axis + 1).product();
    let outer: usize = out_shape.iter().take(axis).product();
    let mut out = Vec::with_capacity(out_shape.iter().product::<usize>() * width);
    for outer_idx in 0..outer {
        for (extent, bytes) in &chunks {
            let chunk = extent * inner * width;
            let start = outer_idx * chunk;
            out.extend_from_slice(&bytes[start..start + chunk]);
        }
    }

    args.result.resize(&out_shape);
    args.result.write_bytes(&out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::normalize_dim;

    #[test]
    fn negative_dims_wrap() {
        assert_eq!(normalize_dim(-1, 3).unwrap(), 2);
        assert_eq!(normalize_dim(0, 3).unwrap(), 0);
        assert!(normalize_dim(3, 3).is_err());
        assert!(normalize_dim(-4, 3).is_err());
    }
}
