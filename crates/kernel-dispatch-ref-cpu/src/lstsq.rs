//! Householder-QR least squares.

use anyhow::{bail, ensure};
use kernel_dispatch::kernels::GelsArgs;
use kernel_dispatch::tensor::TensorImpl;
use kernel_dispatch::ExecutionContext;

use crate::element::{read_f64, write_f64, CpuFloat};
use crate::ensure_host;

/// Row-major `rows x cols` matrix view of a 1-D or 2-D tensor; vectors become one column.
fn matrix_dims(tensor: &TensorImpl, name: &str) -> anyhow::Result<(usize, usize)> {
    let shape = tensor.shape();
    match shape.as_slice() {
        &[rows] => Ok((rows, 1)),
        &[rows, cols] => Ok((rows, cols)),
        other => bail!("gels expects {name} to be 1-D or 2-D, got shape {other:?}"),
    }
}

/// Factors `a` (`m x n`, `m >= n`) in place and applies the same reflections to `b`
/// (`m x k`).
///
/// On return the upper triangle of `a` holds `R` and the entries below the diagonal hold the
/// essential parts of the Householder vectors (each vector's leading 1 is implicit).
fn householder_qr(a: &mut [f64], m: usize, n: usize, b: &mut [f64], k: usize) {
    for j in 0..n {
        let norm = (j..m).map(|i| a[i * n + j].powi(2)).sum::<f64>().sqrt();
        if norm == 0.0 {
            continue;
        }
        let x0 = a[j * n + j];
        let beta = if x0 >= 0.0 { -norm } else { norm };
        let tau = (beta - x0) / beta;
        let pivot = x0 - beta;
        for i in j + 1..m {
            a[i * n + j] /= pivot;
        }
        a[j * n + j] = beta;

        // Apply H = I - tau * v * v^T, v = [1, a[j+1.., j]], to the trailing columns of a.
        for col in j + 1..n {
            let dot = a[j * n + col] + (j + 1..m).map(|i| a[i * n + j] * a[i * n + col]).sum::<f64>();
            let scaled = tau * dot;
            a[j * n + col] -= scaled;
            for i in j + 1..m {
                a[i * n + col] -= scaled * a[i * n + j];
            }
        }
        for col in 0..k {
            let dot = b[j * k + col] + (j + 1..m).map(|i| a[i * n + j] * b[i * k + col]).sum::<f64>();
            let scaled = tau * dot;
            b[j * k + col] -= scaled;
            for i in j + 1..m {
                b[i * k + col] -= scaled * a[i * n + j];
            }
        }
    }
}

/// Solves `R x = c` in place over the first `n` rows of `b`.
fn back_substitute(r: &[f64], n: usize, b: &mut [f64], k: usize) -> anyhow::Result<()> {
    for i in (0..n).rev() {
        let diag = r[i * n + i];
        if diag == 0.0 {
            bail!(
                "gels: diagonal element {} of the triangular factor is zero, so the matrix does \
                 not have full rank",
                i + 1
            );
        }
        for col in 0..k {
            let tail: f64 = (i + 1..n).map(|l| r[i * n + l] * b[l * k + col]).sum();
            b[i * k + col] = (b[i * k + col] - tail) / diag;
        }
    }
    Ok(())
}

/// Writes the solution into the leading `n` rows of `res1` (`m x k`, the remaining rows hold
/// the transformed residual) and the QR factorization of `a` into `res2` (`m x n`).
pub(crate) fn gels<T: CpuFloat>(ctx: &ExecutionContext, args: GelsArgs<'_>) -> anyhow::Result<()> {
    ensure_host(ctx)?;
    let (m, n) = matrix_dims(&args.a, "A")?;
    let (b_rows, k) = matrix_dims(&args.b, "B")?;
    ensure!(
        b_rows == m,
        "gels: A has {m} rows but B has {b_rows}; the row counts must match"
    );
    if m < n {
        bail!("gels: only overdetermined or square systems (m >= n) are supported, got {m}x{n}");
    }

    let mut a = read_f64::<T>(&args.a)?;
    let mut b = read_f64::<T>(&args.b)?;
    householder_qr(&mut a, m, n, &mut b, k);
    back_substitute(&a, n, &mut b, k)?;

    args.res1.resize(&[m, k]);
    write_f64::<T>(&args.res1, &b)?;
    args.res2.resize(&[m, n]);
    write_f64::<T>(&args.res2, &a)?;
    Ok(())
}
