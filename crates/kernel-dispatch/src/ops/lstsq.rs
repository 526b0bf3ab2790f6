use log::trace;

use crate::deprecation::GELS_DEPRECATION;
use crate::dispatch::Dispatcher;
use crate::error::DispatchResult;
use crate::kernels::{Gels, GelsArgs};
use crate::tensor::Tensor;

impl Dispatcher {
    /// Solves the least-squares problem `a * x = b`, returning `(solution, factorization)`.
    ///
    /// Deprecated in favor of a least-squares solve taking `(a, b)`; the first call per
    /// process logs a notice.
    pub fn gels(&self, b: &Tensor, a: &Tensor) -> DispatchResult<(Tensor, Tensor)> {
        GELS_DEPRECATION.emit(self.config());
        let site = self.resolve("gels", b, "self", 1)?;
        let kernel = self.lookup::<Gels>(&site)?;
        let b_raw = site.require(b, "self", 1)?;
        let a_raw = site.require(a, "A", 2)?;

        let res1 = self.materialize(&site, true)?;
        let res2 = self.materialize(&site, true)?;
        let args = GelsArgs {
            res1: site.require(&res1, "res1", 0)?,
            res2: site.require(&res2, "res2", 0)?,
            b: b_raw,
            a: a_raw,
        };
        self.invoke(&site, "gels", |ctx| kernel(ctx, args))?;
        Ok((res1, res2))
    }

    /// [`Dispatcher::gels`] writing into caller-supplied `res1` and `res2`.
    pub fn gels_out(
        &self,
        res1: &Tensor,
        res2: &Tensor,
        b: &Tensor,
        a: &Tensor,
    ) -> DispatchResult<(Tensor, Tensor)> {
        GELS_DEPRECATION.emit(self.config());
        let site = self.resolve("gels_out", b, "self", 2)?;
        let kernel = self.lookup::<Gels>(&site)?;
        let args = GelsArgs {
            res1: site.require(res1, "res1", 0)?,
            res2: site.require(res2, "res2", 1)?,
            b: site.require(b, "self", 2)?,
            a: site.require(a, "A", 3)?,
        };
        trace!("gels_out: writing into caller outputs");
        self.invoke(&site, "gels", |ctx| kernel(ctx, args))?;
        Ok((res1.clone(), res2.clone()))
    }
}
