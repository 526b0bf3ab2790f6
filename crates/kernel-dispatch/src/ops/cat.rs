use crate::dispatch::Dispatcher;
use crate::error::DispatchResult;
use crate::kernels::{Cat, CatArgs};
use crate::tensor::{RawTensor, Tensor};

impl Dispatcher {
    /// Concatenates `tensors` along `dim`. The dispatch key comes from the first tensor and
    /// every other tensor must match it.
    pub fn cat(&self, tensors: &[Tensor], dim: i64) -> DispatchResult<Tensor> {
        let site = self.resolve_list("cat", tensors, "tensors", 1)?;
        let kernel = self.lookup::<Cat>(&site)?;
        let inputs = tensors
            .iter()
            .map(|tensor| site.require(tensor, "tensors", 1))
            .collect::<DispatchResult<Vec<RawTensor<'_>>>>()?;

        let result = self.materialize(&site, true)?;
        let args = CatArgs {
            result: site.require(&result, "result", 0)?,
            inputs: &inputs,
            dim,
        };
        self.invoke(&site, "cat", |ctx| kernel(ctx, args))?;
        Ok(result)
    }

    /// [`Dispatcher::cat`] writing into the caller-supplied `result`.
    pub fn cat_out(&self, result: &Tensor, tensors: &[Tensor], dim: i64) -> DispatchResult<Tensor> {
        let site = self.resolve_list("cat_out", tensors, "tensors", 2)?;
        let kernel = self.lookup::<Cat>(&site)?;
        let result_raw = site.require(result, "result", 0)?;
        let inputs = tensors
            .iter()
            .map(|tensor| site.require(tensor, "tensors", 2))
            .collect::<DispatchResult<Vec<RawTensor<'_>>>>()?;
        let args = CatArgs {
            result: result_raw,
            inputs: &inputs,
            dim,
        };
        self.invoke(&site, "cat", |ctx| kernel(ctx, args))?;
        Ok(result.clone())
    }
}
