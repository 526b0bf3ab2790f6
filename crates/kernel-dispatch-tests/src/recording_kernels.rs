use std::sync::{Arc, Mutex};

use anyhow::bail;
use kernel_dispatch::kernels::{
    Cat, Conv2dAccGradParameters, Conv2dForward, Conv2dGradInput, CopyIgnoringOverlaps, Gels,
};
use kernel_dispatch::{
    DeviceKind, DispatchResult, ElementKind, ExecutionContext, KernelTable, OpId, StreamId,
};

/// One kernel call observed by a [`KernelRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub op: OpId,
    pub kind: ElementKind,
    pub stream: StreamId,
    /// Output slots the kernel was handed as write targets.
    pub targets: Vec<&'static str>,
}

/// Test-only kernel provider that records every call instead of computing.
///
/// Recording kernels never resize or write their outputs, so a materialized output stays a
/// zero-element tensor after dispatch.
#[derive(Default)]
pub struct KernelRecorder {
    calls: Mutex<Vec<Invocation>>,
    fail_on: Option<OpId>,
}

impl KernelRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A recorder whose kernel for `op` reports an error after recording the call.
    pub fn failing(op: OpId) -> Arc<Self> {
        Arc::new(KernelRecorder {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(op),
        })
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().expect("recorder mutex poisoned").clone()
    }

    /// Operations invoked so far, in call order.
    pub fn ops(&self) -> Vec<OpId> {
        self.invocations().into_iter().map(|call| call.op).collect()
    }

    pub fn count(&self, op: OpId) -> usize {
        self.invocations()
            .iter()
            .filter(|call| call.op == op)
            .count()
    }

    fn record(
        &self,
        op: OpId,
        ctx: &ExecutionContext,
        kind: ElementKind,
        targets: Vec<&'static str>,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("recorder mutex poisoned")
            .push(Invocation {
                op,
                kind,
                stream: ctx.stream,
                targets,
            });
        if self.fail_on == Some(op) {
            bail!("recording kernel for {op} configured to fail");
        }
        Ok(())
    }

    /// A CPU table whose kernels for every operation and each of `kinds` record into `self`.
    pub fn table(self: &Arc<Self>, kinds: &[ElementKind]) -> DispatchResult<KernelTable> {
        let mut table = KernelTable::new(DeviceKind::Cpu);
        self.register(&mut table, kinds)?;
        Ok(table)
    }

    pub fn register(
        self: &Arc<Self>,
        table: &mut KernelTable,
        kinds: &[ElementKind],
    ) -> DispatchResult<()> {
        let rec = Arc::clone(self);
        table.register_kinds::<Gels>(
            kinds,
            Gels::kernel(move |ctx, args| {
                rec.record(OpId::Gels, ctx, args.b.kind(), vec!["res1", "res2"])
            }),
        )?;

        let rec = Arc::clone(self);
        table.register_kinds::<CopyIgnoringOverlaps>(
            kinds,
            CopyIgnoringOverlaps::kernel(move |ctx, args| {
                rec.record(OpId::CopyIgnoringOverlaps, ctx, args.dst.kind(), vec!["self"])
            }),
        )?;

        let rec = Arc::clone(self);
        table.register_kinds::<Conv2dForward>(
            kinds,
            Conv2dForward::kernel(move |ctx, args| {
                rec.record(
                    OpId::Conv2dForward,
                    ctx,
                    args.input.kind(),
                    vec!["output", "columns", "ones"],
                )
            }),
        )?;

        let rec = Arc::clone(self);
        table.register_kinds::<Conv2dGradInput>(
            kinds,
            Conv2dGradInput::kernel(move |ctx, args| {
                rec.record(
                    OpId::Conv2dGradInput,
                    ctx,
                    args.grad_output.kind(),
                    vec!["grad_input"],
                )
            }),
        )?;

        let rec = Arc::clone(self);
        table.register_kinds::<Conv2dAccGradParameters>(
            kinds,
            Conv2dAccGradParameters::kernel(move |ctx, args| {
                let mut targets = Vec::new();
                if args.grad_weight.is_some() {
                    targets.push("grad_weight");
                }
                if args.grad_bias.is_some() {
                    targets.push("grad_bias");
                }
                rec.record(
                    OpId::Conv2dAccGradParameters,
                    ctx,
                    args.grad_output.kind(),
                    targets,
                )
            }),
        )?;

        let rec = Arc::clone(self);
        table.register_kinds::<Cat>(
            kinds,
            Cat::kernel(move |ctx, args| {
                rec.record(OpId::Cat, ctx, args.result.kind(), vec!["result"])
            }),
        )?;
        Ok(())
    }
}
