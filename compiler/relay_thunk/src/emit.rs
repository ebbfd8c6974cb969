//! The dispatch thunk emission pipeline.
//!
//! Emission runs as a linear sequence of stages, each consuming the
//! previous stage's record:
//!
//! ```text
//! Entered -> ArgumentsPrepared -> TargetResolved -> Invoked -> (return)
//! ```
//!
//! The calling convention is fixed before the first stage and selects the
//! strategy of every later one through [`ConventionPlan`].

use std::sync::Arc;

use relay_abi::{
    lower_signature, AsyncContextLayout, LoweredSignature, ValuePassing, WORD_SIZE,
};
use relay_ir::{
    CallingConventionKind, GenericSignature, IrBuilder, MethodReference, Name, SubstitutionMap,
    ThunkFunction, VarId,
};

use crate::call::{emit_forwarded_call, CallOutcome};
use crate::explosion::Explosion;
use crate::marshal::{prepare_async_arguments, prepare_flat_arguments, PreparedArguments};
use crate::module::ThunkModule;
use crate::target::{CallTarget, ResolvedTarget};
use crate::{internal_error, ServiceResultExt};

/// Generic context a thunk body is emitted under.
///
/// A thunk stays generic over its method's own parameters: the
/// substitutions forward each parameter to itself.
pub(crate) struct GenericEnvironment {
    pub signature: GenericSignature,
    pub substitutions: SubstitutionMap,
}

/// Per-function emission state shared by every stage.
pub(crate) struct FunctionContext<'m> {
    pub module: &'m ThunkModule,
    pub method: &'m MethodReference,
    pub builder: IrBuilder,
    /// Signature the thunk itself is called with.
    pub lowered: Arc<LoweredSignature>,
    /// Signature of the forwarded call, under `generics`.
    pub substituted: Arc<LoweredSignature>,
    pub generics: GenericEnvironment,
    error_destination: Option<VarId>,
}

impl<'m> FunctionContext<'m> {
    fn new(
        module: &'m ThunkModule,
        method: &'m MethodReference,
        symbol: Name,
        lowered: &Arc<LoweredSignature>,
    ) -> Self {
        let types = module.types();
        let signature = method.signature.generics;
        let substitutions = SubstitutionMap::forwarding(signature, types);
        let forwarded = method.signature.substituted(&substitutions, types);
        let substituted = if forwarded == *method.signature {
            Arc::clone(lowered)
        } else {
            let mut target = method.clone();
            target.signature = Arc::new(forwarded);
            Arc::new(
                lower_signature(&target, module.layout())
                    .or_internal("lowering a substituted signature"),
            )
        };
        Self {
            module,
            method,
            builder: IrBuilder::new(symbol, method.convention()),
            lowered: Arc::clone(lowered),
            substituted,
            generics: GenericEnvironment {
                signature,
                substitutions,
            },
            error_destination: None,
        }
    }

    /// Route errors of every call this thunk performs to `slot`.
    pub fn install_error_destination(&mut self, slot: VarId) {
        if self.error_destination.is_some() {
            internal_error("error destination installed twice");
        }
        self.error_destination = Some(slot);
    }

    pub fn error_destination(&self) -> Option<VarId> {
        self.error_destination
    }
}

/// How the thunk receives its arguments and hands back control.
pub(crate) enum ConventionPlan {
    Ordinary,
    Coroutine,
    Async {
        context: VarId,
        layout: Arc<AsyncContextLayout>,
    },
}

struct Entered {
    plan: ConventionPlan,
    params: Explosion,
}

struct ArgumentsPrepared {
    plan: ConventionPlan,
    arguments: PreparedArguments,
}

struct TargetResolved {
    plan: ConventionPlan,
    arguments: PreparedArguments,
    target: ResolvedTarget,
}

struct Invoked {
    plan: ConventionPlan,
    outcome: CallOutcome,
}

/// Emit the body of `method`'s dispatch thunk.
pub(crate) fn emit_dispatch_thunk(
    module: &ThunkModule,
    method: &MethodReference,
    symbol: Name,
    lowered: &Arc<LoweredSignature>,
) -> ThunkFunction {
    let mut cx = FunctionContext::new(module, method, symbol, lowered);
    let entered = enter(&mut cx);
    let prepared = prepare_arguments(&mut cx, entered);
    let resolved = resolve_target(&mut cx, prepared);
    let invoked = invoke(&mut cx, resolved);
    emit_return(&mut cx, invoked);
    cx.builder.finish()
}

fn enter(cx: &mut FunctionContext<'_>) -> Entered {
    let lowered = Arc::clone(&cx.lowered);
    let params: Explosion = lowered
        .params
        .iter()
        .map(|p| cx.builder.add_param(p.kind))
        .collect();

    let plan = match cx.lowered.convention {
        CallingConventionKind::Ordinary => ConventionPlan::Ordinary,
        CallingConventionKind::YieldingCoroutine => ConventionPlan::Coroutine,
        CallingConventionKind::Asynchronous => {
            let layout = Arc::clone(cx.lowered.context_layout());
            let [context] = params.as_slice() else {
                internal_error("async thunk takes more than its context")
            };
            let context = *context;
            cx.builder.emit_async_frame_entry(context, layout.size);
            cx.module
                .define_async_function_pointer(cx.builder.name(), layout.size);
            ConventionPlan::Async { context, layout }
        }
    };

    tracing::debug!(
        symbol = cx.module.interner().lookup(cx.builder.name()),
        convention = ?cx.lowered.convention,
        witness = cx.lowered.witness,
        params = cx.lowered.params.len(),
        generic_params = cx.generics.signature.params,
        forwarded = cx.generics.substitutions.replacements().len(),
        "entered dispatch thunk"
    );
    Entered { plan, params }
}

fn prepare_arguments(cx: &mut FunctionContext<'_>, entered: Entered) -> ArgumentsPrepared {
    let Entered { plan, params } = entered;
    let arguments = match &plan {
        ConventionPlan::Ordinary | ConventionPlan::Coroutine => {
            prepare_flat_arguments(cx, params)
        }
        ConventionPlan::Async { context, layout } => {
            prepare_async_arguments(cx, *context, layout)
        }
    };
    tracing::debug!(
        arguments = arguments.arguments.size(),
        indirect_return = arguments.indirect_return.is_some(),
        error_slot = arguments.error_slot.is_some(),
        "prepared arguments"
    );
    ArgumentsPrepared { plan, arguments }
}

fn resolve_target(cx: &mut FunctionContext<'_>, prepared: ArgumentsPrepared) -> TargetResolved {
    let ArgumentsPrepared { plan, arguments } = prepared;
    let target = CallTarget::for_method(cx.module, cx.method);
    tracing::debug!(target = ?target, "resolving call target");
    let target = target.resolve(cx, &arguments);
    TargetResolved {
        plan,
        arguments,
        target,
    }
}

fn invoke(cx: &mut FunctionContext<'_>, resolved: TargetResolved) -> Invoked {
    let TargetResolved {
        plan,
        arguments,
        target,
    } = resolved;
    let outcome = emit_forwarded_call(cx, &target, arguments);
    tracing::debug!(outcome = outcome.describe(), "invoked target");
    Invoked { plan, outcome }
}

fn emit_return(cx: &mut FunctionContext<'_>, invoked: Invoked) {
    let Invoked { plan, outcome } = invoked;
    match plan {
        ConventionPlan::Coroutine => {
            let CallOutcome::Coroutine(results) = outcome else {
                internal_error("coroutine call produced a non-coroutine outcome")
            };
            cx.builder.terminate_return(results);
        }
        ConventionPlan::Ordinary => {
            let values = match outcome {
                CallOutcome::Memory => Vec::new(),
                CallOutcome::Explosion(mut results) if !results.is_empty() => {
                    let ValuePassing::Direct(schema) = &cx.lowered.result_passing else {
                        internal_error("direct results for a result passed by address")
                    };
                    let canonical = results.claim_all();
                    cx.builder
                        .emit_map_to_native(cx.lowered.result_type, &schema.native_kinds(), &canonical)
                        .into_vec()
                }
                CallOutcome::Explosion(_) => Vec::new(),
                CallOutcome::Coroutine(_) => {
                    internal_error("ordinary call produced a coroutine outcome")
                }
            };
            cx.builder.terminate_return(values);
        }
        ConventionPlan::Async { context, layout } => {
            if let CallOutcome::Explosion(mut results) = outcome {
                if !results.is_empty() {
                    let Some(field) = &layout.results else {
                        internal_error("async results with no result field in the frame")
                    };
                    let base = field.offset();
                    for (i, value) in results.claim_all().into_iter().enumerate() {
                        #[expect(clippy::cast_possible_truncation, reason = "component count is tiny")]
                        let offset = base + WORD_SIZE * i as u32;
                        cx.builder.emit_store(value, context, offset);
                    }
                }
            }
            cx.builder.terminate_async_exit();
        }
    }
    tracing::debug!(
        symbol = cx.module.interner().lookup(cx.builder.name()),
        "emitted return"
    );
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
