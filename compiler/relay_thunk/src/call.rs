//! The forwarded call: re-lowering a prepared argument stream for the
//! target's convention and collecting what it returns.

use std::sync::Arc;

use smallvec::SmallVec;

use relay_abi::{
    ArgRole, AsyncContextLayout, FrameValue, LoweredSignature, ValuePassing, WORD_SIZE,
};
use relay_ir::VarId;

use crate::emit::FunctionContext;
use crate::explosion::Explosion;
use crate::internal_error;
use crate::marshal::PreparedArguments;
use crate::target::ResolvedTarget;

/// What a forwarded call produced.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    /// The result was written through the indirect return address.
    Memory,
    /// Canonical result components, empty for unit.
    Explosion(Explosion),
    /// A coroutine's raw native results: continuation, then yielded words.
    Coroutine(Vec<VarId>),
}

impl CallOutcome {
    pub fn describe(&self) -> &'static str {
        match self {
            CallOutcome::Memory => "memory",
            CallOutcome::Explosion(e) if e.is_empty() => "void",
            CallOutcome::Explosion(_) => "direct",
            CallOutcome::Coroutine(_) => "coroutine",
        }
    }
}

/// Per-parameter values of a prepared stream, plus the binding words.
struct SplitArguments {
    params: Vec<SmallVec<[VarId; 4]>>,
    bindings: SmallVec<[VarId; 4]>,
}

fn split_arguments(signature: &LoweredSignature, mut stream: Explosion) -> SplitArguments {
    let params = signature
        .param_passing
        .iter()
        .map(|passing| match passing {
            ValuePassing::Direct(schema) | ValuePassing::Indirect(schema) => {
                stream.claim(schema.canonical().len())
            }
            ValuePassing::Address => stream.claim(1),
        })
        .collect();
    let bindings = stream.claim_all();
    if bindings.len() != signature.binding_count as usize {
        internal_error(format_args!(
            "{} binding words forwarded for {} generic bindings",
            bindings.len(),
            signature.binding_count
        ));
    }
    SplitArguments { params, bindings }
}

/// Store `values` as consecutive words at `addr + offset`.
fn store_words(cx: &mut FunctionContext<'_>, values: &[VarId], addr: VarId, offset: u32) {
    for (i, &value) in values.iter().enumerate() {
        #[expect(clippy::cast_possible_truncation, reason = "component count is tiny")]
        let at = offset + WORD_SIZE * i as u32;
        cx.builder.emit_store(value, addr, at);
    }
}

/// Copy a loadable value into a fresh temporary, returning its address.
fn spill(cx: &mut FunctionContext<'_>, values: &[VarId]) -> VarId {
    #[expect(clippy::cast_possible_truncation, reason = "component count is tiny")]
    let bytes = WORD_SIZE * values.len() as u32;
    let temp = cx.builder.emit_stack_alloc(bytes);
    store_words(cx, values, temp, 0);
    temp
}

/// Emit the call of `target` with `arguments`, in the thunk's own
/// convention.
pub(crate) fn emit_forwarded_call(
    cx: &mut FunctionContext<'_>,
    target: &ResolvedTarget,
    arguments: PreparedArguments,
) -> CallOutcome {
    let signature = Arc::clone(&cx.substituted);
    match &signature.async_layout {
        Some(layout) => emit_async_call(cx, &signature, layout, target, arguments),
        None => emit_flat_call(cx, &signature, target, arguments),
    }
}

fn emit_flat_call(
    cx: &mut FunctionContext<'_>,
    signature: &LoweredSignature,
    target: &ResolvedTarget,
    arguments: PreparedArguments,
) -> CallOutcome {
    let PreparedArguments {
        witness,
        indirect_return,
        resume_buffer,
        arguments: stream,
        ..
    } = arguments;
    let split = split_arguments(signature, stream);
    let mut native_params: Vec<Option<SmallVec<[VarId; 4]>>> = vec![None; split.params.len()];

    let mut args = Vec::with_capacity(signature.params.len());
    for param in &signature.params {
        let value = match param.role {
            ArgRole::ResumeBuffer => resume_buffer
                .unwrap_or_else(|| internal_error("coroutine call without a resume buffer")),
            ArgRole::IndirectReturn => indirect_return
                .unwrap_or_else(|| internal_error("indirect result without a destination")),
            ArgRole::Param { index, word } => {
                let index = index as usize;
                if native_params[index].is_none() {
                    let ValuePassing::Direct(schema) = &signature.param_passing[index] else {
                        internal_error("native words for a parameter passed by address")
                    };
                    native_params[index] = Some(cx.builder.emit_map_to_native(
                        signature.param_types[index],
                        &schema.native_kinds(),
                        &split.params[index],
                    ));
                }
                match &native_params[index] {
                    Some(words) => words[word as usize],
                    None => internal_error("parameter words were not mapped"),
                }
            }
            ArgRole::ParamIndirect { index } => {
                tracing::trace!(index, "forwarding parameter through a temporary");
                spill(cx, &split.params[index as usize])
            }
            ArgRole::ParamAddress { index } => split.params[index as usize][0],
            ArgRole::GenericBinding { index } => split.bindings[index as usize],
            ArgRole::SelfValue => target.receiver,
            ArgRole::ErrorSlot => cx
                .error_destination()
                .unwrap_or_else(|| internal_error("throwing call without an error destination")),
            ArgRole::SelfMetadata => witness
                .map(|w| w.metadata)
                .unwrap_or_else(|| internal_error("witness call without self metadata")),
            ArgRole::SelfWitnessTable => witness
                .map(|w| w.table)
                .unwrap_or_else(|| internal_error("witness call without a witness table")),
            ArgRole::Context => internal_error("context parameter in a non-async call"),
        };
        args.push(value);
    }

    let results = cx.builder.emit_call(
        target.function,
        signature.convention,
        args,
        &signature.results,
    );

    if signature.convention.is_coroutine() {
        return CallOutcome::Coroutine(results);
    }
    if signature.has_indirect_return() {
        return CallOutcome::Memory;
    }
    let ValuePassing::Direct(schema) = &signature.result_passing else {
        internal_error("direct results for a result passed by address")
    };
    if schema.canonical().is_empty() {
        return CallOutcome::Explosion(Explosion::new());
    }
    let canonical =
        cx.builder
            .emit_map_from_native(signature.result_type, schema.canonical(), &results);
    CallOutcome::Explosion(canonical.into_iter().collect())
}

fn emit_async_call(
    cx: &mut FunctionContext<'_>,
    signature: &LoweredSignature,
    layout: &AsyncContextLayout,
    target: &ResolvedTarget,
    arguments: PreparedArguments,
) -> CallOutcome {
    let PreparedArguments {
        witness,
        indirect_return,
        arguments: stream,
        ..
    } = arguments;
    let split = split_arguments(signature, stream);
    let frame = cx.builder.emit_stack_alloc(layout.size);

    // Fields go in the order the callee reads them.
    cx.builder
        .emit_store(target.receiver, frame, layout.local_context);
    if let (Some(metadata), Some(table)) = (layout.self_metadata, layout.self_witness_table) {
        let Some(w) = witness else {
            internal_error("witness call without witness metadata")
        };
        cx.builder.emit_store(w.metadata, frame, metadata);
        cx.builder.emit_store(w.table, frame, table);
    }
    if let Some(offset) = layout.error_slot {
        let slot = cx
            .error_destination()
            .unwrap_or_else(|| internal_error("throwing call without an error destination"));
        cx.builder.emit_store(slot, frame, offset);
    }
    if let Some(offset) = layout.indirect_return {
        let destination = indirect_return
            .unwrap_or_else(|| internal_error("indirect result without a destination"));
        cx.builder.emit_store(destination, frame, offset);
    }
    for (index, field) in layout.args.iter().enumerate() {
        let values = &split.params[index];
        match (field, &signature.param_passing[index]) {
            (FrameValue::Inline { offset, .. }, _) => store_words(cx, values, frame, *offset),
            (FrameValue::Address { offset }, ValuePassing::Indirect(_)) => {
                let temp = spill(cx, values);
                cx.builder.emit_store(temp, frame, *offset);
            }
            (FrameValue::Address { offset }, _) => {
                cx.builder.emit_store(values[0], frame, *offset);
            }
        }
    }
    store_words(cx, &split.bindings, frame, layout.bindings);

    cx.builder
        .emit_call(target.function, signature.convention, vec![frame], &[]);

    if signature.has_indirect_return() {
        return CallOutcome::Memory;
    }
    let results = match &layout.results {
        Some(FrameValue::Inline { offset, components }) => components
            .iter()
            .enumerate()
            .map(|(i, &kind)| {
                #[expect(clippy::cast_possible_truncation, reason = "component count is tiny")]
                let at = offset + WORD_SIZE * i as u32;
                cx.builder.emit_load(kind, frame, at)
            })
            .collect(),
        Some(FrameValue::Address { .. }) => {
            internal_error("async direct result stored by address")
        }
        None => Explosion::new(),
    };
    CallOutcome::Explosion(results)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
