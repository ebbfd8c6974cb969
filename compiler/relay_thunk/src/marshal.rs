//! Recovering logical arguments from a thunk's native parameters.
//!
//! Both conventions produce the same [`PreparedArguments`] record, so the
//! later stages never look at how the values arrived. The argument stream
//! holds each declared parameter in order (its canonical components, or
//! one address word for address-only parameters) followed by the generic
//! binding words.

use std::sync::Arc;

use smallvec::SmallVec;

use relay_abi::{AsyncContextLayout, FrameValue, ValuePassing, WORD_SIZE};
use relay_ir::{ScalarKind, VarId};

use crate::emit::FunctionContext;
use crate::explosion::Explosion;
use crate::internal_error;

/// Self metadata and witness table of a protocol-dispatched call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct WitnessMetadata {
    pub metadata: VarId,
    pub table: VarId,
}

/// Convention-agnostic view of a thunk's incoming arguments.
#[derive(Debug)]
pub(crate) struct PreparedArguments {
    pub receiver: VarId,
    pub witness: Option<WitnessMetadata>,
    pub indirect_return: Option<VarId>,
    pub error_slot: Option<VarId>,
    pub resume_buffer: Option<VarId>,
    pub arguments: Explosion,
}

/// Marshal the flat native parameters of an ordinary or coroutine thunk.
pub(crate) fn prepare_flat_arguments(
    cx: &mut FunctionContext<'_>,
    mut params: Explosion,
) -> PreparedArguments {
    let lowered = Arc::clone(&cx.lowered);

    // Trailing parameters come off the back, last first.
    let witness = lowered.witness.then(|| {
        let table = params.take_last();
        let metadata = params.take_last();
        WitnessMetadata { metadata, table }
    });
    let error_slot = lowered.throws.then(|| params.take_last());
    if let Some(slot) = error_slot {
        cx.install_error_destination(slot);
    }

    let resume_buffer = lowered
        .convention
        .is_coroutine()
        .then(|| params.claim_next());
    let receiver = params.take_last();
    let indirect_return = lowered.has_indirect_return().then(|| params.claim_next());

    let mut arguments = Explosion::new();
    for (index, passing) in lowered.param_passing.iter().enumerate() {
        match passing {
            ValuePassing::Direct(schema) => {
                let native = params.claim(schema.native_kinds().len());
                let canonical = cx.builder.emit_map_from_native(
                    lowered.param_types[index],
                    schema.canonical(),
                    &native,
                );
                tracing::trace!(index, words = native.len(), "parameter from native words");
                arguments.add_all(canonical);
            }
            ValuePassing::Indirect(schema) => {
                let address = params.claim_next();
                let canonical = cx.builder.emit_load_take(schema.canonical(), address);
                tracing::trace!(index, components = canonical.len(), "parameter taken from memory");
                arguments.add_all(canonical);
            }
            ValuePassing::Address => {
                tracing::trace!(index, "address-only parameter passed through");
                params.transfer_into(&mut arguments, 1);
            }
        }
    }

    let bindings = params.size();
    if bindings != lowered.binding_count as usize {
        internal_error(format_args!(
            "{bindings} values left for {} generic bindings",
            lowered.binding_count
        ));
    }
    params.transfer_into(&mut arguments, bindings);

    PreparedArguments {
        receiver,
        witness,
        indirect_return,
        error_slot,
        resume_buffer,
        arguments,
    }
}

/// Marshal the fields of an async thunk's context frame.
pub(crate) fn prepare_async_arguments(
    cx: &mut FunctionContext<'_>,
    context: VarId,
    layout: &AsyncContextLayout,
) -> PreparedArguments {
    let lowered = Arc::clone(&cx.lowered);
    let b = &mut cx.builder;

    let receiver = b.emit_load(ScalarKind::Ptr, context, layout.local_context);
    let witness = match (layout.self_metadata, layout.self_witness_table) {
        (Some(metadata), Some(table)) => Some(WitnessMetadata {
            metadata: b.emit_load(ScalarKind::Ptr, context, metadata),
            table: b.emit_load(ScalarKind::Ptr, context, table),
        }),
        (None, None) => None,
        _ => internal_error("context frame has half of the witness metadata"),
    };
    if witness.is_some() != lowered.witness {
        internal_error("context frame witness fields disagree with the signature");
    }
    let error_slot = layout
        .error_slot
        .map(|offset| b.emit_load(ScalarKind::Ptr, context, offset));
    let indirect_return = layout
        .indirect_return
        .map(|offset| b.emit_load(ScalarKind::Ptr, context, offset));

    if layout.args.len() != lowered.param_passing.len() {
        internal_error("context frame argument count disagrees with the signature");
    }
    let mut arguments = Explosion::new();
    for (index, (field, passing)) in layout.args.iter().zip(&lowered.param_passing).enumerate() {
        match (field, passing) {
            (FrameValue::Inline { offset, components }, ValuePassing::Direct(_)) => {
                let loaded: SmallVec<[VarId; 4]> = components
                    .iter()
                    .enumerate()
                    .map(|(i, &kind)| {
                        #[expect(clippy::cast_possible_truncation, reason = "component count is tiny")]
                        let at = offset + WORD_SIZE * i as u32;
                        b.emit_load(kind, context, at)
                    })
                    .collect();
                tracing::trace!(index, components = loaded.len(), "parameter loaded from frame");
                arguments.add_all(loaded);
            }
            (FrameValue::Address { offset }, ValuePassing::Indirect(schema)) => {
                let address = b.emit_load(ScalarKind::Ptr, context, *offset);
                let canonical = b.emit_load_take(schema.canonical(), address);
                tracing::trace!(index, "parameter taken through frame address");
                arguments.add_all(canonical);
            }
            (FrameValue::Address { offset }, ValuePassing::Address) => {
                arguments.add(b.emit_load(ScalarKind::Ptr, context, *offset));
            }
            _ => internal_error(format_args!(
                "frame field of parameter {index} disagrees with its passing"
            )),
        }
    }
    for i in 0..layout.binding_count {
        arguments.add(b.emit_load(ScalarKind::Ptr, context, layout.bindings + WORD_SIZE * i));
    }

    if let Some(slot) = error_slot {
        cx.install_error_destination(slot);
    }

    PreparedArguments {
        receiver,
        witness,
        indirect_return,
        error_slot,
        resume_buffer: None,
        arguments,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
