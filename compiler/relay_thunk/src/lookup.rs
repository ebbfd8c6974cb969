//! Method lookup functions: `(metadata, descriptor) -> implementation`.
//!
//! Callers that cannot compute a class's table offsets at compile time
//! identify a method by the address of its descriptor instead. The lookup
//! function compares that address against every method whose
//! implementation is known statically and falls back to the runtime,
//! which walks the metadata's actual table, for everything else.

use relay_ir::{
    CallingConventionKind, IrBuilder, Name, PointerAuthInfo, RuntimeFunction, ScalarKind,
    ThunkFunction,
};

use crate::module::ThunkModule;
use crate::ServiceResultExt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LookupCandidate {
    pub descriptor: Name,
    pub implementation: Name,
    pub auth: Option<PointerAuthInfo>,
}

/// Ordered fast-path candidates plus the slow-path arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LookupPlan {
    pub candidates: Vec<LookupCandidate>,
    pub type_context_descriptor: Name,
}

impl LookupPlan {
    /// Candidates are `class`'s own public entries, in table order.
    ///
    /// An entry overridden anywhere in this module may be replaced in the
    /// metadata the caller passes, so only the runtime can answer for it.
    pub fn for_class(module: &ThunkModule, class: Name) -> Self {
        let metadata = module.metadata();
        let candidates = metadata
            .class_methods(class)
            .or_internal("listing class methods")
            .into_iter()
            .filter(|entry| entry.visibility.is_public() && !entry.overridden)
            .map(|entry| LookupCandidate {
                descriptor: module.declare_method_descriptor(&entry.method),
                implementation: entry.implementation,
                auth: module.options().pointer_auth.map(|schema| {
                    schema.info(
                        metadata
                            .method_discriminator(&entry.method)
                            .or_internal("computing a method discriminator"),
                    )
                }),
            })
            .collect();
        Self {
            candidates,
            type_context_descriptor: metadata
                .type_context_descriptor(class)
                .or_internal("resolving a type context descriptor"),
        }
    }
}

pub(crate) fn emit_method_lookup_function(
    module: &ThunkModule,
    class: Name,
    symbol: Name,
) -> ThunkFunction {
    let plan = LookupPlan::for_class(module, class);
    tracing::debug!(
        symbol = module.interner().lookup(symbol),
        candidates = plan.candidates.len(),
        "emitting method lookup function"
    );

    let mut b = IrBuilder::new(symbol, CallingConventionKind::Ordinary);
    let metadata = b.add_param(ScalarKind::Ptr);
    let descriptor = b.add_param(ScalarKind::Ptr);

    for candidate in &plan.candidates {
        let hit = b.new_block();
        let miss = b.new_block();
        let expected = b.emit_global_addr(candidate.descriptor);
        let matches = b.emit_compare_eq(descriptor, expected);
        b.terminate_branch(matches, hit, miss);

        b.position_at(hit);
        let implementation = b.emit_global_addr(candidate.implementation);
        let implementation = match candidate.auth {
            Some(auth) => b.emit_sign(implementation, auth),
            None => implementation,
        };
        b.terminate_return(vec![implementation]);

        b.position_at(miss);
    }

    let tcd = b.emit_global_addr(plan.type_context_descriptor);
    let found = b.emit_call_runtime(
        RuntimeFunction::LookupClassMethod,
        vec![metadata, descriptor, tcd],
    );
    b.terminate_return(vec![found]);
    b.finish()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
