//! Lowering a method signature to its flat native parameter list.
//!
//! # Native parameter order
//!
//! Ordinary and yield-once coroutine functions take:
//!
//! ```text
//! [resume buffer] [indirect return] params.. bindings.. self [error slot] [self metadata, witness table]
//! ```
//!
//! The bracketed entries are present only for coroutines, results passed
//! by address, throwing methods and protocol-dispatched methods
//! respectively. Async functions take a single context frame address and
//! return nothing natively; see [`AsyncContextLayout`].

use std::sync::Arc;

use relay_ir::{CallingConventionKind, MethodReference, ScalarKind, TypeId};

use crate::async_layout::AsyncContextLayout;
use crate::layout::{LayoutService, ValuePassing};
use crate::{internal_error, AbiError};

/// What a native parameter carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgRole {
    ResumeBuffer,
    IndirectReturn,
    /// Native word `word` of direct parameter `index`.
    Param { index: u32, word: u32 },
    /// Address of the canonical explosion of loadable parameter `index`.
    ParamIndirect { index: u32 },
    /// Address of address-only parameter `index`.
    ParamAddress { index: u32 },
    GenericBinding { index: u32 },
    SelfValue,
    ErrorSlot,
    SelfMetadata,
    SelfWitnessTable,
    /// Async context frame.
    Context,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeParam {
    pub role: ArgRole,
    pub kind: ScalarKind,
}

/// A method signature as the native calling convention sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoweredSignature {
    pub convention: CallingConventionKind,
    /// Protocol-dispatched: self metadata and witness table trail the
    /// parameters.
    pub witness: bool,
    pub throws: bool,
    pub params: Vec<NativeParam>,
    /// Native result words.
    pub results: Vec<ScalarKind>,
    /// Passing of each declared parameter.
    pub param_passing: Vec<ValuePassing>,
    pub param_types: Vec<TypeId>,
    pub result_type: TypeId,
    pub result_passing: ValuePassing,
    pub binding_count: u32,
    pub async_layout: Option<Arc<AsyncContextLayout>>,
}

impl LoweredSignature {
    pub fn has_indirect_return(&self) -> bool {
        self.result_passing.is_by_address()
    }

    pub fn param_kinds(&self) -> Vec<ScalarKind> {
        self.params.iter().map(|p| p.kind).collect()
    }

    /// Position of the first native parameter with `role`.
    pub fn position(&self, role: ArgRole) -> Option<usize> {
        self.params.iter().position(|p| p.role == role)
    }

    /// Context frame layout of an async signature.
    ///
    /// # Panics
    ///
    /// Panics if the signature is not async.
    pub fn context_layout(&self) -> &Arc<AsyncContextLayout> {
        self.async_layout.as_ref().unwrap_or_else(|| {
            internal_error(format_args!(
                "{:?} signature has no context frame",
                self.convention
            ))
        })
    }
}

/// Lower `method` for its own calling convention.
pub fn lower_signature(
    method: &MethodReference,
    layout: &dyn LayoutService,
) -> Result<LoweredSignature, AbiError> {
    let sig = &method.signature;
    let convention = sig.convention;
    let witness = method.is_witness_method();

    let param_passing = sig
        .params
        .iter()
        .map(|&p| layout.passing(p))
        .collect::<Result<Vec<_>, AbiError>>()?;
    let result_passing = layout.passing(sig.result)?;
    let binding_count = sig.generics.binding_count();

    let mut params = Vec::new();
    let mut results = Vec::new();
    let mut async_layout = None;

    if convention.is_async() {
        params.push(NativeParam {
            role: ArgRole::Context,
            kind: ScalarKind::Ptr,
        });
        async_layout = Some(layout.async_context_layout(method)?);
    } else {
        let ptr = |role| NativeParam {
            role,
            kind: ScalarKind::Ptr,
        };
        if convention.is_coroutine() {
            params.push(ptr(ArgRole::ResumeBuffer));
            results.push(ScalarKind::Ptr);
        }
        match &result_passing {
            ValuePassing::Direct(schema) => results.extend(schema.native_kinds()),
            ValuePassing::Indirect(_) | ValuePassing::Address => {
                params.push(ptr(ArgRole::IndirectReturn));
            }
        }
        for (i, passing) in param_passing.iter().enumerate() {
            #[expect(clippy::cast_possible_truncation, reason = "parameter count is tiny")]
            let index = i as u32;
            match passing {
                ValuePassing::Direct(schema) => {
                    for (word, kind) in schema.native_kinds().into_iter().enumerate() {
                        #[expect(clippy::cast_possible_truncation, reason = "word count is tiny")]
                        let word = word as u32;
                        params.push(NativeParam {
                            role: ArgRole::Param { index, word },
                            kind,
                        });
                    }
                }
                ValuePassing::Indirect(_) => params.push(ptr(ArgRole::ParamIndirect { index })),
                ValuePassing::Address => params.push(ptr(ArgRole::ParamAddress { index })),
            }
        }
        for index in 0..binding_count {
            params.push(ptr(ArgRole::GenericBinding { index }));
        }
        params.push(ptr(ArgRole::SelfValue));
        if sig.has_error_result() {
            params.push(ptr(ArgRole::ErrorSlot));
        }
        if witness {
            params.push(ptr(ArgRole::SelfMetadata));
            params.push(ptr(ArgRole::SelfWitnessTable));
        }
    }

    Ok(LoweredSignature {
        convention,
        witness,
        throws: sig.has_error_result(),
        params,
        results,
        param_passing,
        param_types: sig.params.clone(),
        result_type: sig.result,
        result_passing,
        binding_count,
        async_layout,
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
