//! Method references and their calling-convention-level signatures.

use std::sync::Arc;

use crate::generics::{GenericSignature, SubstitutionMap};
use crate::types::{TypeId, TypePool};
use crate::Name;

/// How a function receives its arguments and hands back control.
///
/// Fixed when a method reference is resolved. Asynchronous coroutines do
/// not exist, so the two non-ordinary conventions are exclusive by
/// construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallingConventionKind {
    /// Arguments in registers, results returned directly.
    Ordinary,
    /// Arguments and results live in a heap-allocated context frame.
    Asynchronous,
    /// Yield-once coroutine: a leading resume buffer, a continuation result.
    YieldingCoroutine,
}

impl CallingConventionKind {
    /// Build the tag from the two independent flags a front end reports.
    ///
    /// # Panics
    ///
    /// Panics if both flags are set; an async coroutine means an earlier
    /// pipeline stage produced an impossible function type.
    pub fn from_flags(is_async: bool, is_coroutine: bool) -> Self {
        match (is_async, is_coroutine) {
            (false, false) => CallingConventionKind::Ordinary,
            (true, false) => CallingConventionKind::Asynchronous,
            (false, true) => CallingConventionKind::YieldingCoroutine,
            (true, true) => {
                panic!("internal error: a function type cannot be both async and a coroutine")
            }
        }
    }

    pub const fn is_async(self) -> bool {
        matches!(self, CallingConventionKind::Asynchronous)
    }

    pub const fn is_coroutine(self) -> bool {
        matches!(self, CallingConventionKind::YieldingCoroutine)
    }
}

/// Where a method is declared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeclContext {
    Class(Name),
    Protocol(Name),
}

impl DeclContext {
    pub const fn name(self) -> Name {
        match self {
            DeclContext::Class(n) | DeclContext::Protocol(n) => n,
        }
    }

    pub const fn is_protocol(self) -> bool {
        matches!(self, DeclContext::Protocol(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MethodKind {
    Instance,
    /// Receives the class metatype instead of an instance.
    Static,
}

/// Linkage visibility of a method's symbols.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Visibility {
    Public,
    Internal,
    Private,
}

impl Visibility {
    pub const fn is_public(self) -> bool {
        matches!(self, Visibility::Public)
    }
}

/// Calling-convention-level function type of a method.
///
/// `params` excludes the receiver, which is always the last logical
/// parameter and is described by `self_ty`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    pub convention: CallingConventionKind,
    pub generics: GenericSignature,
    pub self_ty: TypeId,
    pub params: Vec<TypeId>,
    pub result: TypeId,
    /// Error type of a throwing method.
    pub error: Option<TypeId>,
}

impl FunctionSignature {
    pub fn has_error_result(&self) -> bool {
        self.error.is_some()
    }

    /// Apply `map` to every type in the signature.
    ///
    /// Arity and argument order are preserved; only the types change.
    pub fn substituted(&self, map: &SubstitutionMap, pool: &TypePool) -> FunctionSignature {
        FunctionSignature {
            convention: self.convention,
            generics: self.generics,
            self_ty: map.apply(self.self_ty, pool),
            params: self.params.iter().map(|&p| map.apply(p, pool)).collect(),
            result: map.apply(self.result, pool),
            error: self.error.map(|e| map.apply(e, pool)),
        }
    }
}

/// Immutable identifier of a declared method.
///
/// Two references are the same method exactly when every field matches;
/// overloads differ by signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodReference {
    pub module: Name,
    pub owner: DeclContext,
    pub selector: Name,
    pub kind: MethodKind,
    pub signature: Arc<FunctionSignature>,
}

impl MethodReference {
    pub fn new(
        module: Name,
        owner: DeclContext,
        selector: Name,
        kind: MethodKind,
        signature: FunctionSignature,
    ) -> Self {
        Self {
            module,
            owner,
            selector,
            kind,
            signature: Arc::new(signature),
        }
    }

    /// Whether calls dispatch through a protocol witness table.
    pub fn is_witness_method(&self) -> bool {
        self.owner.is_protocol()
    }

    pub fn convention(&self) -> CallingConventionKind {
        self.signature.convention
    }
}
