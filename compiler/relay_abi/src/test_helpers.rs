//! Shared fixtures for layout, lowering and metadata tests.

use std::sync::Arc;

use relay_ir::{
    CallingConventionKind, DeclContext, FunctionSignature, GenericSignature, MethodKind,
    MethodReference, Name, SharedInterner, StringInterner, TypeId, TypePool,
};

use crate::layout::{LayoutConfig, TargetLayout};

pub(crate) struct Env {
    pub interner: SharedInterner,
    pub types: Arc<TypePool>,
    pub layout: TargetLayout,
}

impl Env {
    pub fn new() -> Self {
        let types = Arc::new(TypePool::new());
        Self {
            interner: StringInterner::shared(),
            layout: TargetLayout::new(Arc::clone(&types), LayoutConfig::default()),
            types,
        }
    }

    pub fn name(&self, s: &str) -> Name {
        self.interner.intern(s)
    }

    /// Ordinary, non-generic, non-throwing signature.
    pub fn sig(&self, self_ty: TypeId, params: Vec<TypeId>, result: TypeId) -> FunctionSignature {
        FunctionSignature {
            convention: CallingConventionKind::Ordinary,
            generics: GenericSignature::EMPTY,
            self_ty,
            params,
            result,
            error: None,
        }
    }

    pub fn class_method(&self, class: &str, selector: &str, sig: FunctionSignature) -> MethodReference {
        MethodReference::new(
            self.name("geo"),
            DeclContext::Class(self.name(class)),
            self.name(selector),
            MethodKind::Instance,
            sig,
        )
    }

    pub fn protocol_method(
        &self,
        protocol: &str,
        selector: &str,
        sig: FunctionSignature,
    ) -> MethodReference {
        MethodReference::new(
            self.name("geo"),
            DeclContext::Protocol(self.name(protocol)),
            self.name(selector),
            MethodKind::Instance,
            sig,
        )
    }

    pub fn object(&self, class: &str) -> TypeId {
        self.types.object(self.name(class))
    }

    pub fn protocol_self(&self, protocol: &str) -> TypeId {
        self.types.protocol_self(self.name(protocol))
    }

    /// A tuple of `n` 64-bit integers: passed indirectly past four.
    pub fn wide(&self, n: usize) -> TypeId {
        self.types.tuple(vec![TypeId::I64; n])
    }
}
