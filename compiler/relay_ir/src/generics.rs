//! Generic signatures and substitution maps.

use crate::types::{TypeId, TypeKind, TypePool};

/// The generic parameters and conformance requirements of a method.
///
/// At the calling-convention level each parameter is passed as one type
/// metadata word and each requirement as one witness table word. These
/// words are the method's *generic bindings*.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GenericSignature {
    pub params: u32,
    pub requirements: u32,
}

impl GenericSignature {
    pub const EMPTY: GenericSignature = GenericSignature {
        params: 0,
        requirements: 0,
    };

    pub const fn new(params: u32, requirements: u32) -> Self {
        Self {
            params,
            requirements,
        }
    }

    pub const fn is_empty(self) -> bool {
        self.params == 0 && self.requirements == 0
    }

    /// Number of pointer-sized binding words passed after the parameters.
    pub const fn binding_count(self) -> u32 {
        self.params + self.requirements
    }
}

/// Replacement types for each generic parameter of a signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubstitutionMap {
    replacements: Vec<TypeId>,
}

impl SubstitutionMap {
    /// Map every parameter of `signature` to itself.
    ///
    /// This is the map a thunk uses: it forwards whatever its caller was
    /// generic over without committing to a concrete instantiation.
    pub fn forwarding(signature: GenericSignature, pool: &TypePool) -> Self {
        Self {
            replacements: (0..signature.params).map(|i| pool.generic(i)).collect(),
        }
    }

    pub fn new(replacements: Vec<TypeId>) -> Self {
        Self { replacements }
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    pub fn replacements(&self) -> &[TypeId] {
        &self.replacements
    }

    /// Apply the map to `ty`.
    ///
    /// # Panics
    ///
    /// Panics if `ty` mentions a generic parameter this map has no
    /// replacement for.
    pub fn apply(&self, ty: TypeId, pool: &TypePool) -> TypeId {
        match pool.kind(ty) {
            TypeKind::Generic(n) => *self.replacements.get(n as usize).unwrap_or_else(|| {
                panic!(
                    "generic parameter {n} has no replacement (map covers {})",
                    self.replacements.len()
                )
            }),
            TypeKind::Tuple(elements) => {
                let substituted = elements.iter().map(|&e| self.apply(e, pool)).collect();
                pool.tuple(substituted)
            }
            TypeKind::Unit
            | TypeKind::Scalar(_)
            | TypeKind::Object(_)
            | TypeKind::Metatype(_)
            | TypeKind::ProtocolSelf(_) => ty,
        }
    }
}
