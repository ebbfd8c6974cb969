//! The layout service: native value schemas and async frame layouts.

use std::sync::Arc;

use dashmap::DashMap;
use smallvec::SmallVec;

use relay_ir::{MethodReference, ScalarKind, TypeId, TypeKind, TypePool};

use crate::async_layout::AsyncContextLayout;
use crate::schema::NativeValueSchema;
use crate::AbiError;

/// Bytes in a native word. Pointers, canonical components and frame
/// fields all occupy one word.
pub const WORD_SIZE: u32 = 8;

/// Target parameters for native value schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutConfig {
    /// Most native words a value may occupy before it is passed indirectly.
    pub max_direct_words: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            max_direct_words: 4,
        }
    }
}

impl LayoutConfig {
    #[must_use]
    pub fn with_max_direct_words(mut self, words: usize) -> Self {
        self.max_direct_words = words;
        self
    }
}

/// How one value crosses a call boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValuePassing {
    /// Native register words.
    Direct(Arc<NativeValueSchema>),
    /// Loadable but too large: the address of its canonical explosion.
    Indirect(Arc<NativeValueSchema>),
    /// Address-only (generic): an address, never loaded by the thunk.
    Address,
}

impl ValuePassing {
    pub fn is_direct(&self) -> bool {
        matches!(self, ValuePassing::Direct(_))
    }

    /// Whether a destination or source address is passed instead of words.
    pub fn is_by_address(&self) -> bool {
        !self.is_direct()
    }
}

/// Supplies native value schemas and async frame offsets.
///
/// Computing these is owned by the layout subsystem; thunk emission only
/// consults the answers.
pub trait LayoutService: Send + Sync {
    fn config(&self) -> LayoutConfig;

    fn types(&self) -> &TypePool;

    /// Canonical explosion of a loadable type.
    fn canonical_components(&self, ty: TypeId) -> Result<SmallVec<[ScalarKind; 4]>, AbiError>;

    /// Native schema of a loadable type.
    fn native_schema(&self, ty: TypeId) -> Result<Arc<NativeValueSchema>, AbiError>;

    fn async_context_layout(
        &self,
        method: &MethodReference,
    ) -> Result<Arc<AsyncContextLayout>, AbiError>;

    fn is_address_only(&self, ty: TypeId) -> bool {
        self.types().is_address_only(ty)
    }

    /// Classify how values of `ty` are passed.
    fn passing(&self, ty: TypeId) -> Result<ValuePassing, AbiError> {
        if self.is_address_only(ty) {
            return Ok(ValuePassing::Address);
        }
        let schema = self.native_schema(ty)?;
        Ok(if schema.requires_indirect() {
            ValuePassing::Indirect(schema)
        } else {
            ValuePassing::Direct(schema)
        })
    }
}

/// Reference layout: flattens tuples field by field and packs small
/// integers, with per-type and per-method caches.
pub struct TargetLayout {
    types: Arc<TypePool>,
    config: LayoutConfig,
    schemas: DashMap<TypeId, Arc<NativeValueSchema>>,
    frames: DashMap<MethodReference, Arc<AsyncContextLayout>>,
}

impl TargetLayout {
    pub fn new(types: Arc<TypePool>, config: LayoutConfig) -> Self {
        Self {
            types,
            config,
            schemas: DashMap::new(),
            frames: DashMap::new(),
        }
    }

    fn flatten(
        &self,
        ty: TypeId,
        out: &mut SmallVec<[ScalarKind; 4]>,
    ) -> Result<(), AbiError> {
        match self.types.kind(ty) {
            TypeKind::Unit => {}
            TypeKind::Scalar(kind) => out.push(kind),
            TypeKind::Tuple(elements) => {
                for e in elements {
                    self.flatten(e, out)?;
                }
            }
            TypeKind::Object(_) | TypeKind::Metatype(_) | TypeKind::ProtocolSelf(_) => {
                out.push(ScalarKind::Ptr);
            }
            TypeKind::Generic(_) => return Err(AbiError::AddressOnly(ty)),
        }
        Ok(())
    }
}

impl LayoutService for TargetLayout {
    fn config(&self) -> LayoutConfig {
        self.config
    }

    fn types(&self) -> &TypePool {
        &self.types
    }

    fn canonical_components(&self, ty: TypeId) -> Result<SmallVec<[ScalarKind; 4]>, AbiError> {
        let mut out = SmallVec::new();
        self.flatten(ty, &mut out)?;
        Ok(out)
    }

    fn native_schema(&self, ty: TypeId) -> Result<Arc<NativeValueSchema>, AbiError> {
        if let Some(schema) = self.schemas.get(&ty) {
            return Ok(Arc::clone(&schema));
        }
        let canonical = self.canonical_components(ty)?;
        let schema = Arc::new(NativeValueSchema::compute(
            &canonical,
            self.config.max_direct_words,
        ));
        tracing::trace!(
            ty = ty.raw(),
            components = canonical.len(),
            indirect = schema.requires_indirect(),
            "computed native schema"
        );
        Ok(Arc::clone(self.schemas.entry(ty).or_insert(schema).value()))
    }

    fn async_context_layout(
        &self,
        method: &MethodReference,
    ) -> Result<Arc<AsyncContextLayout>, AbiError> {
        if let Some(layout) = self.frames.get(method) {
            return Ok(Arc::clone(&layout));
        }
        let layout = Arc::new(AsyncContextLayout::compute(method, self)?);
        Ok(Arc::clone(
            self.frames.entry(method.clone()).or_insert(layout).value(),
        ))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
