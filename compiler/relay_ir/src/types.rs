//! Calling-convention-level types.
//!
//! The thunk generator never sees source-level types. It sees the handful
//! of shapes that matter for argument passing: machine scalars, tuples of
//! them, class references, metatypes, protocol receivers and unresolved
//! generic parameters. Types are hash-consed in a [`TypePool`] and referred
//! to by [`TypeId`].

use std::fmt;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::Name;

/// A machine-level scalar component.
///
/// Canonical explosions and native schemas are both lists of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Pointer-sized word (addresses, metadata, function values).
    Ptr,
}

impl ScalarKind {
    /// Width in bits.
    pub const fn bits(self) -> u32 {
        match self {
            ScalarKind::I8 => 8,
            ScalarKind::I16 => 16,
            ScalarKind::I32 | ScalarKind::F32 => 32,
            ScalarKind::I64 | ScalarKind::F64 | ScalarKind::Ptr => 64,
        }
    }

    /// Integer scalars narrower than a word may share a native register.
    pub const fn is_packable_integer(self) -> bool {
        matches!(self, ScalarKind::I8 | ScalarKind::I16 | ScalarKind::I32)
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ScalarKind::F32 | ScalarKind::F64)
    }

    /// Mask selecting the meaningful low bits of a word holding this scalar.
    pub const fn mask(self) -> u64 {
        match self.bits() {
            64 => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarKind::I8 => "i8",
            ScalarKind::I16 => "i16",
            ScalarKind::I32 => "i32",
            ScalarKind::I64 => "i64",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
            ScalarKind::Ptr => "ptr",
        };
        f.write_str(s)
    }
}

/// Index of a type in a [`TypePool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeId(u32);

impl TypeId {
    pub const UNIT: TypeId = TypeId(0);
    pub const I8: TypeId = TypeId(1);
    pub const I16: TypeId = TypeId(2);
    pub const I32: TypeId = TypeId(3);
    pub const I64: TypeId = TypeId(4);
    pub const F32: TypeId = TypeId(5);
    pub const F64: TypeId = TypeId(6);
    pub const PTR: TypeId = TypeId(7);

    const FIRST_COMPOUND: u32 = 8;

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The pre-interned id of a scalar type.
    pub const fn of_scalar(kind: ScalarKind) -> TypeId {
        match kind {
            ScalarKind::I8 => TypeId::I8,
            ScalarKind::I16 => TypeId::I16,
            ScalarKind::I32 => TypeId::I32,
            ScalarKind::I64 => TypeId::I64,
            ScalarKind::F32 => TypeId::F32,
            ScalarKind::F64 => TypeId::F64,
            ScalarKind::Ptr => TypeId::PTR,
        }
    }
}

/// Structure of a type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Unit,
    Scalar(ScalarKind),
    /// Flattened field-by-field when exploded.
    Tuple(Vec<TypeId>),
    /// Strong reference to a class instance.
    Object(Name),
    /// Metatype value of a class: a pointer to its metadata.
    Metatype(Name),
    /// Receiver of a protocol requirement, opaque to the caller.
    ProtocolSelf(Name),
    /// Generic parameter `n` of the enclosing generic signature.
    ///
    /// Values of generic type are address-only: they are always passed
    /// by address and never exploded.
    Generic(u32),
}

struct PoolInner {
    kinds: Vec<TypeKind>,
    lookup: FxHashMap<TypeKind, TypeId>,
}

/// Hash-consed type storage, shared by every emission thread.
pub struct TypePool {
    inner: RwLock<PoolInner>,
}

impl TypePool {
    /// Create a pool with the unit and scalar types pre-interned.
    pub fn new() -> Self {
        let pre = [
            TypeKind::Unit,
            TypeKind::Scalar(ScalarKind::I8),
            TypeKind::Scalar(ScalarKind::I16),
            TypeKind::Scalar(ScalarKind::I32),
            TypeKind::Scalar(ScalarKind::I64),
            TypeKind::Scalar(ScalarKind::F32),
            TypeKind::Scalar(ScalarKind::F64),
            TypeKind::Scalar(ScalarKind::Ptr),
        ];
        let mut inner = PoolInner {
            kinds: Vec::with_capacity(64),
            lookup: FxHashMap::default(),
        };
        for (i, kind) in pre.into_iter().enumerate() {
            #[expect(clippy::cast_possible_truncation, reason = "eight entries")]
            let id = TypeId(i as u32);
            inner.lookup.insert(kind.clone(), id);
            inner.kinds.push(kind);
        }
        debug_assert_eq!(inner.kinds.len(), TypeId::FIRST_COMPOUND as usize);
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Intern a type, returning the existing id when already present.
    pub fn intern(&self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.inner.read().lookup.get(&kind) {
            return id;
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.lookup.get(&kind) {
            return id;
        }
        let id = TypeId(
            u32::try_from(inner.kinds.len())
                .unwrap_or_else(|_| panic!("type count exceeds u32::MAX")),
        );
        inner.kinds.push(kind.clone());
        inner.lookup.insert(kind, id);
        id
    }

    pub fn tuple(&self, elements: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Tuple(elements))
    }

    pub fn object(&self, class: Name) -> TypeId {
        self.intern(TypeKind::Object(class))
    }

    pub fn metatype(&self, class: Name) -> TypeId {
        self.intern(TypeKind::Metatype(class))
    }

    pub fn protocol_self(&self, protocol: Name) -> TypeId {
        self.intern(TypeKind::ProtocolSelf(protocol))
    }

    pub fn generic(&self, index: u32) -> TypeId {
        self.intern(TypeKind::Generic(index))
    }

    /// Structure of `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` did not come from this pool.
    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.inner
            .read()
            .kinds
            .get(id.index())
            .cloned()
            .unwrap_or_else(|| panic!("{id:?} does not belong to this pool"))
    }

    /// Whether `id` (transitively) contains a generic parameter.
    pub fn is_address_only(&self, id: TypeId) -> bool {
        match self.kind(id) {
            TypeKind::Generic(_) => true,
            TypeKind::Tuple(elements) => elements.iter().any(|&e| self.is_address_only(e)),
            TypeKind::Unit
            | TypeKind::Scalar(_)
            | TypeKind::Object(_)
            | TypeKind::Metatype(_)
            | TypeKind::ProtocolSelf(_) => false,
        }
    }

    pub fn is_metatype(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Metatype(_))
    }

    /// Highest generic parameter index referenced by `id`, if any.
    pub fn max_generic_index(&self, id: TypeId) -> Option<u32> {
        match self.kind(id) {
            TypeKind::Generic(n) => Some(n),
            TypeKind::Tuple(elements) => elements
                .iter()
                .filter_map(|&e| self.max_generic_index(e))
                .max(),
            _ => None,
        }
    }

    /// Number of types in the pool.
    pub fn len(&self) -> usize {
        self.inner.read().kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}
