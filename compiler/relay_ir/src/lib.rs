//! Relay IR: the vocabulary shared by every Relay crate.
//!
//! This crate contains:
//! - Names for interned identifiers ([`Name`], [`StringInterner`])
//! - Calling-convention-level types ([`TypePool`], [`TypeId`], [`TypeKind`])
//! - Generic signatures and substitution maps
//! - Method references and their signatures ([`MethodReference`])
//! - Symbol mangling ([`Mangler`], [`demangle`])
//! - The thunk IR ([`ThunkFunction`]) and its builder ([`IrBuilder`])
//!
//! # Design Philosophy
//!
//! - **Intern Everything**: Strings → `Name(u32)`, types → `TypeId(u32)`
//! - **Immutable References**: a [`MethodReference`] is created once per
//!   declaration and compared structurally
//! - **Shared Across Threads**: the interner and type pool are internally
//!   synchronized so thunks can be emitted in parallel

pub mod builder;
pub mod generics;
pub mod ir;
pub mod mangle;
pub mod method;
mod name;
pub mod types;

pub use builder::IrBuilder;
pub use generics::{GenericSignature, SubstitutionMap};
pub use ir::{
    Block, BlockId, Instr, PointerAuthInfo, PtrAuthKey, RuntimeFunction, Terminator,
    ThunkFunction, VTableOffset, VarId,
};
pub use mangle::{demangle, EntityKind, Mangler, MANGLE_PREFIX};
pub use method::{
    CallingConventionKind, DeclContext, FunctionSignature, MethodKind, MethodReference,
    Visibility,
};
pub use name::{Name, SharedInterner, StringInterner};
pub use types::{ScalarKind, TypeId, TypeKind, TypePool};
