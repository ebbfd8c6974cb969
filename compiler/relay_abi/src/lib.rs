//! Relay ABI: everything thunk emission asks of the layout and metadata
//! subsystems.
//!
//! - **Native value schemas** ([`NativeValueSchema`]): how a value's
//!   canonical components pack into register words, or that it is passed
//!   indirectly
//! - **Layout service** ([`LayoutService`], [`TargetLayout`]): schemas per
//!   type and async context frame layouts per method
//! - **Signature lowering** ([`lower_signature`]): the flat native
//!   parameter list of a method, with a role per word
//! - **Metadata service** ([`MetadataService`], [`ModuleMetadata`]): virtual
//!   table slots, witness table slots, class member lists and descriptors
//! - **Pointer authentication** ([`PointerAuthSchema`])
//!
//! Services answer with `Result<_, AbiError>`; callers inside the thunk
//! generator treat an error as an internal consistency violation.

pub mod async_layout;
mod error;
pub mod layout;
pub mod lowering;
pub mod metadata;
pub mod ptrauth;
pub mod schema;

#[cfg(test)]
mod test_helpers;

pub use async_layout::{AsyncContextLayout, FrameValue, CONTEXT_HEADER_SIZE};
pub use error::{internal_error, AbiError};
pub use layout::{LayoutConfig, LayoutService, TargetLayout, ValuePassing, WORD_SIZE};
pub use lowering::{lower_signature, ArgRole, LoweredSignature, NativeParam};
pub use metadata::{
    ClassDecl, ClassMethodEntry, Conformance, MetadataService, MethodDecl, ModuleMetadata,
    ProtocolDecl, VTableEntry, VTableLayout, VTABLE_HEADER_WORDS, WITNESS_HEADER_WORDS,
};
pub use ptrauth::{parse_key, stable_discriminator, PointerAuthSchema};
pub use schema::{NativeValueSchema, NativeWord, Piece};
