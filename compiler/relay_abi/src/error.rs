//! Errors reported by the layout and metadata services.
//!
//! Thunk emission treats every one of these as a defect in an earlier
//! compilation stage, but the services themselves are ordinary lookups and
//! report failure as values.

use std::fmt::Display;

use relay_ir::TypeId;

/// Abort on a violated internal consistency condition.
///
/// These are compiler bugs, never user errors: a well-formed method set
/// cannot reach them.
#[cold]
#[track_caller]
pub fn internal_error(message: impl Display) -> ! {
    panic!("internal error: {message}")
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("type t{} is address-only and has no native schema", .0.raw())]
    AddressOnly(TypeId),

    #[error("unknown class `{0}`")]
    UnknownClass(String),

    #[error("unknown protocol `{0}`")]
    UnknownProtocol(String),

    #[error("`{selector}` is not a requirement of protocol `{protocol}`")]
    NotARequirement { protocol: String, selector: String },

    #[error("`{selector}` is not declared by class `{class}`")]
    UnknownMethod { class: String, selector: String },

    #[error("`{selector}` is protocol-dispatched and has no virtual table slot")]
    NotAClassMethod { selector: String },

    #[error("`{selector}` is a class method and has no witness table slot")]
    NotAWitnessMethod { selector: String },

    #[error("conformance of `{ty}` to `{protocol}` supplies {found} witnesses, expected {expected}")]
    WitnessCountMismatch {
        ty: String,
        protocol: String,
        expected: usize,
        found: usize,
    },
}
