//! Faults raised while running thunk IR on the reference machine.
//!
//! Each variant is something real hardware or the runtime would trap on;
//! tests assert that well-formed thunks never raise them.

use relay_abi::AbiError;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("access to unmapped address {0:#x}")]
    Unmapped(u64),

    #[error("read of {0:#x} after its value was taken")]
    UseAfterTake(u64),

    #[error("call to {0}, which is neither a thunk nor a registered implementation")]
    UnknownCallee(String),

    #[error("pointer {value:#x} failed authentication (expected tag {expected:#06x})")]
    AuthFailure { value: u64, expected: u16 },

    #[error("{what}: expected {expected} values, found {found}")]
    ArityMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("`{0}` raised an error but its caller passed no error slot")]
    UnhandledError(String),

    #[error("context frame at {frame:#x} has {actual} bytes, {required} required")]
    FrameTooSmall { frame: u64, actual: u32, required: u32 },

    #[error("descriptor {0:#x} does not identify a method of the given class")]
    BadDescriptor(u64),

    #[error("argument {0} does not match how its parameter is passed")]
    ArgumentShape(usize),

    #[error("reached unreachable code in `{0}`")]
    Unreachable(String),

    #[error(transparent)]
    Metadata(#[from] AbiError),
}

pub type EvalResult<T> = Result<T, EvalError>;
