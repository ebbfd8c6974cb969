//! Reference machine for Relay thunks.
//!
//! Runs emitted thunk IR against class metadata, witness tables and
//! native implementations laid out in simulated, word-addressed memory.
//! Tests use it to check observable behavior: a call through a dispatch
//! thunk must be indistinguishable from calling the implementation
//! directly, a lookup function must agree with the runtime, and so on.
//!
//! # Architecture
//!
//! - [`Machine`]: memory, symbol addresses, metadata and implementations
//! - `interpreter`: executes [`relay_ir::ThunkFunction`] bodies
//! - `runtime`: `relay_lookup_class_method`
//! - [`harness`]: builds native calls from logical values and reads the
//!   outcome back
//! - [`ptrauth`]: simulated pointer signing
//!
//! Faults (unmapped access, use after take, failed authentication) are
//! [`EvalError`]s rather than panics, so tests can assert on them.

mod errors;
pub mod harness;
mod interpreter;
mod machine;
pub mod memory;
pub mod ptrauth;
mod runtime;

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "fixtures are well-formed by construction")]
mod test_helpers;

pub use errors::{EvalError, EvalResult};
pub use harness::{
    call_implementation, call_lookup, call_thunk, runtime_lookup, CallReport, LogicalCall,
};
pub use machine::{ArgValue, Invocation, Machine, NativeBody};
pub use memory::Memory;
