//! Relay thunk emission: dispatch thunks and method lookup functions.
//!
//! A *dispatch thunk* is the stable, exported entry point for calling a
//! class or protocol method without knowing where its implementation lives
//! in a table. It receives exactly the native arguments the method would,
//! loads the implementation from the receiver's witness table or class
//! virtual table, and forwards every argument, result and error unchanged.
//!
//! A *method lookup function* maps a class's metadata and a method
//! descriptor to the implementation currently installed for it, for
//! callers that cannot compute table offsets at compile time.
//!
//! # Architecture
//!
//! - [`ThunkModule`]: services, idempotent symbol registries and globals
//! - `emit`: the staged emission driver (entry, arguments, target, call,
//!   return)
//! - `marshal`: recovering logical arguments from the native parameters
//! - `target`: choosing and loading the implementation pointer
//! - `call`: re-lowering logical arguments for the forwarded call
//! - `lookup`: the resilient lookup fallback
//!
//! # Tracing
//!
//! Set `RUST_LOG=relay_thunk=debug` (or `trace`) and call
//! [`init_tracing`] to follow emission stage by stage.

mod call;
mod emit;
pub mod explosion;
mod lookup;
mod marshal;
mod module;
pub mod options;
pub mod registry;
mod target;

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "fixtures are well-formed by construction")]
mod test_helpers;

use std::sync::Once;

use relay_abi::AbiError;

pub use explosion::Explosion;
pub use module::{EntryPoint, GlobalDefinition, Services, ThunkModule};
pub use options::ThunkOptions;
pub use registry::{RegistryEntry, SymbolRegistry};

static TRACING_INIT: Once = Once::new();

/// Initialize the tracing subscriber.
///
/// Call this once at startup. Safe to call multiple times.
/// Enable with `RUST_LOG=relay_thunk=debug` or `RUST_LOG=relay_thunk=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}

pub(crate) use relay_abi::internal_error;

/// Treat a failed service query as an internal consistency violation.
pub(crate) trait ServiceResultExt<T> {
    fn or_internal(self, what: &str) -> T;
}

impl<T> ServiceResultExt<T> for Result<T, AbiError> {
    #[track_caller]
    fn or_internal(self, what: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => internal_error(format_args!("{what}: {err}")),
        }
    }
}
