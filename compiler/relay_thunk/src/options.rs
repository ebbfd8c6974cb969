//! Thunk generation options.

use relay_abi::{parse_key, PointerAuthSchema};

/// Options shared by every thunk a [`ThunkModule`](crate::ThunkModule)
/// emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThunkOptions {
    /// Signing schema for class method pointers; `None` disables pointer
    /// authentication.
    pub pointer_auth: Option<PointerAuthSchema>,
    /// Emit batches of thunks on the rayon thread pool.
    pub parallel: bool,
}

impl Default for ThunkOptions {
    fn default() -> Self {
        Self {
            pointer_auth: None,
            parallel: true,
        }
    }
}

impl ThunkOptions {
    /// Read options from the environment.
    ///
    /// - `RELAY_PTRAUTH`: `off`, `ia`, `ib`, `da` or `db`
    /// - `RELAY_SERIAL_EMIT`: any value other than `0` disables parallel
    ///   emission
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("RELAY_PTRAUTH").ok().as_deref(),
            std::env::var("RELAY_SERIAL_EMIT").ok().as_deref(),
        )
    }

    /// Build options from raw variable values.
    pub fn from_vars(ptrauth: Option<&str>, serial_emit: Option<&str>) -> Self {
        let mut options = Self::default();
        if let Some(value) = ptrauth {
            match value.trim() {
                "" | "off" | "none" => {}
                name => match parse_key(name) {
                    Some(key) => options.pointer_auth = Some(PointerAuthSchema::new(key)),
                    None => tracing::warn!(value = name, "ignoring unknown RELAY_PTRAUTH key"),
                },
            }
        }
        if let Some(value) = serial_emit {
            options.parallel = value.trim() == "0";
        }
        options
    }

    #[must_use]
    pub fn with_pointer_auth(mut self, schema: PointerAuthSchema) -> Self {
        self.pointer_auth = Some(schema);
        self
    }

    #[must_use]
    pub fn serial(mut self) -> Self {
        self.parallel = false;
        self
    }
}
