//! Pointer-authentication schema for class method pointers.
//!
//! Each method's virtual table entry is signed with the configured key and
//! a 16-bit discriminator derived from the method's descriptor symbol. The
//! discriminator is a stable hash, so separately compiled modules agree on
//! it without coordination.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use relay_ir::{PointerAuthInfo, PtrAuthKey};

/// Signing configuration for function pointers loaded from class tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PointerAuthSchema {
    pub key: PtrAuthKey,
}

impl PointerAuthSchema {
    pub const fn new(key: PtrAuthKey) -> Self {
        Self { key }
    }

    pub const fn info(self, discriminator: u16) -> PointerAuthInfo {
        PointerAuthInfo {
            key: self.key,
            discriminator,
        }
    }
}

/// Parse a key name (`ia`, `ib`, `da`, `db`).
pub fn parse_key(name: &str) -> Option<PtrAuthKey> {
    match name.trim().to_ascii_lowercase().as_str() {
        "ia" => Some(PtrAuthKey::IA),
        "ib" => Some(PtrAuthKey::IB),
        "da" => Some(PtrAuthKey::DA),
        "db" => Some(PtrAuthKey::DB),
        _ => None,
    }
}

/// Stable 16-bit discriminator for `symbol`.
pub fn stable_discriminator(symbol: &str) -> u16 {
    let mut hasher = FxHasher::default();
    hasher.write(symbol.as_bytes());
    let h = hasher.finish();
    #[expect(clippy::cast_possible_truncation, reason = "folding to 16 bits")]
    let folded = (h ^ (h >> 16) ^ (h >> 32) ^ (h >> 48)) as u16;
    folded
}
