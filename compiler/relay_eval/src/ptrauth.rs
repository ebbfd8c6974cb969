//! Simulated pointer signing.
//!
//! A signed pointer carries a 16-bit tag in its top bits, derived from the
//! key and discriminator. Authentication strips a matching tag and faults
//! on anything else, including unsigned pointers.

use relay_ir::{PointerAuthInfo, PtrAuthKey};

use crate::errors::{EvalError, EvalResult};

const TAG_SHIFT: u32 = 48;
const ADDRESS_MASK: u64 = (1 << TAG_SHIFT) - 1;

fn salt(key: PtrAuthKey) -> u16 {
    match key {
        PtrAuthKey::IA => 0xA5A5,
        PtrAuthKey::IB => 0x5A5A,
        PtrAuthKey::DA => 0x3C3C,
        PtrAuthKey::DB => 0xC3C3,
    }
}

/// Tag a pointer signed with `auth` carries; never zero.
pub fn tag(auth: PointerAuthInfo) -> u16 {
    match auth.discriminator ^ salt(auth.key) {
        0 => 1,
        t => t,
    }
}

pub fn sign(value: u64, auth: PointerAuthInfo) -> u64 {
    (value & ADDRESS_MASK) | (u64::from(tag(auth)) << TAG_SHIFT)
}

pub fn authenticate(value: u64, auth: PointerAuthInfo) -> EvalResult<u64> {
    let expected = tag(auth);
    if value >> TAG_SHIFT == u64::from(expected) {
        Ok(value & ADDRESS_MASK)
    } else {
        Err(EvalError::AuthFailure { value, expected })
    }
}

/// Drop signature bits without checking them.
pub fn strip(value: u64) -> u64 {
    value & ADDRESS_MASK
}

pub fn is_signed(value: u64) -> bool {
    value >> TAG_SHIFT != 0
}
