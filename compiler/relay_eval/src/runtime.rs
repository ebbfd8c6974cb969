//! Runtime entry points generated code calls.

use relay_abi::MetadataService;
use relay_thunk::GlobalDefinition;

use crate::errors::{EvalError, EvalResult};
use crate::machine::Machine;
use crate::memory::WORD;

/// Bound on superclass chains, so a corrupt chain faults instead of looping.
const MAX_ANCESTRY: usize = 64;

impl Machine {
    /// `relay_lookup_class_method`: the entry `metadata`'s own table holds
    /// for the method `descriptor` identifies.
    ///
    /// `tcd` is the type context descriptor of the class whose lookup
    /// function is asking; `metadata` must describe that class or one of
    /// its subclasses. The entry comes back exactly as stored, signature
    /// bits included.
    pub fn lookup_class_method(&mut self, metadata: u64, descriptor: u64, tcd: u64) -> EvalResult<u64> {
        let method = match self
            .name_at(descriptor)
            .and_then(|name| self.module.global(name))
        {
            Some(GlobalDefinition::MethodDescriptor { method }) => method,
            _ => return Err(EvalError::BadDescriptor(descriptor)),
        };
        if !self.descends_from(metadata, tcd)? {
            return Err(EvalError::BadDescriptor(descriptor));
        }
        let offset = self.metadata.vtable_offset(&method)?;
        let slot = self.vtable_slot(metadata, offset)?;
        let entry = self.memory.read(slot)?;
        tracing::trace!(
            selector = self.module.interner().lookup(method.selector),
            entry,
            "runtime method lookup"
        );
        Ok(entry)
    }

    fn descends_from(&self, metadata: u64, tcd: u64) -> EvalResult<bool> {
        let mut current = metadata;
        for _ in 0..MAX_ANCESTRY {
            if current == 0 {
                return Ok(false);
            }
            if self.memory.read(current)? == tcd {
                return Ok(true);
            }
            current = self.memory.read(current + WORD)?;
        }
        Err(EvalError::Unmapped(current))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
