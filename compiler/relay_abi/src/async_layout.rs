//! Layout of the heap-resident context frame of an async call.
//!
//! An async function takes a single native argument, the address of a
//! frame its caller allocated. The frame holds everything the ordinary
//! convention would pass in registers:
//!
//! ```text
//! +0   header (parent context, resume function)
//!      error slot address          (throwing methods)
//!      indirect return address     (results passed by address)
//!      arguments                   (canonical words, or an address)
//!      generic bindings            (one word each)
//!      local context (receiver)
//!      self metadata, witness table (protocol-dispatched methods)
//!      direct results              (canonical words)
//! ```
//!
//! The layout is immutable once computed; only the frame's contents change
//! during an invocation.

use smallvec::SmallVec;

use relay_ir::{MethodReference, ScalarKind};

use crate::layout::{LayoutService, ValuePassing, WORD_SIZE};
use crate::AbiError;

/// Bytes reserved at the start of every context frame.
pub const CONTEXT_HEADER_SIZE: u32 = 16;

/// A value stored in a context frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameValue {
    /// Canonical components stored inline, one word each.
    Inline {
        offset: u32,
        components: SmallVec<[ScalarKind; 4]>,
    },
    /// Address of a value passed indirectly.
    Address { offset: u32 },
}

impl FrameValue {
    pub fn offset(&self) -> u32 {
        match self {
            FrameValue::Inline { offset, .. } | FrameValue::Address { offset } => *offset,
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            FrameValue::Inline { components, .. } => {
                #[expect(clippy::cast_possible_truncation, reason = "component count is tiny")]
                let n = components.len() as u32;
                n * WORD_SIZE
            }
            FrameValue::Address { .. } => WORD_SIZE,
        }
    }
}

/// Field offsets (bytes) within an async context frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsyncContextLayout {
    pub error_slot: Option<u32>,
    pub indirect_return: Option<u32>,
    /// One entry per declared parameter, in order.
    pub args: Vec<FrameValue>,
    pub bindings: u32,
    pub binding_count: u32,
    pub local_context: u32,
    pub self_metadata: Option<u32>,
    pub self_witness_table: Option<u32>,
    /// Direct results; `None` for unit results and results returned
    /// through `indirect_return`.
    pub results: Option<FrameValue>,
    /// Total frame size in bytes.
    pub size: u32,
}

struct Cursor(u32);

impl Cursor {
    fn word(&mut self) -> u32 {
        let at = self.0;
        self.0 += WORD_SIZE;
        at
    }

    fn value(&mut self, passing: &ValuePassing) -> FrameValue {
        match passing {
            ValuePassing::Direct(schema) => {
                let at = self.0;
                self.0 += schema.size_in_bytes();
                FrameValue::Inline {
                    offset: at,
                    components: SmallVec::from_slice(schema.canonical()),
                }
            }
            ValuePassing::Indirect(_) | ValuePassing::Address => FrameValue::Address {
                offset: self.word(),
            },
        }
    }
}

impl AsyncContextLayout {
    /// Lay out the frame for calls to `method`.
    pub fn compute(
        method: &MethodReference,
        layout: &dyn LayoutService,
    ) -> Result<Self, AbiError> {
        let sig = &method.signature;
        let mut cursor = Cursor(CONTEXT_HEADER_SIZE);

        let error_slot = sig.error.map(|_| cursor.word());

        let result = layout.passing(sig.result)?;
        let indirect_return = result.is_by_address().then(|| cursor.word());

        let args = sig
            .params
            .iter()
            .map(|&p| Ok(cursor.value(&layout.passing(p)?)))
            .collect::<Result<Vec<_>, AbiError>>()?;

        let bindings = cursor.0;
        let binding_count = sig.generics.binding_count();
        cursor.0 += binding_count * WORD_SIZE;

        let local_context = cursor.word();
        let (self_metadata, self_witness_table) = if method.is_witness_method() {
            (Some(cursor.word()), Some(cursor.word()))
        } else {
            (None, None)
        };

        let results = match &result {
            ValuePassing::Direct(schema) if !schema.canonical().is_empty() => {
                Some(cursor.value(&result))
            }
            _ => None,
        };

        Ok(Self {
            error_slot,
            indirect_return,
            args,
            bindings,
            binding_count,
            local_context,
            self_metadata,
            self_witness_table,
            results,
            size: cursor.0,
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
