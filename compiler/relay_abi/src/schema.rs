//! Native value schemas.
//!
//! A value has two machine-level shapes:
//!
//! - its **canonical** explosion: one word per scalar component, in field
//!   order (`(i8, i16, f64)` explodes to three words);
//! - its **native** shape: what the calling convention actually passes.
//!   Adjacent small integers share one register word, each at a bit offset;
//!   floats and 64-bit scalars take a word of their own.
//!
//! When the native shape needs more than the configured number of words,
//! the value is passed indirectly: the caller supplies the address of its
//! canonical explosion in memory (one word per component).

use smallvec::SmallVec;

use relay_ir::ScalarKind;

use crate::error::internal_error;
use crate::layout::WORD_SIZE;

/// A canonical component placed at a bit offset within a native word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Piece {
    /// Index into the canonical explosion.
    pub component: u32,
    pub shift: u32,
}

/// One native register word.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NativeWord {
    pub kind: ScalarKind,
    pub pieces: SmallVec<[Piece; 4]>,
}

/// How values of one type cross a call boundary.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NativeValueSchema {
    /// Passed in registers.
    Direct {
        canonical: SmallVec<[ScalarKind; 4]>,
        words: Vec<NativeWord>,
    },
    /// Passed by address of the canonical explosion.
    Indirect {
        canonical: SmallVec<[ScalarKind; 4]>,
    },
}

impl NativeValueSchema {
    /// Pack `canonical` into native words, falling back to indirect passing
    /// past `max_direct_words`.
    pub fn compute(canonical: &[ScalarKind], max_direct_words: usize) -> Self {
        let mut words: Vec<NativeWord> = Vec::with_capacity(canonical.len());
        let mut used_bits = 0;
        let mut packing = false;

        for (i, &kind) in canonical.iter().enumerate() {
            #[expect(clippy::cast_possible_truncation, reason = "component count is tiny")]
            let component = i as u32;
            if kind.is_packable_integer() {
                let fits = packing && used_bits + kind.bits() <= 64;
                if let (true, Some(word)) = (fits, words.last_mut()) {
                    word.pieces.push(Piece {
                        component,
                        shift: used_bits,
                    });
                    word.kind = ScalarKind::I64;
                    used_bits += kind.bits();
                    continue;
                }
                words.push(NativeWord {
                    kind,
                    pieces: SmallVec::from_slice(&[Piece {
                        component,
                        shift: 0,
                    }]),
                });
                used_bits = kind.bits();
                packing = true;
            } else {
                words.push(NativeWord {
                    kind,
                    pieces: SmallVec::from_slice(&[Piece {
                        component,
                        shift: 0,
                    }]),
                });
                packing = false;
            }
        }

        let canonical = SmallVec::from_slice(canonical);
        if words.len() > max_direct_words {
            NativeValueSchema::Indirect { canonical }
        } else {
            NativeValueSchema::Direct { canonical, words }
        }
    }

    pub fn requires_indirect(&self) -> bool {
        matches!(self, NativeValueSchema::Indirect { .. })
    }

    /// Component kinds of the canonical explosion.
    pub fn canonical(&self) -> &[ScalarKind] {
        match self {
            NativeValueSchema::Direct { canonical, .. }
            | NativeValueSchema::Indirect { canonical } => canonical,
        }
    }

    /// Kinds of the native words; empty when passed indirectly.
    pub fn native_kinds(&self) -> SmallVec<[ScalarKind; 4]> {
        match self {
            NativeValueSchema::Direct { words, .. } => words.iter().map(|w| w.kind).collect(),
            NativeValueSchema::Indirect { .. } => SmallVec::new(),
        }
    }

    /// Bytes occupied by the canonical explosion in memory.
    pub fn size_in_bytes(&self) -> u32 {
        #[expect(clippy::cast_possible_truncation, reason = "component count is tiny")]
        let n = self.canonical().len() as u32;
        n * WORD_SIZE
    }

    fn words(&self) -> &[NativeWord] {
        match self {
            NativeValueSchema::Direct { words, .. } => words,
            NativeValueSchema::Indirect { .. } => {
                internal_error("indirect values have no native words")
            }
        }
    }

    /// Reassemble native words into the canonical explosion.
    ///
    /// # Panics
    ///
    /// Panics on an indirect schema or a word count mismatch.
    pub fn map_from_native(&self, native: &[u64]) -> SmallVec<[u64; 4]> {
        let words = self.words();
        if native.len() != words.len() {
            internal_error(format_args!(
                "native word count mismatch: {} words for a {}-word schema",
                native.len(),
                words.len()
            ));
        }
        let canonical = self.canonical();
        let mut out: SmallVec<[u64; 4]> = SmallVec::from_elem(0, canonical.len());
        for (word, &bits) in words.iter().zip(native) {
            for piece in &word.pieces {
                let kind = canonical[piece.component as usize];
                out[piece.component as usize] = (bits >> piece.shift) & kind.mask();
            }
        }
        out
    }

    /// Pack the canonical explosion into native words.
    ///
    /// # Panics
    ///
    /// Panics on an indirect schema or a component count mismatch.
    pub fn map_to_native(&self, canonical_values: &[u64]) -> SmallVec<[u64; 4]> {
        let words = self.words();
        let canonical = self.canonical();
        if canonical_values.len() != canonical.len() {
            internal_error(format_args!(
                "canonical component count mismatch: {} values for {} components",
                canonical_values.len(),
                canonical.len()
            ));
        }
        words
            .iter()
            .map(|word| {
                word.pieces.iter().fold(0u64, |acc, piece| {
                    let kind = canonical[piece.component as usize];
                    acc | ((canonical_values[piece.component as usize] & kind.mask())
                        << piece.shift)
                })
            })
            .collect()
    }
}
