//! The metadata service: table slots, conformances and class member lists.
//!
//! # Class metadata layout
//!
//! ```text
//! word 0   type context descriptor
//! word 1   superclass metadata (0 for root classes)
//! word 2.. virtual table: ancestors' entries first, then the class's own
//! ```
//!
//! A class whose own layout or any ancestor's layout may grow in a later
//! library version is *resilient*: its own entries are addressed relative
//! to a bounds global holding the byte offset where they start, instead of
//! a fixed word index.
//!
//! # Witness table layout
//!
//! Word 0 is the conformance descriptor; requirement `i` lives at word
//! `i + 1`.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use relay_ir::{
    DeclContext, EntityKind, Mangler, MethodReference, Name, SharedInterner, TypePool,
    VTableOffset, Visibility,
};

use crate::ptrauth::stable_discriminator;
use crate::AbiError;

/// Words before the first virtual table entry.
pub const VTABLE_HEADER_WORDS: u32 = 2;

/// Words before the first witness in a witness table.
pub const WITNESS_HEADER_WORDS: u32 = 1;

/// A member introduced by a class, as the lookup fallback sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassMethodEntry {
    pub method: MethodReference,
    /// Symbol of this class's implementation.
    pub implementation: Name,
    pub visibility: Visibility,
    /// Whether some class in this module overrides the entry.
    pub overridden: bool,
}

/// Answers table-slot and conformance questions.
///
/// Deciding which slot a method occupies is owned by the metadata layout
/// subsystem; thunk emission only consults the answers.
pub trait MetadataService: Send + Sync {
    /// Module whose classes this service describes.
    fn module(&self) -> Name;

    /// Witness table word holding `method`'s witness.
    fn witness_index(&self, method: &MethodReference) -> Result<u32, AbiError>;

    /// Slot of `method` in its class's virtual table.
    fn vtable_offset(&self, method: &MethodReference) -> Result<VTableOffset, AbiError>;

    /// Whether `method` introduces a new table entry (rather than
    /// overriding an inherited one).
    fn introduces_entry(&self, method: &MethodReference) -> Result<bool, AbiError>;

    /// Members `class` introduces, in table order.
    fn class_methods(&self, class: Name) -> Result<Vec<ClassMethodEntry>, AbiError>;

    /// Discriminator signing `method`'s table entries.
    fn method_discriminator(&self, method: &MethodReference) -> Result<u16, AbiError>;

    /// Symbol of `class`'s type context descriptor.
    fn type_context_descriptor(&self, class: Name) -> Result<Name, AbiError>;
}

// ── Declarations ────────────────────────────────────────────────────

/// A method declared in a class body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDecl {
    /// Owned by the declaring class.
    pub method: MethodReference,
    pub implementation: Name,
    pub visibility: Visibility,
    /// The inherited method whose entry this one replaces.
    pub overrides: Option<MethodReference>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassDecl {
    pub name: Name,
    pub superclass: Option<Name>,
    /// Layout may grow in later library versions.
    pub resilient: bool,
    pub methods: Vec<MethodDecl>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolDecl {
    pub name: Name,
    pub requirements: Vec<MethodReference>,
}

/// Conformance of a class to a protocol: one witness per requirement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conformance {
    pub ty: Name,
    pub protocol: Name,
    pub witnesses: Vec<Name>,
}

/// A resolved virtual table entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VTableEntry {
    /// The method that introduced the slot.
    pub method: MethodReference,
    /// Final implementation for this class.
    pub implementation: Name,
}

/// The complete virtual table of one class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VTableLayout {
    pub entries: Vec<VTableEntry>,
    /// Word index (from the start of metadata) of the class's own entries.
    pub own_start: u32,
}

impl VTableLayout {
    pub fn metadata_words(&self) -> u32 {
        #[expect(clippy::cast_possible_truncation, reason = "table sizes are tiny")]
        let n = self.entries.len() as u32;
        VTABLE_HEADER_WORDS + n
    }
}

// ── Module metadata ─────────────────────────────────────────────────

/// Reference metadata for one module's classes, protocols and
/// conformances.
pub struct ModuleMetadata {
    module: Name,
    interner: SharedInterner,
    types: Arc<TypePool>,
    classes: Vec<ClassDecl>,
    class_index: FxHashMap<Name, usize>,
    protocols: FxHashMap<Name, ProtocolDecl>,
    conformances: Vec<Conformance>,
}

impl ModuleMetadata {
    pub fn new(module: Name, interner: SharedInterner, types: Arc<TypePool>) -> Self {
        Self {
            module,
            interner,
            types,
            classes: Vec::new(),
            class_index: FxHashMap::default(),
            protocols: FxHashMap::default(),
            conformances: Vec::new(),
        }
    }

    pub fn add_class(&mut self, class: ClassDecl) {
        self.class_index.insert(class.name, self.classes.len());
        self.classes.push(class);
    }

    pub fn add_protocol(&mut self, protocol: ProtocolDecl) {
        self.protocols.insert(protocol.name, protocol);
    }

    pub fn add_conformance(&mut self, conformance: Conformance) -> Result<(), AbiError> {
        let protocol = self.protocol(conformance.protocol)?;
        if protocol.requirements.len() != conformance.witnesses.len() {
            return Err(AbiError::WitnessCountMismatch {
                ty: self.str(conformance.ty).to_owned(),
                protocol: self.str(conformance.protocol).to_owned(),
                expected: protocol.requirements.len(),
                found: conformance.witnesses.len(),
            });
        }
        self.conformances.push(conformance);
        Ok(())
    }

    pub fn interner(&self) -> &SharedInterner {
        &self.interner
    }

    pub fn types(&self) -> &Arc<TypePool> {
        &self.types
    }

    pub fn classes(&self) -> &[ClassDecl] {
        &self.classes
    }

    pub fn conformances(&self) -> &[Conformance] {
        &self.conformances
    }

    fn str(&self, name: Name) -> &'static str {
        self.interner.lookup(name)
    }

    fn mangler(&self) -> Mangler<'_> {
        Mangler::new(&self.interner, &self.types)
    }

    pub fn class(&self, name: Name) -> Result<&ClassDecl, AbiError> {
        self.class_index
            .get(&name)
            .map(|&i| &self.classes[i])
            .ok_or_else(|| AbiError::UnknownClass(self.str(name).to_owned()))
    }

    pub fn protocol(&self, name: Name) -> Result<&ProtocolDecl, AbiError> {
        self.protocols
            .get(&name)
            .ok_or_else(|| AbiError::UnknownProtocol(self.str(name).to_owned()))
    }

    /// Superclass chain of `class`, root first, ending with `class`.
    pub fn ancestry(&self, class: Name) -> Result<Vec<&ClassDecl>, AbiError> {
        let mut chain = Vec::new();
        let mut next = Some(class);
        while let Some(name) = next {
            let decl = self.class(name)?;
            chain.push(decl);
            next = decl.superclass;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Whether `class`'s own entries move when a library evolves.
    pub fn is_resilient(&self, class: Name) -> Result<bool, AbiError> {
        Ok(self.ancestry(class)?.iter().any(|c| c.resilient))
    }

    fn method_decl(&self, method: &MethodReference) -> Result<&MethodDecl, AbiError> {
        let DeclContext::Class(class) = method.owner else {
            return Err(AbiError::NotAClassMethod {
                selector: self.str(method.selector).to_owned(),
            });
        };
        self.class(class)?
            .methods
            .iter()
            .find(|m| &m.method == method)
            .ok_or_else(|| AbiError::UnknownMethod {
                class: self.str(class).to_owned(),
                selector: self.str(method.selector).to_owned(),
            })
    }

    /// The method that introduced the table entry `method` occupies.
    pub fn introducing_method(&self, method: &MethodReference) -> Result<MethodReference, AbiError> {
        let mut current = self.method_decl(method)?;
        while let Some(base) = &current.overrides {
            current = self.method_decl(base)?;
        }
        Ok(current.method.clone())
    }

    /// Resolve the virtual table of `class`.
    pub fn vtable(&self, class: Name) -> Result<VTableLayout, AbiError> {
        let mut entries: Vec<VTableEntry> = Vec::new();
        let mut own_start = VTABLE_HEADER_WORDS;
        for decl in self.ancestry(class)? {
            #[expect(clippy::cast_possible_truncation, reason = "table sizes are tiny")]
            let start = VTABLE_HEADER_WORDS + entries.len() as u32;
            own_start = start;
            for m in &decl.methods {
                match &m.overrides {
                    None => entries.push(VTableEntry {
                        method: m.method.clone(),
                        implementation: m.implementation,
                    }),
                    Some(_) => {
                        let base = self.introducing_method(&m.method)?;
                        if let Some(entry) = entries.iter_mut().find(|e| e.method == base) {
                            entry.implementation = m.implementation;
                        }
                    }
                }
            }
        }
        Ok(VTableLayout { entries, own_start })
    }

    /// Symbol of the bounds global holding the byte offset of `class`'s
    /// own entries.
    pub fn vtable_bounds(&self, class: Name) -> Name {
        let symbol = self
            .mangler()
            .class_entity(self.module, class, EntityKind::VTableBounds);
        self.interner.intern(&symbol)
    }

    /// Every implementation symbol, paired with the method whose native
    /// signature it is called with.
    pub fn implementations(&self) -> Result<Vec<(Name, MethodReference)>, AbiError> {
        let mut out = Vec::new();
        for class in &self.classes {
            for m in &class.methods {
                out.push((m.implementation, self.introducing_method(&m.method)?));
            }
        }
        for conformance in &self.conformances {
            let protocol = self.protocol(conformance.protocol)?;
            for (witness, requirement) in conformance.witnesses.iter().zip(&protocol.requirements)
            {
                out.push((*witness, requirement.clone()));
            }
        }
        Ok(out)
    }

    fn is_overridden(&self, method: &MethodReference) -> Result<bool, AbiError> {
        for class in &self.classes {
            for m in &class.methods {
                if m.overrides.is_some() && &self.introducing_method(&m.method)? == method {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

impl MetadataService for ModuleMetadata {
    fn module(&self) -> Name {
        self.module
    }

    fn witness_index(&self, method: &MethodReference) -> Result<u32, AbiError> {
        let DeclContext::Protocol(protocol) = method.owner else {
            return Err(AbiError::NotAWitnessMethod {
                selector: self.str(method.selector).to_owned(),
            });
        };
        let position = self
            .protocol(protocol)?
            .requirements
            .iter()
            .position(|r| r == method)
            .ok_or_else(|| AbiError::NotARequirement {
                protocol: self.str(protocol).to_owned(),
                selector: self.str(method.selector).to_owned(),
            })?;
        #[expect(clippy::cast_possible_truncation, reason = "requirement counts are tiny")]
        let index = position as u32 + WITNESS_HEADER_WORDS;
        Ok(index)
    }

    fn vtable_offset(&self, method: &MethodReference) -> Result<VTableOffset, AbiError> {
        let base = self.introducing_method(method)?;
        let DeclContext::Class(class) = base.owner else {
            return Err(AbiError::NotAClassMethod {
                selector: self.str(method.selector).to_owned(),
            });
        };
        let table = self.vtable(class)?;
        let word = table
            .entries
            .iter()
            .position(|e| e.method == base)
            .ok_or_else(|| AbiError::UnknownMethod {
                class: self.str(class).to_owned(),
                selector: self.str(method.selector).to_owned(),
            })?;
        #[expect(clippy::cast_possible_truncation, reason = "table sizes are tiny")]
        let word = word as u32 + VTABLE_HEADER_WORDS;

        if self.is_resilient(class)? {
            Ok(VTableOffset::Resilient {
                bounds: self.vtable_bounds(class),
                index: word - table.own_start,
            })
        } else {
            Ok(VTableOffset::Fixed { word })
        }
    }

    fn introduces_entry(&self, method: &MethodReference) -> Result<bool, AbiError> {
        Ok(self.method_decl(method)?.overrides.is_none())
    }

    fn class_methods(&self, class: Name) -> Result<Vec<ClassMethodEntry>, AbiError> {
        self.class(class)?
            .methods
            .iter()
            .filter(|m| m.overrides.is_none())
            .map(|m| {
                Ok(ClassMethodEntry {
                    method: m.method.clone(),
                    implementation: m.implementation,
                    visibility: m.visibility,
                    overridden: self.is_overridden(&m.method)?,
                })
            })
            .collect()
    }

    fn method_discriminator(&self, method: &MethodReference) -> Result<u16, AbiError> {
        let base = if method.owner.is_protocol() {
            method.clone()
        } else {
            self.introducing_method(method)?
        };
        Ok(stable_discriminator(&self.mangler().method_descriptor(&base)))
    }

    fn type_context_descriptor(&self, class: Name) -> Result<Name, AbiError> {
        self.class(class)?;
        let symbol =
            self.mangler()
                .class_entity(self.module, class, EntityKind::TypeContextDescriptor);
        Ok(self.interner.intern(&symbol))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
