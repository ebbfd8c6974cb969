//! The reference machine: class metadata, witness tables and native
//! implementations laid out in simulated memory.
//!
//! Every symbol gets a one-word region the first time anything asks for
//! its address, so a function pointer is just that address and calling
//! one resolves it back to a symbol. Implementations are Rust closures
//! over *logical* values; the machine decodes the native arguments of
//! their lowered signature before calling them and encodes the answer
//! afterwards, which makes them a faithful stand-in for a compiled body.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use relay_abi::{
    lower_signature, ArgRole, AsyncContextLayout, FrameValue, LoweredSignature, MetadataService,
    ModuleMetadata, NativeValueSchema, ValuePassing, VTABLE_HEADER_WORDS, WITNESS_HEADER_WORDS,
    WORD_SIZE,
};
use relay_ir::{MethodReference, Name, PointerAuthInfo};
use relay_thunk::ThunkModule;

use crate::errors::{EvalError, EvalResult};
use crate::memory::{Memory, WORD};
use crate::ptrauth;

/// A logical argument as an implementation sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgValue {
    /// Canonical components of a loadable value.
    Value(Vec<u64>),
    /// Address of an address-only value.
    Address(u64),
}

impl ArgValue {
    /// Canonical components, or the address as a single word.
    pub fn words(&self) -> &[u64] {
        match self {
            ArgValue::Value(words) => words,
            ArgValue::Address(addr) => std::slice::from_ref(addr),
        }
    }

    /// First component; zero for an empty value.
    pub fn scalar(&self) -> u64 {
        self.words().first().copied().unwrap_or(0)
    }
}

/// Decoded arguments handed to a native implementation.
pub struct Invocation<'a> {
    pub receiver: u64,
    pub args: Vec<ArgValue>,
    pub bindings: Vec<u64>,
    /// Self metadata and witness table of a protocol-dispatched call.
    pub witness: Option<(u64, u64)>,
    pub memory: &'a Memory,
}

/// Body of a native implementation.
///
/// `Ok` carries the canonical components of the result; `Err` carries the
/// error word to store in the caller's error slot.
pub type NativeBody = dyn Fn(&Invocation<'_>) -> Result<Vec<u64>, u64> + Send + Sync;

pub(crate) struct Implementation {
    pub symbol: Name,
    pub signature: Arc<LoweredSignature>,
    body: Box<NativeBody>,
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementation")
            .field("symbol", &self.symbol)
            .field("convention", &self.signature.convention)
            .finish_non_exhaustive()
    }
}

/// Decoded native arguments, convention aside.
struct Incoming {
    receiver: u64,
    args: Vec<ArgValue>,
    bindings: Vec<u64>,
    witness: Option<(u64, u64)>,
    error_slot: Option<u64>,
    indirect_return: Option<u64>,
}

pub struct Machine {
    pub(crate) module: Arc<ThunkModule>,
    pub(crate) metadata: Arc<ModuleMetadata>,
    pub(crate) memory: Memory,
    symbols: FxHashMap<Name, u64>,
    names: FxHashMap<u64, Name>,
    /// Implementation symbol to the method whose signature it is called with.
    signatures: FxHashMap<Name, MethodReference>,
    implementations: FxHashMap<Name, Arc<Implementation>>,
    class_metadata: FxHashMap<Name, u64>,
    witness_tables: FxHashMap<(Name, Name), u64>,
    pub(crate) suspensions: usize,
}

impl Machine {
    /// Lay out metadata for every class and conformance in `metadata`.
    ///
    /// `metadata` must be the service `module` was built over.
    pub fn new(module: Arc<ThunkModule>, metadata: Arc<ModuleMetadata>) -> EvalResult<Self> {
        let signatures = metadata.implementations()?.into_iter().collect();
        let mut machine = Self {
            module,
            metadata: Arc::clone(&metadata),
            memory: Memory::new(),
            symbols: FxHashMap::default(),
            names: FxHashMap::default(),
            signatures,
            implementations: FxHashMap::default(),
            class_metadata: FxHashMap::default(),
            witness_tables: FxHashMap::default(),
            suspensions: 0,
        };
        for class in metadata.classes() {
            machine.instantiate_class(class.name)?;
        }
        for conformance in metadata.conformances() {
            let base = machine
                .memory
                .alloc(word_bytes(WITNESS_HEADER_WORDS as usize + conformance.witnesses.len()));
            let descriptor = machine.module.interner().intern(&format!(
                "{}: {}",
                machine.module.interner().lookup(conformance.ty),
                machine.module.interner().lookup(conformance.protocol)
            ));
            let descriptor = machine.address_of(descriptor);
            machine.memory.write(base, descriptor)?;
            for (i, &witness) in (0u64..).zip(&conformance.witnesses) {
                let address = machine.address_of(witness);
                machine
                    .memory
                    .write(base + WORD * (u64::from(WITNESS_HEADER_WORDS) + i), address)?;
            }
            machine
                .witness_tables
                .insert((conformance.ty, conformance.protocol), base);
        }
        tracing::debug!(
            classes = machine.class_metadata.len(),
            witness_tables = machine.witness_tables.len(),
            "machine metadata laid out"
        );
        Ok(machine)
    }

    fn instantiate_class(&mut self, class: Name) -> EvalResult<u64> {
        if let Some(&base) = self.class_metadata.get(&class) {
            return Ok(base);
        }
        let metadata = Arc::clone(&self.metadata);
        let superclass = match metadata.class(class)?.superclass {
            Some(parent) => self.instantiate_class(parent)?,
            None => 0,
        };
        let table = metadata.vtable(class)?;
        let base = self.memory.alloc(word_bytes(table.metadata_words() as usize));

        let tcd = self.address_of(metadata.type_context_descriptor(class)?);
        self.memory.write(base, tcd)?;
        self.memory.write(base + WORD, superclass)?;
        for (i, entry) in (0u64..).zip(&table.entries) {
            let implementation = self.address_of(entry.implementation);
            let value = match self.module.options().pointer_auth {
                Some(schema) => ptrauth::sign(
                    implementation,
                    schema.info(metadata.method_discriminator(&entry.method)?),
                ),
                None => implementation,
            };
            self.memory
                .write(base + WORD * (u64::from(VTABLE_HEADER_WORDS) + i), value)?;
        }

        let bounds = self.address_of(metadata.vtable_bounds(class));
        self.memory.write(bounds, u64::from(table.own_start) * WORD)?;

        tracing::trace!(
            class = self.module.interner().lookup(class),
            base,
            entries = table.entries.len(),
            "class metadata laid out"
        );
        self.class_metadata.insert(class, base);
        Ok(base)
    }

    // ── Symbols ─────────────────────────────────────────────────────

    /// Address of `symbol`, allocating its region on first use.
    pub fn address_of(&mut self, symbol: Name) -> u64 {
        if let Some(&addr) = self.symbols.get(&symbol) {
            return addr;
        }
        let addr = self.memory.alloc(word_bytes(1));
        self.symbols.insert(symbol, addr);
        self.names.insert(addr, symbol);
        addr
    }

    /// Address of the symbol spelled `symbol`.
    pub fn address_of_symbol(&mut self, symbol: &str) -> u64 {
        let name = self.module.interner().intern(symbol);
        self.address_of(name)
    }

    /// Symbol at `addr`, ignoring any signature bits.
    pub fn symbol_at(&self, addr: u64) -> Option<&'static str> {
        self.names
            .get(&ptrauth::strip(addr))
            .map(|&name| self.module.interner().lookup(name))
    }

    pub(crate) fn name_at(&self, addr: u64) -> Option<Name> {
        self.names.get(&addr).copied()
    }

    // ── Objects and tables ──────────────────────────────────────────

    pub fn class_metadata(&self, class: &str) -> Option<u64> {
        let name = self.module.interner().intern(class);
        self.class_metadata.get(&name).copied()
    }

    pub fn witness_table(&self, ty: &str, protocol: &str) -> Option<u64> {
        let interner = self.module.interner();
        self.witness_tables
            .get(&(interner.intern(ty), interner.intern(protocol)))
            .copied()
    }

    /// Allocate an instance of `class` and return its address.
    pub fn new_object(&mut self, class: &str) -> EvalResult<u64> {
        let name = self.module.interner().intern(class);
        let metadata = self.instantiate_class(name)?;
        let object = self.memory.alloc(word_bytes(2));
        self.memory.write(object, metadata)?;
        Ok(object)
    }

    /// Signing info of `method`'s table entries, when signing is enabled.
    pub fn method_auth(&self, method: &MethodReference) -> EvalResult<Option<PointerAuthInfo>> {
        match self.module.options().pointer_auth {
            Some(schema) => Ok(Some(
                schema.info(self.metadata.method_discriminator(method)?),
            )),
            None => Ok(None),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn module(&self) -> &Arc<ThunkModule> {
        &self.module
    }

    pub fn metadata(&self) -> &Arc<ModuleMetadata> {
        &self.metadata
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Async calls that suspended the caller so far.
    pub fn suspensions(&self) -> usize {
        self.suspensions
    }

    pub(crate) fn implementation(&self, symbol: Name) -> Option<&Arc<Implementation>> {
        self.implementations.get(&symbol)
    }

    // ── Native implementations ──────────────────────────────────────

    /// Install `body` as the implementation behind `symbol`.
    ///
    /// `symbol` must name a class method implementation or a witness; its
    /// native signature is the one callers use for the method it
    /// implements.
    pub fn implement<F>(&mut self, symbol: &str, body: F) -> EvalResult<()>
    where
        F: Fn(&Invocation<'_>) -> Result<Vec<u64>, u64> + Send + Sync + 'static,
    {
        let name = self.module.interner().intern(symbol);
        let method = self
            .signatures
            .get(&name)
            .ok_or_else(|| EvalError::UnknownCallee(symbol.to_owned()))?;
        let signature = Arc::new(lower_signature(method, self.module.layout())?);
        self.address_of(name);
        self.implementations.insert(
            name,
            Arc::new(Implementation {
                symbol: name,
                signature,
                body: Box::new(body),
            }),
        );
        Ok(())
    }

    /// Call the function at `callee` with native arguments.
    pub fn call(&mut self, callee: u64, args: &[u64]) -> EvalResult<Vec<u64>> {
        if ptrauth::is_signed(callee) {
            return Err(EvalError::AuthFailure {
                value: callee,
                expected: 0,
            });
        }
        let name = self
            .name_at(callee)
            .ok_or_else(|| EvalError::UnknownCallee(format!("{callee:#x}")))?;
        if let Some(implementation) = self.implementations.get(&name).cloned() {
            return self.invoke_native(&implementation, args);
        }
        if let Some(function) = self.module.function(name) {
            return self.run(&function, args);
        }
        Err(EvalError::UnknownCallee(
            self.module.interner().lookup(name).to_owned(),
        ))
    }

    fn invoke_native(
        &mut self,
        implementation: &Implementation,
        args: &[u64],
    ) -> EvalResult<Vec<u64>> {
        let signature = &implementation.signature;
        let symbol = self.module.interner().lookup(implementation.symbol);
        if args.len() != signature.params.len() {
            return Err(EvalError::ArityMismatch {
                what: symbol.to_owned(),
                expected: signature.params.len(),
                found: args.len(),
            });
        }
        tracing::trace!(symbol, args = args.len(), "native call");
        match &signature.async_layout {
            Some(layout) => self.invoke_native_async(implementation, layout, args[0]),
            None => self.invoke_native_flat(implementation, args),
        }
    }

    fn invoke_native_flat(
        &mut self,
        implementation: &Implementation,
        args: &[u64],
    ) -> EvalResult<Vec<u64>> {
        let signature = &implementation.signature;
        let mut incoming = Incoming {
            receiver: 0,
            args: vec![ArgValue::Value(Vec::new()); signature.param_passing.len()],
            bindings: Vec::new(),
            witness: None,
            error_slot: None,
            indirect_return: None,
        };
        let mut resume_buffer = None;
        let mut self_metadata = 0;
        let mut native: Vec<Vec<u64>> = vec![Vec::new(); signature.param_passing.len()];

        for (param, &value) in signature.params.iter().zip(args) {
            match param.role {
                ArgRole::ResumeBuffer => resume_buffer = Some(value),
                ArgRole::IndirectReturn => incoming.indirect_return = Some(value),
                ArgRole::Param { index, .. } => native[index as usize].push(value),
                ArgRole::ParamIndirect { index } => {
                    let schema = indirect_schema(signature, index as usize)?;
                    incoming.args[index as usize] =
                        ArgValue::Value(self.memory.take_words(value, schema.canonical().len())?);
                }
                ArgRole::ParamAddress { index } => {
                    incoming.args[index as usize] = ArgValue::Address(value);
                }
                ArgRole::GenericBinding { .. } => incoming.bindings.push(value),
                ArgRole::SelfValue => incoming.receiver = value,
                ArgRole::ErrorSlot => incoming.error_slot = Some(value),
                ArgRole::SelfMetadata => self_metadata = value,
                ArgRole::SelfWitnessTable => incoming.witness = Some((self_metadata, value)),
                ArgRole::Context => return Err(EvalError::ArgumentShape(0)),
            }
        }
        for (index, passing) in signature.param_passing.iter().enumerate() {
            if let ValuePassing::Direct(schema) = passing {
                incoming.args[index] = ArgValue::Value(from_native(schema, &native[index], index)?);
            }
        }

        let mut results = Vec::with_capacity(signature.results.len());
        if let Some(buffer) = resume_buffer {
            results.push(buffer);
        }
        match self.run_body(implementation, incoming)? {
            Answer::Stored => {}
            Answer::Failed => results.resize(signature.results.len(), 0),
            Answer::Direct(words) => match &signature.result_passing {
                ValuePassing::Direct(schema) => results.extend(to_native(schema, &words)?),
                ValuePassing::Indirect(_) | ValuePassing::Address => {}
            },
        }
        if results.len() != signature.results.len() {
            return Err(EvalError::ArityMismatch {
                what: format!("results of {}", self.module.interner().lookup(implementation.symbol)),
                expected: signature.results.len(),
                found: results.len(),
            });
        }
        Ok(results)
    }

    fn invoke_native_async(
        &mut self,
        implementation: &Implementation,
        layout: &AsyncContextLayout,
        frame: u64,
    ) -> EvalResult<Vec<u64>> {
        let signature = &implementation.signature;
        let actual = self.memory.region_size(frame).ok_or(EvalError::Unmapped(frame))?;
        if actual < layout.size {
            return Err(EvalError::FrameTooSmall {
                frame,
                actual,
                required: layout.size,
            });
        }
        let at = |offset: u32| frame + u64::from(offset);

        let witness = match (layout.self_metadata, layout.self_witness_table) {
            (Some(metadata), Some(table)) => Some((
                self.memory.read(at(metadata))?,
                self.memory.read(at(table))?,
            )),
            _ => None,
        };
        let mut incoming = Incoming {
            receiver: self.memory.read(at(layout.local_context))?,
            args: Vec::with_capacity(layout.args.len()),
            bindings: self
                .memory
                .read_words(at(layout.bindings), layout.binding_count as usize)?,
            witness,
            error_slot: layout.error_slot.map(|o| self.memory.read(at(o))).transpose()?,
            indirect_return: layout
                .indirect_return
                .map(|o| self.memory.read(at(o)))
                .transpose()?,
        };
        for (index, (field, passing)) in layout.args.iter().zip(&signature.param_passing).enumerate()
        {
            let value = match (field, passing) {
                (FrameValue::Inline { offset, components }, ValuePassing::Direct(_)) => {
                    ArgValue::Value(self.memory.read_words(at(*offset), components.len())?)
                }
                (FrameValue::Address { offset }, ValuePassing::Indirect(schema)) => {
                    let addr = self.memory.read(at(*offset))?;
                    ArgValue::Value(self.memory.take_words(addr, schema.canonical().len())?)
                }
                (FrameValue::Address { offset }, ValuePassing::Address) => {
                    ArgValue::Address(self.memory.read(at(*offset))?)
                }
                _ => return Err(EvalError::ArgumentShape(index)),
            };
            incoming.args.push(value);
        }

        if let Answer::Direct(words) = self.run_body(implementation, incoming)? {
            if let Some(FrameValue::Inline { offset, components }) = &layout.results {
                if words.len() != components.len() {
                    return Err(EvalError::ArityMismatch {
                        what: "async results".to_owned(),
                        expected: components.len(),
                        found: words.len(),
                    });
                }
                self.memory.write_words(at(*offset), &words)?;
            }
        }
        Ok(Vec::new())
    }

    /// Run `implementation`, storing whatever it answers through memory.
    fn run_body(&mut self, implementation: &Implementation, incoming: Incoming) -> EvalResult<Answer> {
        let Incoming {
            receiver,
            args,
            bindings,
            witness,
            error_slot,
            indirect_return,
        } = incoming;
        let outcome = (implementation.body)(&Invocation {
            receiver,
            args,
            bindings,
            witness,
            memory: &self.memory,
        });
        match outcome {
            Ok(words) => match indirect_return {
                Some(destination) => {
                    self.memory.write_words(destination, &words)?;
                    Ok(Answer::Stored)
                }
                None => Ok(Answer::Direct(words)),
            },
            Err(error) => {
                let Some(slot) = error_slot else {
                    return Err(EvalError::UnhandledError(
                        self.module.interner().lookup(implementation.symbol).to_owned(),
                    ));
                };
                self.memory.write(slot, error)?;
                Ok(Answer::Failed)
            }
        }
    }
}

/// Where an implementation's answer went.
enum Answer {
    /// Written to the indirect return destination.
    Stored,
    /// Written to the error slot.
    Failed,
    /// Canonical words still to be encoded as native results.
    Direct(Vec<u64>),
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("symbols", &self.symbols.len())
            .field("implementations", &self.implementations.len())
            .field("classes", &self.class_metadata.len())
            .field("suspensions", &self.suspensions)
            .finish_non_exhaustive()
    }
}

pub(crate) fn word_bytes(words: usize) -> u32 {
    #[expect(clippy::cast_possible_truncation, reason = "regions are a few words")]
    let bytes = words as u32 * WORD_SIZE;
    bytes
}

fn indirect_schema(signature: &LoweredSignature, index: usize) -> EvalResult<&NativeValueSchema> {
    match signature.param_passing.get(index) {
        Some(ValuePassing::Indirect(schema)) => Ok(schema),
        _ => Err(EvalError::ArgumentShape(index)),
    }
}

/// Checked [`NativeValueSchema::map_from_native`].
pub(crate) fn from_native(
    schema: &NativeValueSchema,
    native: &[u64],
    index: usize,
) -> EvalResult<Vec<u64>> {
    if schema.requires_indirect() || native.len() != schema.native_kinds().len() {
        return Err(EvalError::ArgumentShape(index));
    }
    Ok(schema.map_from_native(native).to_vec())
}

/// Checked [`NativeValueSchema::map_to_native`].
pub(crate) fn to_native(schema: &NativeValueSchema, canonical: &[u64]) -> EvalResult<Vec<u64>> {
    if schema.requires_indirect() || canonical.len() != schema.canonical().len() {
        return Err(EvalError::ArityMismatch {
            what: "canonical components".to_owned(),
            expected: schema.canonical().len(),
            found: canonical.len(),
        });
    }
    Ok(schema.map_to_native(canonical).to_vec())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
