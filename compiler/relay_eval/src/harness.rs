//! Calling entry points the way compiled callers would.
//!
//! A [`LogicalCall`] describes a call in terms of canonical values. The
//! harness lowers it for the callee's signature: it allocates the error
//! slot and the indirect result destination, spills arguments that travel
//! by address, and builds either the flat native argument list or the
//! async context frame. Afterwards it reads everything back into a
//! [`CallReport`]. Calling a dispatch thunk and calling the implementation
//! directly go through the same lowering, so their reports compare
//! directly.

use std::sync::Arc;

use relay_abi::{
    ArgRole, AsyncContextLayout, FrameValue, LoweredSignature, MetadataService, ValuePassing,
};
use relay_ir::MethodReference;
use relay_thunk::GlobalDefinition;

use crate::errors::{EvalError, EvalResult};
use crate::machine::{from_native, to_native, word_bytes, ArgValue, Machine};
use crate::memory::WORD;

/// Words reserved for a coroutine's resume buffer.
const RESUME_BUFFER_WORDS: usize = 4;

/// A call described by logical values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogicalCall {
    pub receiver: u64,
    pub args: Vec<ArgValue>,
    pub bindings: Vec<u64>,
    /// Self metadata and witness table, for protocol-dispatched callees.
    pub witness: Option<(u64, u64)>,
    /// Words to reserve for an address-only result.
    pub result_words: usize,
}

impl LogicalCall {
    pub fn on(receiver: u64) -> Self {
        Self {
            receiver,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, words: impl Into<Vec<u64>>) -> Self {
        self.args.push(ArgValue::Value(words.into()));
        self
    }

    #[must_use]
    pub fn arg_address(mut self, address: u64) -> Self {
        self.args.push(ArgValue::Address(address));
        self
    }

    #[must_use]
    pub fn binding(mut self, binding: u64) -> Self {
        self.bindings.push(binding);
        self
    }

    #[must_use]
    pub fn with_witness(mut self, metadata: u64, table: u64) -> Self {
        self.witness = Some((metadata, table));
        self
    }

    #[must_use]
    pub fn with_result_words(mut self, words: usize) -> Self {
        self.result_words = words;
        self
    }
}

/// What a call did, observed from the caller's side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallReport {
    /// Canonical result components, or the error word.
    pub result: Result<Vec<u64>, u64>,
    /// Continuation a coroutine handed back.
    pub continuation: Option<u64>,
    pub resume_buffer: Option<u64>,
    pub indirect_return: Option<u64>,
    pub error_slot: Option<u64>,
    /// Context frame of an async call.
    pub frame: Option<u64>,
    /// Addresses of every word the caller spilled an argument into.
    pub spilled: Vec<u64>,
}

impl CallReport {
    fn new(error_slot: Option<u64>, indirect_return: Option<u64>) -> Self {
        Self {
            result: Ok(Vec::new()),
            continuation: None,
            resume_buffer: None,
            indirect_return,
            error_slot,
            frame: None,
            spilled: Vec::new(),
        }
    }

    /// Whether the callee took ownership of every spilled argument word.
    pub fn spills_drained(&self, machine: &Machine) -> bool {
        self.spilled
            .iter()
            .all(|&addr| machine.memory().is_drained(addr))
    }
}

/// Emit `method`'s dispatch thunk if needed and call it.
pub fn call_thunk(
    machine: &mut Machine,
    method: &MethodReference,
    call: &LogicalCall,
) -> EvalResult<CallReport> {
    let module = Arc::clone(machine.module());
    let entry = module.declare_dispatch_thunk(method);
    module.define_dispatch_thunk(method);

    // Async callers size the frame from the advertised record.
    let frame_size = if method.convention().is_async() {
        match module.global(module.async_function_pointer(method)) {
            Some(GlobalDefinition::AsyncFunctionPointer { context_size, .. }) => Some(context_size),
            _ => None,
        }
    } else {
        None
    };
    let callee = machine.address_of(entry.symbol);
    invoke(machine, callee, &entry.signature, frame_size, call)
}

/// Call the implementation behind `symbol` directly.
pub fn call_implementation(
    machine: &mut Machine,
    symbol: &str,
    call: &LogicalCall,
) -> EvalResult<CallReport> {
    let name = machine.module().interner().intern(symbol);
    let signature = machine
        .implementation(name)
        .map(|imp| Arc::clone(&imp.signature))
        .ok_or_else(|| EvalError::UnknownCallee(symbol.to_owned()))?;
    let callee = machine.address_of(name);
    invoke(machine, callee, &signature, None, call)
}

/// Ask `class`'s method lookup function for `method`'s entry in `metadata`.
pub fn call_lookup(
    machine: &mut Machine,
    class: &str,
    metadata: u64,
    method: &MethodReference,
) -> EvalResult<u64> {
    let module = Arc::clone(machine.module());
    let class = module.interner().intern(class);
    let function = module.define_method_lookup_function(class);
    let descriptor = machine.address_of(module.declare_method_descriptor(method));
    let callee = machine.address_of(function.name);
    let results = machine.call(callee, &[metadata, descriptor])?;
    match results.as_slice() {
        [entry] => Ok(*entry),
        _ => Err(EvalError::ArityMismatch {
            what: "lookup function results".to_owned(),
            expected: 1,
            found: results.len(),
        }),
    }
}

/// The same question put straight to the runtime.
pub fn runtime_lookup(
    machine: &mut Machine,
    class: &str,
    metadata: u64,
    method: &MethodReference,
) -> EvalResult<u64> {
    let module = Arc::clone(machine.module());
    let class = module.interner().intern(class);
    let tcd = machine.metadata().type_context_descriptor(class)?;
    let tcd = machine.address_of(tcd);
    let descriptor = machine.address_of(module.declare_method_descriptor(method));
    machine.lookup_class_method(metadata, descriptor, tcd)
}

fn invoke(
    machine: &mut Machine,
    callee: u64,
    signature: &LoweredSignature,
    frame_size: Option<u32>,
    call: &LogicalCall,
) -> EvalResult<CallReport> {
    if call.args.len() != signature.param_passing.len() {
        return Err(EvalError::ArityMismatch {
            what: "logical arguments".to_owned(),
            expected: signature.param_passing.len(),
            found: call.args.len(),
        });
    }
    if call.bindings.len() != signature.binding_count as usize {
        return Err(EvalError::ArityMismatch {
            what: "generic bindings".to_owned(),
            expected: signature.binding_count as usize,
            found: call.bindings.len(),
        });
    }

    let result_words = match &signature.result_passing {
        ValuePassing::Indirect(schema) => schema.canonical().len(),
        ValuePassing::Address => call.result_words,
        ValuePassing::Direct(_) => 0,
    };
    let memory = machine.memory_mut();
    let error_slot = signature.throws.then(|| memory.alloc(word_bytes(1)));
    let indirect_return = signature
        .has_indirect_return()
        .then(|| memory.alloc(word_bytes(result_words)));
    let mut report = CallReport::new(error_slot, indirect_return);

    let values = match &signature.async_layout {
        Some(layout) => invoke_async(machine, callee, signature, layout, frame_size, call, &mut report)?,
        None => invoke_flat(machine, callee, signature, call, &mut report)?,
    };

    if let Some(slot) = error_slot {
        let error = machine.memory().read(slot)?;
        if error != 0 {
            report.result = Err(error);
            return Ok(report);
        }
    }
    report.result = Ok(match indirect_return {
        Some(destination) => machine.memory().read_words(destination, result_words)?,
        None => values,
    });
    Ok(report)
}

fn spill(machine: &mut Machine, words: &[u64], report: &mut CallReport) -> EvalResult<u64> {
    let memory = machine.memory_mut();
    let addr = memory.alloc(word_bytes(words.len()));
    memory.write_words(addr, words)?;
    report
        .spilled
        .extend((0..words.len() as u64).map(|i| addr + WORD * i));
    Ok(addr)
}

fn invoke_flat(
    machine: &mut Machine,
    callee: u64,
    signature: &LoweredSignature,
    call: &LogicalCall,
    report: &mut CallReport,
) -> EvalResult<Vec<u64>> {
    let mut native = Vec::with_capacity(signature.params.len());
    let mut packed: Vec<Option<Vec<u64>>> = vec![None; signature.param_passing.len()];
    let witness = || call.witness.ok_or(EvalError::ArgumentShape(0));

    for param in &signature.params {
        let value = match param.role {
            ArgRole::ResumeBuffer => {
                let buffer = machine.memory_mut().alloc(word_bytes(RESUME_BUFFER_WORDS));
                report.resume_buffer = Some(buffer);
                buffer
            }
            ArgRole::IndirectReturn => report.indirect_return.unwrap_or_default(),
            ArgRole::Param { index, word } => {
                let index = index as usize;
                if packed[index].is_none() {
                    let (ValuePassing::Direct(schema), ArgValue::Value(words)) =
                        (&signature.param_passing[index], &call.args[index])
                    else {
                        return Err(EvalError::ArgumentShape(index));
                    };
                    packed[index] = Some(to_native(schema, words)?);
                }
                packed[index]
                    .as_ref()
                    .and_then(|words| words.get(word as usize))
                    .copied()
                    .ok_or(EvalError::ArgumentShape(index))?
            }
            ArgRole::ParamIndirect { index } => match &call.args[index as usize] {
                ArgValue::Value(words) => spill(machine, words, report)?,
                ArgValue::Address(_) => return Err(EvalError::ArgumentShape(index as usize)),
            },
            ArgRole::ParamAddress { index } => match &call.args[index as usize] {
                ArgValue::Address(addr) => *addr,
                ArgValue::Value(_) => return Err(EvalError::ArgumentShape(index as usize)),
            },
            ArgRole::GenericBinding { index } => call.bindings[index as usize],
            ArgRole::SelfValue => call.receiver,
            ArgRole::ErrorSlot => report.error_slot.unwrap_or_default(),
            ArgRole::SelfMetadata => witness()?.0,
            ArgRole::SelfWitnessTable => witness()?.1,
            ArgRole::Context => return Err(EvalError::ArgumentShape(0)),
        };
        native.push(value);
    }

    let results = machine.call(callee, &native)?;
    if results.len() != signature.results.len() {
        return Err(EvalError::ArityMismatch {
            what: "native results".to_owned(),
            expected: signature.results.len(),
            found: results.len(),
        });
    }
    let mut direct = results.as_slice();
    if signature.convention.is_coroutine() {
        report.continuation = direct.first().copied();
        direct = &direct[1..];
    }
    match &signature.result_passing {
        ValuePassing::Direct(schema) => from_native(schema, direct, 0),
        ValuePassing::Indirect(_) | ValuePassing::Address => Ok(Vec::new()),
    }
}

fn invoke_async(
    machine: &mut Machine,
    callee: u64,
    signature: &LoweredSignature,
    layout: &AsyncContextLayout,
    frame_size: Option<u32>,
    call: &LogicalCall,
    report: &mut CallReport,
) -> EvalResult<Vec<u64>> {
    let frame = machine
        .memory_mut()
        .alloc(frame_size.unwrap_or(layout.size));
    report.frame = Some(frame);
    let at = |offset: u32| frame + u64::from(offset);

    if let (Some(offset), Some(slot)) = (layout.error_slot, report.error_slot) {
        machine.memory_mut().write(at(offset), slot)?;
    }
    if let (Some(offset), Some(destination)) = (layout.indirect_return, report.indirect_return) {
        machine.memory_mut().write(at(offset), destination)?;
    }
    for (index, (field, passing)) in layout.args.iter().zip(&signature.param_passing).enumerate() {
        match (field, passing, &call.args[index]) {
            (FrameValue::Inline { offset, components }, ValuePassing::Direct(_), ArgValue::Value(words))
                if words.len() == components.len() =>
            {
                machine.memory_mut().write_words(at(*offset), words)?;
            }
            (FrameValue::Address { offset }, ValuePassing::Indirect(_), ArgValue::Value(words)) => {
                let addr = spill(machine, words, report)?;
                machine.memory_mut().write(at(*offset), addr)?;
            }
            (FrameValue::Address { offset }, ValuePassing::Address, ArgValue::Address(addr)) => {
                machine.memory_mut().write(at(*offset), *addr)?;
            }
            _ => return Err(EvalError::ArgumentShape(index)),
        }
    }
    machine
        .memory_mut()
        .write_words(at(layout.bindings), &call.bindings)?;
    machine.memory_mut().write(at(layout.local_context), call.receiver)?;
    if let (Some(metadata), Some(table)) = (layout.self_metadata, layout.self_witness_table) {
        let (md, wt) = call.witness.ok_or(EvalError::ArgumentShape(0))?;
        machine.memory_mut().write(at(metadata), md)?;
        machine.memory_mut().write(at(table), wt)?;
    }

    let results = machine.call(callee, &[frame])?;
    if !results.is_empty() {
        return Err(EvalError::ArityMismatch {
            what: "async native results".to_owned(),
            expected: 0,
            found: results.len(),
        });
    }
    match &layout.results {
        Some(FrameValue::Inline { offset, components }) if report.indirect_return.is_none() => {
            machine.memory().read_words(at(*offset), components.len())
        }
        _ => Ok(Vec::new()),
    }
}
