//! Interpreter for thunk IR.
//!
//! Each function gets a flat register file indexed by variable. Blocks run
//! straight through; terminators pick the next block or leave.

use relay_abi::VTABLE_HEADER_WORDS;
use relay_ir::{Instr, RuntimeFunction, Terminator, ThunkFunction, VTableOffset, VarId};

use crate::errors::{EvalError, EvalResult};
use crate::machine::{from_native, to_native, Machine};
use crate::memory::WORD;
use crate::ptrauth;

struct Registers(Vec<u64>);

impl Registers {
    fn get(&self, var: VarId) -> u64 {
        self.0[var.index()]
    }

    fn all(&self, vars: &[VarId]) -> Vec<u64> {
        vars.iter().map(|&v| self.get(v)).collect()
    }

    fn set(&mut self, var: VarId, value: u64) {
        self.0[var.index()] = value;
    }

    fn set_all(&mut self, vars: &[VarId], values: &[u64], what: &str) -> EvalResult<()> {
        if vars.len() != values.len() {
            return Err(EvalError::ArityMismatch {
                what: what.to_owned(),
                expected: vars.len(),
                found: values.len(),
            });
        }
        for (&var, &value) in vars.iter().zip(values) {
            self.set(var, value);
        }
        Ok(())
    }
}

impl Machine {
    /// Run `function` on native arguments and return its native results.
    pub(crate) fn run(&mut self, function: &ThunkFunction, args: &[u64]) -> EvalResult<Vec<u64>> {
        let name = self.module.interner().lookup(function.name);
        if args.len() != function.params.len() {
            return Err(EvalError::ArityMismatch {
                what: name.to_owned(),
                expected: function.params.len(),
                found: args.len(),
            });
        }
        tracing::trace!(function = name, args = args.len(), "interpreting");

        let mut regs = Registers(vec![0; function.var_kinds.len()]);
        regs.set_all(&function.params, args, name)?;

        let mut current = function.entry;
        loop {
            let block = function.block(current);
            for instr in &block.body {
                self.step(&mut regs, instr)?;
            }
            match &block.terminator {
                Terminator::Return { values } => return Ok(regs.all(values)),
                Terminator::AsyncExit => return Ok(Vec::new()),
                Terminator::Branch {
                    cond,
                    then_block,
                    else_block,
                } => {
                    current = if regs.get(*cond) != 0 {
                        *then_block
                    } else {
                        *else_block
                    };
                }
                Terminator::Jump { target } => current = *target,
                Terminator::Unreachable => return Err(EvalError::Unreachable(name.to_owned())),
            }
        }
    }

    fn step(&mut self, regs: &mut Registers, instr: &Instr) -> EvalResult<()> {
        match instr {
            Instr::Const { dst, value } => regs.set(*dst, *value),
            Instr::GlobalAddr { dst, symbol } => {
                let addr = self.address_of(*symbol);
                regs.set(*dst, addr);
            }
            Instr::Load { dst, addr, offset } => {
                let value = self.memory.read(regs.get(*addr) + u64::from(*offset))?;
                regs.set(*dst, value);
            }
            Instr::Store {
                value,
                addr,
                offset,
            } => {
                self.memory
                    .write(regs.get(*addr) + u64::from(*offset), regs.get(*value))?;
            }
            Instr::LoadTake { dsts, addr } => {
                let values = self.memory.take_words(regs.get(*addr), dsts.len())?;
                regs.set_all(dsts, &values, "load_take")?;
            }
            Instr::StackAlloc { dst, bytes } => {
                let addr = self.memory.alloc(*bytes);
                regs.set(*dst, addr);
            }
            Instr::MapFromNative { ty, dsts, srcs } => {
                let schema = self.module.layout().native_schema(*ty)?;
                let values = from_native(&schema, &regs.all(srcs), 0)?;
                regs.set_all(dsts, &values, "map_from_native")?;
            }
            Instr::MapToNative { ty, dsts, srcs } => {
                let schema = self.module.layout().native_schema(*ty)?;
                let values = to_native(&schema, &regs.all(srcs))?;
                regs.set_all(dsts, &values, "map_to_native")?;
            }
            Instr::HeapMetadata { dst, object } => {
                let metadata = self.memory.read(regs.get(*object))?;
                regs.set(*dst, metadata);
            }
            Instr::WitnessMethod { dst, table, index } => {
                let entry = self.memory.read(regs.get(*table) + WORD * u64::from(*index))?;
                regs.set(*dst, entry);
            }
            Instr::VTableMethod {
                dst,
                metadata,
                offset,
            } => {
                let slot = self.vtable_slot(regs.get(*metadata), *offset)?;
                let entry = self.memory.read(slot)?;
                regs.set(*dst, entry);
            }
            Instr::Authenticate { dst, value, auth } => {
                let stripped = ptrauth::authenticate(regs.get(*value), *auth)?;
                regs.set(*dst, stripped);
            }
            Instr::Sign { dst, value, auth } => regs.set(*dst, ptrauth::sign(regs.get(*value), *auth)),
            Instr::CompareEq { dst, lhs, rhs } => {
                regs.set(*dst, u64::from(regs.get(*lhs) == regs.get(*rhs)));
            }
            Instr::AsyncFrameEntry {
                context,
                frame_size,
            } => {
                let frame = regs.get(*context);
                let actual = self
                    .memory
                    .region_size(frame)
                    .ok_or(EvalError::Unmapped(frame))?;
                if actual < *frame_size {
                    return Err(EvalError::FrameTooSmall {
                        frame,
                        actual,
                        required: *frame_size,
                    });
                }
            }
            Instr::Call {
                callee,
                convention,
                args,
                results,
            } => {
                if convention.is_async() {
                    self.suspensions += 1;
                }
                let values = self.call(regs.get(*callee), &regs.all(args))?;
                regs.set_all(results, &values, "call results")?;
            }
            Instr::CallRuntime { dst, func, args } => {
                let args = regs.all(args);
                if args.len() != func.arity() {
                    return Err(EvalError::ArityMismatch {
                        what: func.symbol().to_owned(),
                        expected: func.arity(),
                        found: args.len(),
                    });
                }
                let value = match func {
                    RuntimeFunction::LookupClassMethod => {
                        self.lookup_class_method(args[0], args[1], args[2])?
                    }
                };
                regs.set(*dst, value);
            }
        }
        Ok(())
    }

    /// Address of the table slot `offset` names in `metadata`.
    pub(crate) fn vtable_slot(&mut self, metadata: u64, offset: VTableOffset) -> EvalResult<u64> {
        match offset {
            VTableOffset::Fixed { word } => Ok(metadata + WORD * u64::from(word)),
            VTableOffset::Resilient { bounds, index } => {
                let bounds = self.address_of(bounds);
                let start = self.memory.read(bounds)?;
                if start < WORD * u64::from(VTABLE_HEADER_WORDS) {
                    return Err(EvalError::Unmapped(bounds));
                }
                Ok(metadata + start + WORD * u64::from(index))
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
