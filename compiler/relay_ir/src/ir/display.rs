//! Textual form of the thunk IR, for tracing and test failure output.
//!
//! ```text
//! fn _relay_geo$Shape$area$pio_d$Tj ordinary (%0: ptr, %1: ptr, %2: ptr) {
//! bb0:
//!   %3 = witness_method %2[1]
//!   %4 = call ordinary %3(%0, %1, %2)
//!   return %4
//! }
//! ```

use std::fmt::{self, Write};

use super::{Instr, Terminator, ThunkFunction, VTableOffset, VarId};
use crate::method::CallingConventionKind;
use crate::StringInterner;

/// Borrowing display adapter returned by [`ThunkFunction::display`].
pub struct FunctionDisplay<'a> {
    func: &'a ThunkFunction,
    interner: &'a StringInterner,
}

impl ThunkFunction {
    pub fn display<'a>(&'a self, interner: &'a StringInterner) -> FunctionDisplay<'a> {
        FunctionDisplay {
            func: self,
            interner,
        }
    }
}

fn convention_str(convention: CallingConventionKind) -> &'static str {
    match convention {
        CallingConventionKind::Ordinary => "ordinary",
        CallingConventionKind::Asynchronous => "async",
        CallingConventionKind::YieldingCoroutine => "yield_once",
    }
}

fn var_list(vars: &[VarId]) -> String {
    let mut out = String::new();
    for (i, v) in vars.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "%{}", v.raw());
    }
    out
}

impl fmt::Display for FunctionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = self.func;
        write!(
            f,
            "fn {} {} (",
            self.interner.lookup(func.name),
            convention_str(func.convention)
        )?;
        for (i, p) in func.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "%{}: {}", p.raw(), func.var_kind(*p))?;
        }
        f.write_str(") {\n")?;
        for block in &func.blocks {
            writeln!(f, "bb{}:", block.id.raw())?;
            for instr in &block.body {
                f.write_str("  ")?;
                self.fmt_instr(f, instr)?;
                f.write_str("\n")?;
            }
            f.write_str("  ")?;
            fmt_terminator(f, &block.terminator)?;
            f.write_str("\n")?;
        }
        f.write_str("}")
    }
}

impl FunctionDisplay<'_> {
    fn fmt_instr(&self, f: &mut fmt::Formatter<'_>, instr: &Instr) -> fmt::Result {
        match instr {
            Instr::Const { dst, value } => write!(f, "%{} = const {value:#x}", dst.raw()),
            Instr::GlobalAddr { dst, symbol } => {
                write!(f, "%{} = global @{}", dst.raw(), self.interner.lookup(*symbol))
            }
            Instr::Load { dst, addr, offset } => {
                write!(f, "%{} = load [%{} + {offset}]", dst.raw(), addr.raw())
            }
            Instr::Store {
                value,
                addr,
                offset,
            } => write!(f, "store %{} -> [%{} + {offset}]", value.raw(), addr.raw()),
            Instr::LoadTake { dsts, addr } => {
                write!(f, "({}) = load_take [%{}]", var_list(dsts), addr.raw())
            }
            Instr::StackAlloc { dst, bytes } => write!(f, "%{} = alloca {bytes}", dst.raw()),
            Instr::MapFromNative { ty, dsts, srcs } => write!(
                f,
                "({}) = from_native t{} ({})",
                var_list(dsts),
                ty.raw(),
                var_list(srcs)
            ),
            Instr::MapToNative { ty, dsts, srcs } => write!(
                f,
                "({}) = to_native t{} ({})",
                var_list(dsts),
                ty.raw(),
                var_list(srcs)
            ),
            Instr::HeapMetadata { dst, object } => {
                write!(f, "%{} = heap_metadata %{}", dst.raw(), object.raw())
            }
            Instr::WitnessMethod { dst, table, index } => {
                write!(f, "%{} = witness_method %{}[{index}]", dst.raw(), table.raw())
            }
            Instr::VTableMethod {
                dst,
                metadata,
                offset,
            } => match offset {
                VTableOffset::Fixed { word } => {
                    write!(f, "%{} = vtable_method %{}[{word}]", dst.raw(), metadata.raw())
                }
                VTableOffset::Resilient { bounds, index } => write!(
                    f,
                    "%{} = vtable_method %{}[@{} + {index}]",
                    dst.raw(),
                    metadata.raw(),
                    self.interner.lookup(*bounds)
                ),
            },
            Instr::Authenticate { dst, value, auth } => write!(
                f,
                "%{} = auth %{} {} {:#06x}",
                dst.raw(),
                value.raw(),
                auth.key.as_str(),
                auth.discriminator
            ),
            Instr::Sign { dst, value, auth } => write!(
                f,
                "%{} = sign %{} {} {:#06x}",
                dst.raw(),
                value.raw(),
                auth.key.as_str(),
                auth.discriminator
            ),
            Instr::CompareEq { dst, lhs, rhs } => {
                write!(f, "%{} = eq %{}, %{}", dst.raw(), lhs.raw(), rhs.raw())
            }
            Instr::AsyncFrameEntry {
                context,
                frame_size,
            } => write!(f, "async_entry %{} size {frame_size}", context.raw()),
            Instr::Call {
                callee,
                convention,
                args,
                results,
            } => write!(
                f,
                "({}) = call {} %{}({})",
                var_list(results),
                convention_str(*convention),
                callee.raw(),
                var_list(args)
            ),
            Instr::CallRuntime { dst, func, args } => write!(
                f,
                "%{} = call_runtime {}({})",
                dst.raw(),
                func.symbol(),
                var_list(args)
            ),
        }
    }
}

fn fmt_terminator(f: &mut fmt::Formatter<'_>, terminator: &Terminator) -> fmt::Result {
    match terminator {
        Terminator::Return { values } if values.is_empty() => f.write_str("return"),
        Terminator::Return { values } => write!(f, "return {}", var_list(values)),
        Terminator::AsyncExit => f.write_str("async_exit"),
        Terminator::Branch {
            cond,
            then_block,
            else_block,
        } => write!(
            f,
            "br %{}, bb{}, bb{}",
            cond.raw(),
            then_block.raw(),
            else_block.raw()
        ),
        Terminator::Jump { target } => write!(f, "jump bb{}", target.raw()),
        Terminator::Unreachable => f.write_str("unreachable"),
    }
}
