//! Thunk IR: the basic-block form every generated function is emitted in.
//!
//! Dispatch thunks and method lookup functions are tiny and never loop,
//! but lookup functions branch once per candidate, so the IR keeps the
//! same block structure as the ARC IR rather than a straight-line list.
//!
//! - **[`ThunkFunction`]**: native parameters, blocks, variable kinds
//! - **[`Block`]**: instructions plus one terminator
//! - **[`Instr`]**: word-level operations, table loads, pointer
//!   authentication and calls
//! - **[`Terminator`]**: return, async exit, branch, jump, unreachable
//!
//! Every variable holds one machine word. Sub-word scalars occupy the low
//! bits of their word.

use crate::method::CallingConventionKind;
use crate::types::{ScalarKind, TypeId};
use crate::Name;

mod display;

pub use display::FunctionDisplay;

// ── ID newtypes ─────────────────────────────────────────────────────

/// Variable ID within a [`ThunkFunction`], allocated sequentially.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct VarId(u32);

impl VarId {
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into `Vec`s).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Basic block ID within a [`ThunkFunction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ── Operands ────────────────────────────────────────────────────────

/// Location of a method's slot in a class virtual table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VTableOffset {
    /// Word index from the start of the class metadata, known statically.
    Fixed { word: u32 },
    /// Entry `index` of the class's own members, whose start (a byte offset
    /// into the metadata) is read from the `bounds` global at run time.
    ///
    /// Used when an ancestor's layout may grow in a later library version.
    Resilient { bounds: Name, index: u32 },
}

/// Pointer-authentication key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PtrAuthKey {
    IA,
    IB,
    DA,
    DB,
}

impl PtrAuthKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            PtrAuthKey::IA => "ia",
            PtrAuthKey::IB => "ib",
            PtrAuthKey::DA => "da",
            PtrAuthKey::DB => "db",
        }
    }
}

/// Key plus per-method discriminator used to sign or authenticate a
/// function pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PointerAuthInfo {
    pub key: PtrAuthKey,
    pub discriminator: u16,
}

/// Runtime entry points generated code may call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeFunction {
    /// `(metadata, method descriptor, type context descriptor) -> implementation`
    ///
    /// Walks the metadata's actual virtual table. Always answers or aborts.
    LookupClassMethod,
}

impl RuntimeFunction {
    pub const fn symbol(self) -> &'static str {
        match self {
            RuntimeFunction::LookupClassMethod => "relay_lookup_class_method",
        }
    }

    pub const fn arity(self) -> usize {
        match self {
            RuntimeFunction::LookupClassMethod => 3,
        }
    }
}

// ── Instructions ────────────────────────────────────────────────────

/// A single instruction.
///
/// Memory offsets are in bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Instr {
    Const {
        dst: VarId,
        value: u64,
    },
    /// Address of a global symbol (function, descriptor, bounds variable).
    GlobalAddr {
        dst: VarId,
        symbol: Name,
    },
    Load {
        dst: VarId,
        addr: VarId,
        offset: u32,
    },
    Store {
        value: VarId,
        addr: VarId,
        offset: u32,
    },
    /// Owning read of `dsts.len()` consecutive words; the source is
    /// logically drained afterwards.
    LoadTake {
        dsts: Vec<VarId>,
        addr: VarId,
    },
    /// Fresh temporary memory, live until the function returns.
    StackAlloc {
        dst: VarId,
        bytes: u32,
    },
    /// Reassemble native words of `ty` into its canonical components.
    MapFromNative {
        ty: TypeId,
        dsts: Vec<VarId>,
        srcs: Vec<VarId>,
    },
    /// Pack canonical components of `ty` into its native words.
    MapToNative {
        ty: TypeId,
        dsts: Vec<VarId>,
        srcs: Vec<VarId>,
    },
    /// Dynamic-type metadata of a heap object.
    HeapMetadata {
        dst: VarId,
        object: VarId,
    },
    /// Function pointer at `index` of a protocol witness table.
    WitnessMethod {
        dst: VarId,
        table: VarId,
        index: u32,
    },
    /// Function pointer in a class virtual table.
    VTableMethod {
        dst: VarId,
        metadata: VarId,
        offset: VTableOffset,
    },
    /// Verify a signed pointer and strip its signature.
    Authenticate {
        dst: VarId,
        value: VarId,
        auth: PointerAuthInfo,
    },
    Sign {
        dst: VarId,
        value: VarId,
        auth: PointerAuthInfo,
    },
    /// `dst = (lhs == rhs) as u64`
    CompareEq {
        dst: VarId,
        lhs: VarId,
        rhs: VarId,
    },
    /// Async prologue: attach the incoming context frame, which must be at
    /// least `frame_size` bytes.
    AsyncFrameEntry {
        context: VarId,
        frame_size: u32,
    },
    /// Call a function value with native arguments.
    Call {
        callee: VarId,
        convention: CallingConventionKind,
        args: Vec<VarId>,
        results: Vec<VarId>,
    },
    CallRuntime {
        dst: VarId,
        func: RuntimeFunction,
        args: Vec<VarId>,
    },
}

impl Instr {
    /// Variables written by this instruction.
    pub fn defined_vars(&self) -> Vec<VarId> {
        match self {
            Instr::Const { dst, .. }
            | Instr::GlobalAddr { dst, .. }
            | Instr::Load { dst, .. }
            | Instr::StackAlloc { dst, .. }
            | Instr::HeapMetadata { dst, .. }
            | Instr::WitnessMethod { dst, .. }
            | Instr::VTableMethod { dst, .. }
            | Instr::Authenticate { dst, .. }
            | Instr::Sign { dst, .. }
            | Instr::CompareEq { dst, .. }
            | Instr::CallRuntime { dst, .. } => vec![*dst],

            Instr::LoadTake { dsts, .. }
            | Instr::MapFromNative { dsts, .. }
            | Instr::MapToNative { dsts, .. } => dsts.clone(),

            Instr::Call { results, .. } => results.clone(),

            Instr::Store { .. } | Instr::AsyncFrameEntry { .. } => vec![],
        }
    }

    /// Variables read by this instruction.
    pub fn used_vars(&self) -> Vec<VarId> {
        match self {
            Instr::Const { .. } | Instr::GlobalAddr { .. } | Instr::StackAlloc { .. } => vec![],

            Instr::Load { addr, .. } | Instr::LoadTake { addr, .. } => vec![*addr],
            Instr::Store { value, addr, .. } => vec![*value, *addr],

            Instr::MapFromNative { srcs, .. } | Instr::MapToNative { srcs, .. } => srcs.clone(),

            Instr::HeapMetadata { object, .. } => vec![*object],
            Instr::WitnessMethod { table, .. } => vec![*table],
            Instr::VTableMethod { metadata, .. } => vec![*metadata],
            Instr::Authenticate { value, .. } | Instr::Sign { value, .. } => vec![*value],
            Instr::CompareEq { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instr::AsyncFrameEntry { context, .. } => vec![*context],

            Instr::Call { callee, args, .. } => {
                let mut vars = Vec::with_capacity(1 + args.len());
                vars.push(*callee);
                vars.extend_from_slice(args);
                vars
            }
            Instr::CallRuntime { args, .. } => args.clone(),
        }
    }
}

// ── Terminators ─────────────────────────────────────────────────────

/// How control leaves a block.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Terminator {
    /// Return native result words.
    Return { values: Vec<VarId> },
    /// Leave through the async mechanism; results were already published
    /// into the caller's context frame.
    AsyncExit,
    /// Conditional branch on a nonzero word.
    Branch {
        cond: VarId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Jump { target: BlockId },
    Unreachable,
}

impl Terminator {
    pub fn used_vars(&self) -> Vec<VarId> {
        match self {
            Terminator::Return { values } => values.clone(),
            Terminator::Branch { cond, .. } => vec![*cond],
            Terminator::AsyncExit | Terminator::Jump { .. } | Terminator::Unreachable => vec![],
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Jump { target } => vec![*target],
            Terminator::Return { .. } | Terminator::AsyncExit | Terminator::Unreachable => {
                vec![]
            }
        }
    }
}

// ── Blocks and functions ────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    pub id: BlockId,
    pub body: Vec<Instr>,
    pub terminator: Terminator,
}

/// A generated function.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThunkFunction {
    /// Mangled symbol.
    pub name: Name,
    pub convention: CallingConventionKind,
    /// Native parameters in order.
    pub params: Vec<VarId>,
    /// `blocks[entry.index()]` is the entry block.
    pub blocks: Vec<Block>,
    pub entry: BlockId,
    /// Scalar kind of each variable, indexed by [`VarId::index`].
    pub var_kinds: Vec<ScalarKind>,
}

impl ThunkFunction {
    #[inline]
    pub fn var_kind(&self, var: VarId) -> ScalarKind {
        debug_assert!(
            var.index() < self.var_kinds.len(),
            "VarId {} out of bounds (have {} vars)",
            var.raw(),
            self.var_kinds.len(),
        );
        self.var_kinds[var.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// All instructions in block order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instr> {
        self.blocks.iter().flat_map(|b| b.body.iter())
    }

    /// Number of `Call` instructions across all blocks.
    pub fn call_count(&self) -> usize {
        self.instructions()
            .filter(|i| matches!(i, Instr::Call { .. }))
            .count()
    }
}
