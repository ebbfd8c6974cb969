//! Positioned builder for [`ThunkFunction`]s.
//!
//! Follows the "position at a block, emit instructions, terminate" pattern.
//! Each `emit_*` method allocates its destination variables and appends to
//! the current block.

use smallvec::SmallVec;

use crate::ir::{
    Block, BlockId, Instr, PointerAuthInfo, RuntimeFunction, Terminator, ThunkFunction,
    VTableOffset, VarId,
};
use crate::method::CallingConventionKind;
use crate::types::{ScalarKind, TypeId};
use crate::Name;

/// In-progress basic block.
struct BlockBuilder {
    id: BlockId,
    body: Vec<Instr>,
    terminator: Option<Terminator>,
}

impl BlockBuilder {
    fn new(id: BlockId) -> Self {
        Self {
            id,
            body: Vec::new(),
            terminator: None,
        }
    }
}

/// Builder for an in-progress thunk function.
///
/// Consumed by [`finish`](IrBuilder::finish).
pub struct IrBuilder {
    name: Name,
    convention: CallingConventionKind,
    params: Vec<VarId>,
    blocks: Vec<BlockBuilder>,
    current_block: BlockId,
    var_kinds: Vec<ScalarKind>,
}

impl IrBuilder {
    /// Create a builder with an entry block already allocated.
    pub fn new(name: Name, convention: CallingConventionKind) -> Self {
        Self {
            name,
            convention,
            params: Vec::new(),
            blocks: vec![BlockBuilder::new(BlockId::new(0))],
            current_block: BlockId::new(0),
            var_kinds: Vec::new(),
        }
    }

    // Block management

    #[expect(
        clippy::cast_possible_truncation,
        reason = "block indices never exceed u32"
    )]
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BlockBuilder::new(id));
        id
    }

    pub fn position_at(&mut self, block: BlockId) {
        debug_assert!(
            block.index() < self.blocks.len(),
            "BlockId {} out of bounds (have {} blocks)",
            block.raw(),
            self.blocks.len(),
        );
        self.current_block = block;
    }

    #[inline]
    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.blocks[self.current_block.index()].terminator.is_some()
    }

    pub fn name(&self) -> Name {
        self.name
    }

    pub fn convention(&self) -> CallingConventionKind {
        self.convention
    }

    // Variable allocation

    pub fn fresh_var(&mut self, kind: ScalarKind) -> VarId {
        let id = u32::try_from(self.var_kinds.len())
            .unwrap_or_else(|_| panic!("variable count exceeds u32::MAX"));
        self.var_kinds.push(kind);
        VarId::new(id)
    }

    /// Append a native parameter.
    pub fn add_param(&mut self, kind: ScalarKind) -> VarId {
        let var = self.fresh_var(kind);
        self.params.push(var);
        var
    }

    fn fresh_vars(&mut self, kinds: &[ScalarKind]) -> Vec<VarId> {
        kinds.iter().map(|&k| self.fresh_var(k)).collect()
    }

    fn push(&mut self, instr: Instr) {
        let block = &mut self.blocks[self.current_block.index()];
        debug_assert!(
            block.terminator.is_none(),
            "emitting into terminated block {}",
            self.current_block.raw()
        );
        block.body.push(instr);
    }

    // Instruction emission

    pub fn emit_const(&mut self, kind: ScalarKind, value: u64) -> VarId {
        let dst = self.fresh_var(kind);
        self.push(Instr::Const { dst, value });
        dst
    }

    pub fn emit_global_addr(&mut self, symbol: Name) -> VarId {
        let dst = self.fresh_var(ScalarKind::Ptr);
        self.push(Instr::GlobalAddr { dst, symbol });
        dst
    }

    pub fn emit_load(&mut self, kind: ScalarKind, addr: VarId, offset: u32) -> VarId {
        let dst = self.fresh_var(kind);
        self.push(Instr::Load { dst, addr, offset });
        dst
    }

    pub fn emit_store(&mut self, value: VarId, addr: VarId, offset: u32) {
        self.push(Instr::Store {
            value,
            addr,
            offset,
        });
    }

    pub fn emit_load_take(&mut self, kinds: &[ScalarKind], addr: VarId) -> Vec<VarId> {
        let dsts = self.fresh_vars(kinds);
        self.push(Instr::LoadTake {
            dsts: dsts.clone(),
            addr,
        });
        dsts
    }

    pub fn emit_stack_alloc(&mut self, bytes: u32) -> VarId {
        let dst = self.fresh_var(ScalarKind::Ptr);
        self.push(Instr::StackAlloc { dst, bytes });
        dst
    }

    /// Native words of `ty` to its canonical components of `kinds`.
    pub fn emit_map_from_native(
        &mut self,
        ty: TypeId,
        kinds: &[ScalarKind],
        srcs: &[VarId],
    ) -> SmallVec<[VarId; 4]> {
        let dsts = self.fresh_vars(kinds);
        self.push(Instr::MapFromNative {
            ty,
            dsts: dsts.clone(),
            srcs: srcs.to_vec(),
        });
        SmallVec::from_vec(dsts)
    }

    /// Canonical components of `ty` to its native words of `kinds`.
    pub fn emit_map_to_native(
        &mut self,
        ty: TypeId,
        kinds: &[ScalarKind],
        srcs: &[VarId],
    ) -> SmallVec<[VarId; 4]> {
        let dsts = self.fresh_vars(kinds);
        self.push(Instr::MapToNative {
            ty,
            dsts: dsts.clone(),
            srcs: srcs.to_vec(),
        });
        SmallVec::from_vec(dsts)
    }

    pub fn emit_heap_metadata(&mut self, object: VarId) -> VarId {
        let dst = self.fresh_var(ScalarKind::Ptr);
        self.push(Instr::HeapMetadata { dst, object });
        dst
    }

    pub fn emit_witness_method(&mut self, table: VarId, index: u32) -> VarId {
        let dst = self.fresh_var(ScalarKind::Ptr);
        self.push(Instr::WitnessMethod { dst, table, index });
        dst
    }

    pub fn emit_vtable_method(&mut self, metadata: VarId, offset: VTableOffset) -> VarId {
        let dst = self.fresh_var(ScalarKind::Ptr);
        self.push(Instr::VTableMethod {
            dst,
            metadata,
            offset,
        });
        dst
    }

    pub fn emit_authenticate(&mut self, value: VarId, auth: PointerAuthInfo) -> VarId {
        let dst = self.fresh_var(ScalarKind::Ptr);
        self.push(Instr::Authenticate { dst, value, auth });
        dst
    }

    pub fn emit_sign(&mut self, value: VarId, auth: PointerAuthInfo) -> VarId {
        let dst = self.fresh_var(ScalarKind::Ptr);
        self.push(Instr::Sign { dst, value, auth });
        dst
    }

    pub fn emit_compare_eq(&mut self, lhs: VarId, rhs: VarId) -> VarId {
        let dst = self.fresh_var(ScalarKind::I8);
        self.push(Instr::CompareEq { dst, lhs, rhs });
        dst
    }

    pub fn emit_async_frame_entry(&mut self, context: VarId, frame_size: u32) {
        self.push(Instr::AsyncFrameEntry {
            context,
            frame_size,
        });
    }

    /// Emit a call whose native results have the given kinds.
    pub fn emit_call(
        &mut self,
        callee: VarId,
        convention: CallingConventionKind,
        args: Vec<VarId>,
        result_kinds: &[ScalarKind],
    ) -> Vec<VarId> {
        let results = self.fresh_vars(result_kinds);
        self.push(Instr::Call {
            callee,
            convention,
            args,
            results: results.clone(),
        });
        results
    }

    pub fn emit_call_runtime(&mut self, func: RuntimeFunction, args: Vec<VarId>) -> VarId {
        debug_assert_eq!(args.len(), func.arity(), "{} arity", func.symbol());
        let dst = self.fresh_var(ScalarKind::Ptr);
        self.push(Instr::CallRuntime { dst, func, args });
        dst
    }

    // Terminators

    fn terminate(&mut self, terminator: Terminator) {
        let block = &mut self.blocks[self.current_block.index()];
        debug_assert!(
            block.terminator.is_none(),
            "block {} already terminated",
            self.current_block.raw()
        );
        block.terminator = Some(terminator);
    }

    pub fn terminate_return(&mut self, values: Vec<VarId>) {
        self.terminate(Terminator::Return { values });
    }

    pub fn terminate_async_exit(&mut self) {
        self.terminate(Terminator::AsyncExit);
    }

    pub fn terminate_branch(&mut self, cond: VarId, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::Branch {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn terminate_jump(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump { target });
    }

    pub fn terminate_unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    // Finalization

    /// Consume the builder and produce a finished [`ThunkFunction`].
    ///
    /// Unterminated blocks get `Unreachable` as a fallback (with a tracing
    /// warning).
    pub fn finish(self) -> ThunkFunction {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for bb in self.blocks {
            let terminator = bb.terminator.unwrap_or_else(|| {
                tracing::warn!(
                    block = bb.id.raw(),
                    "unterminated block in thunk IR, adding Unreachable"
                );
                Terminator::Unreachable
            });
            blocks.push(Block {
                id: bb.id,
                body: bb.body,
                terminator,
            });
        }
        ThunkFunction {
            name: self.name,
            convention: self.convention,
            params: self.params,
            blocks,
            entry: BlockId::new(0),
            var_kinds: self.var_kinds,
        }
    }
}
