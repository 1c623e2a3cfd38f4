//! HIR to LIR lowering
//!
//! Flattens the blocks of one function root into a loop-aware reverse post
//! order, then selects one or more LIR instructions per HIR instruction.
//! Stub-backed operations move their operands into fixed intervals right
//! before the instruction and their result out right after, keeping fixed
//! intervals short; phis become moves at their predecessors' gotos.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use super::types::{
    IntervalId, Lir, LirBlock, LirId, LirKind, UseKind, RAX, RBX, RCX,
};
use crate::ast::ScopeSlot;
use crate::error::CompileError;
use crate::hir::graph::HirGraph;
use crate::hir::instr::{BlockId, HirKind, InstrId};

pub struct Lowerer<'g> {
    graph: &'g HirGraph,
    lir: Lir,
    current_block: usize,
    next_pos: i32,
    /// HIR value to the interval holding its result
    map: FxHashMap<InstrId, IntervalId>,
    /// HIR block to flattened index
    pub block_map: FxHashMap<BlockId, usize>,
}

/// Lower one function root to unallocated LIR
pub fn lower_function(graph: &HirGraph, root: BlockId) -> Result<Lir, CompileError> {
    let mut lowerer = Lowerer {
        graph,
        lir: Lir::new(),
        current_block: 0,
        next_pos: 0,
        map: FxHashMap::default(),
        block_map: FxHashMap::default(),
    };
    lowerer.run(root)?;
    Ok(lowerer.lir)
}

impl<'g> Lowerer<'g> {
    fn run(&mut self, root: BlockId) -> Result<(), CompileError> {
        let order = self.flatten(root);
        for (index, &block) in order.iter().enumerate() {
            self.block_map.insert(block, index);
            self.lir.blocks.push(LirBlock {
                hir: block,
                start: -1,
                end: -1,
                instructions: Vec::new(),
                label: LirId(0),
                succs: Default::default(),
                live_gen: Default::default(),
                live_kill: Default::default(),
                live_in: Default::default(),
                live_out: Default::default(),
            });
        }

        for (index, &block) in order.iter().enumerate() {
            let succs: Vec<usize> = self
                .graph
                .block(block)
                .succs
                .iter()
                .filter_map(|s| self.block_map.get(s).copied())
                .collect();
            self.lir.blocks[index].succs.extend(succs);
        }

        for (index, &block) in order.iter().enumerate() {
            self.current_block = index;
            let label = self.emit(LirKind::Label, None);
            self.lir.blocks[index].label = label;

            for instr in self.graph.block(block).instructions.clone() {
                if self.graph.instr(instr).removed {
                    continue;
                }
                self.visit_instruction(instr, block)?;
            }
        }

        for bi in 0..self.lir.blocks.len() {
            let first = self.lir.blocks[bi].instructions.first().copied();
            let last = self.lir.blocks[bi].instructions.last().copied();
            if let (Some(first), Some(last)) = (first, last) {
                let start = self.lir.instrs[first.index()].pos;
                let end = self.lir.instrs[last.index()].pos;
                self.lir.blocks[bi].start = start;
                self.lir.blocks[bi].end = end;
            }
        }

        Ok(())
    }

    /// Linearize blocks so a loop header is visited once all of its forward
    /// predecessors are placed, and any other block once all predecessors
    /// are.
    fn flatten(&self, root: BlockId) -> Vec<BlockId> {
        let mut visits = vec![0usize; self.graph.blocks.len()];
        let mut queue: VecDeque<BlockId> = VecDeque::new();
        let mut order = Vec::new();

        queue.push_back(root);
        while let Some(b) = queue.pop_front() {
            visits[b.index()] += 1;
            let block = self.graph.block(b);

            if block.preds.is_empty() {
                // Root block
            } else if block.is_loop {
                // Loop header: place on the first (forward-edge) arrival
                if visits[b.index()] != 1 {
                    continue;
                }
            } else if visits[b.index()] != block.preds.len() {
                continue;
            }

            order.push(b);
            for i in (0..block.succs.len()).rev() {
                queue.push_front(block.succs[i]);
            }
        }

        order
    }

    fn visit_instruction(&mut self, id: InstrId, block: BlockId) -> Result<(), CompileError> {
        let kind = self.graph.instr(id).kind.clone();
        let args: Vec<InstrId> = self.graph.instr(id).args.iter().copied().collect();

        match kind {
            HirKind::Function { body, .. } => {
                let body = body
                    .ok_or_else(|| CompileError::internal("function literal without a body"))?;
                let instr = self.emit(LirKind::Function { body }, Some(id));
                self.result_from_fixed(instr, id, RAX);
            }
            HirKind::Entry { context_slots } => {
                self.emit(LirKind::Entry { context_slots }, Some(id));
            }
            HirKind::Return => {
                let rax = self.to_fixed(args[0], RAX);
                let instr = self.emit(LirKind::Return, Some(id));
                self.add_input(instr, rax, UseKind::Register);
            }
            HirKind::Goto => self.visit_goto(id, block)?,
            HirKind::If => {
                let instr = self.emit(LirKind::Branch, Some(id));
                self.add_input_of(instr, args[0], UseKind::Register);
            }
            HirKind::Phi => {
                let interval = self.map.get(&id).copied().ok_or_else(|| {
                    CompileError::internal("phi reached before any predecessor goto")
                })?;
                let instr = self.emit(LirKind::Phi, Some(id));
                self.add_input(instr, interval, UseKind::Any);
                self.set_result(instr, interval, UseKind::Any);
            }
            HirKind::Nil => {
                let interval = self.lir.new_const(crate::hir::instr::LitValue::Nil);
                let instr = self.emit(LirKind::Nil, Some(id));
                self.set_result(instr, interval, UseKind::Any);
                self.map.insert(id, interval);
            }
            HirKind::Literal(value) => {
                let interval = self.lir.new_const(value);
                let instr = self.emit(LirKind::Literal, Some(id));
                self.set_result(instr, interval, UseKind::Any);
                self.map.insert(id, interval);
            }
            HirKind::LoadArg => {
                let instr = self.emit(LirKind::LoadArg, Some(id));
                self.add_input_of(instr, args[0], UseKind::Any);
                let res = self.lir.new_virtual();
                self.set_result(instr, res, UseKind::Any);
                self.map.insert(id, res);
            }
            HirKind::LoadVarArg => {
                let index = self.to_fixed(args[0], RAX);
                let rest = self.to_fixed(args[1], RBX);
                let array = self.to_fixed(args[2], RCX);
                let instr = self.emit(LirKind::LoadVarArg, Some(id));
                self.add_input(instr, index, UseKind::Register);
                self.add_input(instr, rest, UseKind::Register);
                self.add_input(instr, array, UseKind::Register);
            }
            HirKind::StoreArg => {
                let instr = self.emit(LirKind::StoreArg, Some(id));
                self.add_input_of(instr, args[0], UseKind::Register);
            }
            HirKind::StoreVarArg => {
                let array = self.to_fixed(args[0], RAX);
                let instr = self.emit(LirKind::StoreVarArg, Some(id));
                self.add_input(instr, array, UseKind::Register);
                self.add_scratch(instr);
            }
            HirKind::LoadContext(slot) => {
                let (index, depth) = context_slot(slot)?;
                let instr = self.emit(LirKind::LoadContext { index, depth }, Some(id));
                self.add_scratch(instr);
                let res = self.lir.new_virtual();
                self.set_result(instr, res, UseKind::Any);
                self.map.insert(id, res);
            }
            HirKind::StoreContext(slot) => {
                let (index, depth) = context_slot(slot)?;
                let instr = self.emit(LirKind::StoreContext { index, depth }, Some(id));
                self.add_input_of(instr, args[0], UseKind::Register);
                self.add_scratch(instr);
            }
            HirKind::LoadProperty => {
                let recv = self.to_fixed(args[0], RAX);
                let prop = self.to_fixed(args[1], RBX);
                let instr = self.emit(LirKind::LoadProperty, Some(id));
                self.add_input(instr, recv, UseKind::Register);
                self.add_input(instr, prop, UseKind::Register);
                self.result_from_fixed(instr, id, RAX);
            }
            HirKind::StoreProperty => {
                let recv = self.to_fixed(args[0], RAX);
                let prop = self.to_fixed(args[1], RBX);
                let value = self.to_fixed(args[2], RCX);
                let instr = self.emit(LirKind::StoreProperty, Some(id));
                self.add_input(instr, recv, UseKind::Register);
                self.add_input(instr, prop, UseKind::Register);
                self.add_input(instr, value, UseKind::Register);
            }
            HirKind::DeleteProperty => {
                let recv = self.to_fixed(args[0], RAX);
                let prop = self.to_fixed(args[1], RBX);
                let instr = self.emit(LirKind::DeleteProperty, Some(id));
                self.add_input(instr, recv, UseKind::Register);
                self.add_input(instr, prop, UseKind::Register);
            }
            HirKind::AllocateObject => {
                let instr = self.emit(LirKind::AllocateObject, Some(id));
                self.result_from_fixed(instr, id, RAX);
            }
            HirKind::AllocateArray => {
                let instr = self.emit(LirKind::AllocateArray, Some(id));
                self.result_from_fixed(instr, id, RAX);
            }
            HirKind::Call => {
                let callee = self.to_fixed(args[0], RAX);
                let argc = self.to_fixed(args[1], RBX);
                let instr = self.emit(LirKind::Call, Some(id));
                self.add_input(instr, callee, UseKind::Register);
                self.add_input(instr, argc, UseKind::Register);
                self.result_from_fixed(instr, id, RAX);
            }
            HirKind::AlignStack => {
                let instr = self.emit(LirKind::AlignStack, Some(id));
                self.add_input_of(instr, args[0], UseKind::Any);
            }
            HirKind::BinOp(op) => {
                let instr = self.emit(LirKind::BinOp(op), Some(id));
                self.add_input_of(instr, args[0], UseKind::Register);
                self.add_input_of(instr, args[1], UseKind::Any);
                self.add_scratch(instr);
                let res = self.lir.new_virtual();
                self.set_result(instr, res, UseKind::Any);
                self.map.insert(id, res);
            }
            HirKind::Not | HirKind::Sizeof => {
                let kind = if matches!(kind, HirKind::Not) {
                    LirKind::Not
                } else {
                    LirKind::Sizeof
                };
                let instr = self.emit(kind, Some(id));
                self.add_input_of(instr, args[0], UseKind::Register);
                self.add_scratch(instr);
                let res = self.lir.new_virtual();
                self.set_result(instr, res, UseKind::Any);
                self.map.insert(id, res);
            }
            HirKind::Typeof | HirKind::Keysof | HirKind::Clone => {
                let lir_kind = match kind {
                    HirKind::Typeof => LirKind::Typeof,
                    HirKind::Keysof => LirKind::Keysof,
                    _ => LirKind::Clone,
                };
                let value = self.to_fixed(args[0], RAX);
                let instr = self.emit(lir_kind, Some(id));
                self.add_input(instr, value, UseKind::Register);
                self.result_from_fixed(instr, id, RAX);
            }
            HirKind::CollectGarbage => {
                self.emit(LirKind::CollectGarbage, Some(id));
            }
            HirKind::GetStackTrace => {
                let instr = self.emit(LirKind::GetStackTrace, Some(id));
                self.result_from_fixed(instr, id, RAX);
            }
        }

        Ok(())
    }

    /// Out-of-SSA: each goto feeding a block with phis copies the matching
    /// phi input into the phi's interval.
    fn visit_goto(&mut self, id: InstrId, block: BlockId) -> Result<(), CompileError> {
        let succ = *self
            .graph
            .block(block)
            .succs
            .first()
            .ok_or_else(|| CompileError::internal("goto without successor"))?;
        let parent_index = if self.graph.block(succ).preds.first() == Some(&block) {
            0
        } else {
            1
        };

        for phi in self.graph.block(succ).phis.clone() {
            // Phis eliminated by dead-code elimination get no moves
            if self.graph.instr(phi).removed || !self.graph.instr(phi).live {
                continue;
            }

            let phi_interval = self.interval_of(phi);
            let input = self
                .graph
                .instr(phi)
                .args
                .get(parent_index)
                .copied()
                .ok_or_else(|| CompileError::internal("phi missing an input for its edge"))?;
            let input_interval = self.interval_of(input);

            let mv = self.emit(LirKind::Move, None);
            self.add_input(mv, input_interval, UseKind::Any);
            self.set_result(mv, phi_interval, UseKind::Any);
        }

        self.emit(LirKind::Goto, Some(id));
        Ok(())
    }

    // === Emission helpers ===

    fn emit(&mut self, kind: LirKind, hir: Option<InstrId>) -> LirId {
        let id = LirId(self.lir.instrs.len() as u32);
        let pos = self.next_pos;
        self.next_pos += 2;
        self.lir.instrs.push(super::types::LirInstr {
            kind,
            pos,
            block: self.current_block,
            inputs: Default::default(),
            scratches: Default::default(),
            result: None,
            hir,
            gap: None,
            targets: Default::default(),
        });
        self.lir.blocks[self.current_block].instructions.push(id);
        id
    }

    fn interval_of(&mut self, hir: InstrId) -> IntervalId {
        if let Some(&iv) = self.map.get(&hir) {
            return iv;
        }
        let iv = self.lir.new_virtual();
        self.map.insert(hir, iv);
        iv
    }

    fn add_input(&mut self, instr: LirId, interval: IntervalId, kind: UseKind) {
        let use_id = self.lir.new_use(interval, kind, instr);
        self.lir.instr_mut(instr).inputs.push(use_id);
    }

    fn add_input_of(&mut self, instr: LirId, hir: InstrId, kind: UseKind) {
        let interval = self.interval_of(hir);
        self.add_input(instr, interval, kind);
    }

    fn set_result(&mut self, instr: LirId, interval: IntervalId, kind: UseKind) {
        let use_id = self.lir.new_use(interval, kind, instr);
        self.lir.instr_mut(instr).result = Some(use_id);
    }

    fn add_scratch(&mut self, instr: LirId) {
        let interval = self.lir.new_virtual();
        let use_id = self.lir.new_use(interval, UseKind::Register, instr);
        self.lir.instr_mut(instr).scratches.push(use_id);
    }

    /// Copy a value into the fixed interval of `register` right before the
    /// instruction about to be emitted; the value's interval is hinted
    /// toward the register.
    fn to_fixed(&mut self, hir: InstrId, register: usize) -> IntervalId {
        let interval = self.interval_of(hir);
        let fixed = self.lir.registers[register];
        let mv = self.emit(LirKind::Move, None);
        self.add_input(mv, interval, UseKind::Any);
        self.set_result(mv, fixed, UseKind::Register);
        let hint = self.lir.instr(mv).result.unwrap();
        self.lir.interval_mut(interval).register_hint = Some(hint);
        fixed
    }

    /// Bind the instruction's result to the fixed interval of `register`
    /// and copy it into a fresh virtual right after.
    fn result_from_fixed(&mut self, instr: LirId, hir: InstrId, register: usize) {
        let fixed = self.lir.registers[register];
        self.set_result(instr, fixed, UseKind::Register);

        let res = self.lir.new_virtual();
        let mv = self.emit(LirKind::Move, None);
        self.add_input(mv, fixed, UseKind::Register);
        self.set_result(mv, res, UseKind::Any);
        let hint = self.lir.instr(mv).inputs[0];
        self.lir.interval_mut(res).register_hint = Some(hint);
        self.map.insert(hir, res);
    }
}

fn context_slot(slot: ScopeSlot) -> Result<(usize, usize), CompileError> {
    match slot {
        ScopeSlot::Context { index, depth } => Ok((index, depth)),
        ScopeSlot::Stack { .. } => Err(CompileError::internal(
            "stack slot reached context lowering",
        )),
    }
}
