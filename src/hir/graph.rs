//! HIR graph arena
//!
//! Instructions and blocks live in flat vectors and reference each other by
//! index. All mutation of the arg/use mirror goes through the methods here
//! so the two stay exact inverses of each other.

use std::fmt::Write as _;

use super::block::HirBlock;
use super::instr::{BlockId, HirInstr, HirKind, InstrId};

#[derive(Debug)]
pub struct HirGraph {
    pub instrs: Vec<HirInstr>,
    pub blocks: Vec<HirBlock>,
    /// One entry per function literal, the main function first
    pub roots: Vec<BlockId>,
    next_instr_id: i32,
}

impl HirGraph {
    pub fn new() -> Self {
        HirGraph {
            instrs: Vec::new(),
            blocks: Vec::new(),
            roots: Vec::new(),
            // The first id goes to the root Function pseudo instruction, so
            // every function's Entry lands on i0.
            next_instr_id: -2,
        }
    }

    pub fn instr(&self, id: InstrId) -> &HirInstr {
        &self.instrs[id.index()]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut HirInstr {
        &mut self.instrs[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &HirBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut HirBlock {
        &mut self.blocks[id.index()]
    }

    /// Allocate an instruction without attaching it to any block
    pub fn new_instr(&mut self, kind: HirKind, block: Option<BlockId>) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        let numeric = self.next_instr_id;
        self.next_instr_id += 2;
        self.instrs.push(HirInstr::new(numeric, kind, block));
        id
    }

    pub fn new_block(&mut self, stack_slots: usize, loop_depth: u32) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(HirBlock::new(id, stack_slots, loop_depth));
        id
    }

    /// Append `arg` to `user`'s inputs and mirror the edge in `arg.uses`
    pub fn add_arg(&mut self, user: InstrId, arg: InstrId) {
        self.instr_mut(user).args.push(arg);
        self.instr_mut(arg).uses.push(user);
    }

    /// Replace every occurrence of `old` in `user`'s inputs with `new`
    pub fn replace_arg(&mut self, user: InstrId, old: InstrId, new: InstrId) {
        let mut replaced = 0usize;
        {
            let u = self.instr_mut(user);
            for a in u.args.iter_mut() {
                if *a == old {
                    *a = new;
                    replaced += 1;
                }
            }
        }
        for _ in 0..replaced {
            remove_one(&mut self.instr_mut(old).uses, user);
            self.instr_mut(new).uses.push(user);
        }
    }

    /// Rewire every use of `old` to `new`
    pub fn replace_all_uses(&mut self, old: InstrId, new: InstrId) {
        let users = self.instr(old).uses.clone();
        for user in users {
            self.replace_arg(user, old, new);
        }
    }

    /// Delete an instruction: detach it from its block's lists and from its
    /// inputs' use lists.
    pub fn remove_instr(&mut self, id: InstrId) {
        let args: Vec<InstrId> = self.instr(id).args.iter().copied().collect();
        for a in args {
            remove_one(&mut self.instr_mut(a).uses, id);
        }
        if let Some(b) = self.instr(id).block {
            let block = self.block_mut(b);
            block.instructions.retain(|&i| i != id);
            block.phis.retain(|&i| i != id);
        }
        let instr = self.instr_mut(id);
        instr.args.clear();
        instr.removed = true;
    }

    /// Pretty-print the whole graph, one section per block
    pub fn print(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            let preds: Vec<u32> = block.preds.iter().map(|b| b.0).collect();
            let succs: Vec<u32> = block.succs.iter().map(|b| b.0).collect();
            let _ = writeln!(
                out,
                "# Block {}{} preds={:?} succs={:?}",
                block.id.0,
                if block.is_loop { " (loop)" } else { "" },
                preds,
                succs
            );
            for &i in &block.instructions {
                let _ = writeln!(out, "{}", self.display_instr(i));
            }
        }
        out
    }

    pub fn display_instr(&self, id: InstrId) -> String {
        let instr = self.instr(id);
        let args: Vec<String> = instr
            .args
            .iter()
            .map(|a| format!("i{}", self.instr(*a).id))
            .collect();
        let mut line = format!("i{} = {}", instr.id, instr.kind.mnemonic());
        match &instr.kind {
            HirKind::Literal(v) => {
                let _ = write!(line, " {}", v);
            }
            HirKind::BinOp(op) => {
                let _ = write!(line, ".{:?}", op);
            }
            _ => {}
        }
        if !args.is_empty() {
            let _ = write!(line, " ({})", args.join(", "));
        }
        line
    }
}

impl Default for HirGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_one(list: &mut Vec<InstrId>, value: InstrId) {
    if let Some(pos) = list.iter().position(|&v| v == value) {
        list.remove(pos);
    }
}
