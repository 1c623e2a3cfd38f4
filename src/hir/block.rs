//! HIR basic blocks and the per-block SSA environment

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::instr::{BlockId, InstrId};
use crate::ast::ScopeSlot;

/// Per-block mapping from stack slot to its current SSA definition.
///
/// One extra slot past the function's own is reserved for the result of
/// short-circuit boolean operators.
#[derive(Debug, Clone)]
pub struct Env {
    slots: Vec<Option<InstrId>>,
    phis: Vec<Option<InstrId>>,
}

impl Env {
    /// `stack_slots` is the function's own slot count; the logic slot is
    /// appended on top.
    pub fn new(stack_slots: usize) -> Self {
        Env {
            slots: vec![None; stack_slots + 1],
            phis: vec![None; stack_slots + 1],
        }
    }

    /// Total slot count including the logic slot
    pub fn stack_slots(&self) -> usize {
        self.slots.len()
    }

    /// The slot reserved for short-circuit boolean results
    pub fn logic_slot(&self) -> ScopeSlot {
        ScopeSlot::stack(self.slots.len() - 1)
    }

    pub fn at(&self, index: usize) -> Option<InstrId> {
        self.slots[index]
    }

    pub fn set(&mut self, index: usize, value: InstrId) {
        self.slots[index] = Some(value);
    }

    pub fn phi_at(&self, index: usize) -> Option<InstrId> {
        self.phis[index]
    }

    pub fn set_phi(&mut self, index: usize, phi: InstrId) {
        self.phis[index] = Some(phi);
    }

    /// Copy both arrays verbatim from a predecessor
    pub fn copy_from(&mut self, other: &Env) {
        self.slots.copy_from_slice(&other.slots);
        self.phis.copy_from_slice(&other.phis);
    }
}

/// A basic block: at most two predecessors, at most two successors, a phi
/// list, an ordered instruction list and the SSA environment.
#[derive(Debug)]
pub struct HirBlock {
    pub id: BlockId,
    /// DFS number assigned by the dominator computation; -1 means unvisited
    pub dfs_id: i32,
    /// Loop nesting depth at creation time
    pub loop_depth: u32,
    /// Loop headers get a phi for every stack slot up front
    pub is_loop: bool,
    /// Block has a terminator; later visits synthesize values elsewhere
    pub ended: bool,

    pub preds: SmallVec<[BlockId; 2]>,
    pub succs: SmallVec<[BlockId; 2]>,

    /// Phis of this block, in slot-merge order. Phis also appear in
    /// `instructions` so lowering sees one deterministic order.
    pub phis: Vec<InstrId>,
    pub instructions: Vec<InstrId>,

    pub env: Env,

    // Lengauer-Tarjan state. `label` and `semi` start as the block itself;
    // `dominates` serves as the algorithm's bucket and afterwards holds the
    // dominator-tree children.
    pub parent: Option<BlockId>,
    pub ancestor: Option<BlockId>,
    pub label: BlockId,
    pub semi: BlockId,
    pub dominator: Option<BlockId>,
    pub dominator_depth: i32,
    pub dominates: Vec<BlockId>,

    /// Ids of blocks that can reach this one
    pub reachable_from: FxHashSet<BlockId>,
}

impl HirBlock {
    pub fn new(id: BlockId, stack_slots: usize, loop_depth: u32) -> Self {
        HirBlock {
            id,
            dfs_id: -1,
            loop_depth,
            is_loop: false,
            ended: false,
            preds: SmallVec::new(),
            succs: SmallVec::new(),
            phis: Vec::new(),
            instructions: Vec::new(),
            env: Env::new(stack_slots),
            parent: None,
            ancestor: None,
            label: id,
            semi: id,
            dominator: None,
            dominator_depth: -1,
            dominates: Vec::new(),
            reachable_from: FxHashSet::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Break/continue bookkeeping for the innermost loop.
///
/// Each `break` chains a fresh block onto the loop exit so no block ever
/// collects more than two predecessors; `continue` targets are drained into
/// the back edge once the body is built.
#[derive(Debug)]
pub struct LoopFrame {
    pub continue_blocks: Vec<BlockId>,
    /// Current end of the break chain
    pub brk: BlockId,
}

impl LoopFrame {
    pub fn new(end: BlockId) -> Self {
        LoopFrame {
            continue_blocks: Vec::new(),
            brk: end,
        }
    }
}
