//! Reachability and effect analysis
//!
//! `reachable_from[b]` is the set of blocks with a path to `b`. On top of it
//! the effect analysis approximates aliasing: `effects_out` collects the
//! effectful users downstream of a value (flowing through phis), and
//! `effects_in` collects the clobbering instructions that may execute before
//! an instruction's arguments are produced. Consumers stay coarse: GVN and
//! GCM only touch instructions whose `effects_in` is empty.

use rustc_hash::FxHashSet;

use crate::hir::graph::HirGraph;
use crate::hir::instr::InstrId;

/// Propagate `reachable_from[pred] ∪ {pred}` into each successor until
/// stable.
pub fn compute_reachability(graph: &mut HirGraph) {
    for block in &mut graph.blocks {
        block.reachable_from.clear();
    }

    let mut changed = true;
    while changed {
        changed = false;
        for b in 0..graph.blocks.len() {
            let block = &graph.blocks[b];
            let mut incoming = block.reachable_from.clone();
            incoming.insert(block.id);
            let succs: Vec<_> = block.succs.iter().copied().collect();
            for succ in succs {
                let target = &mut graph.blocks[succ.index()].reachable_from;
                let before = target.len();
                target.extend(incoming.iter().copied());
                if target.len() != before {
                    changed = true;
                }
            }
        }
    }
}

/// Two passes guarded by `alias_visited`: 0 untouched, 1 after the out pass,
/// 2 after the in pass.
pub fn compute_effects(graph: &mut HirGraph) {
    for instr in &mut graph.instrs {
        instr.effects_in.clear();
        instr.effects_out.clear();
        instr.alias_visited = 0;
    }

    compute_effects_out(graph);
    compute_effects_in(graph);
}

fn compute_effects_out(graph: &mut HirGraph) {
    // Seed: every effectful instruction registers itself with its arguments
    for idx in 0..graph.instrs.len() {
        let id = InstrId(idx as u32);
        let instr = graph.instr(id);
        if instr.removed || instr.block.is_none() || !instr.kind.clobbers() {
            continue;
        }
        for arg in instr.args.clone() {
            graph.instr_mut(arg).effects_out.insert(id);
        }
    }

    // Phis propagate the effects of their uses down to their inputs
    let mut changed = true;
    while changed {
        changed = false;
        for idx in 0..graph.instrs.len() {
            let id = InstrId(idx as u32);
            let instr = graph.instr(id);
            if instr.removed || !instr.is_phi() {
                continue;
            }
            let flowing = instr.effects_out.clone();
            for arg in instr.args.clone() {
                let target = &mut graph.instr_mut(arg).effects_out;
                let before = target.len();
                target.extend(flowing.iter().copied());
                if target.len() != before {
                    changed = true;
                }
            }
        }
    }

    for instr in &mut graph.instrs {
        if !instr.removed {
            instr.alias_visited = 1;
        }
    }
}

fn compute_effects_in(graph: &mut HirGraph) {
    // All clobbering instructions, with their positions
    let clobbers: Vec<InstrId> = graph
        .instrs
        .iter()
        .enumerate()
        .filter(|(_, i)| !i.removed && i.block.is_some() && i.kind.clobbers())
        .map(|(idx, _)| InstrId(idx as u32))
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for idx in 0..graph.instrs.len() {
            let id = InstrId(idx as u32);
            if graph.instr(id).removed || graph.instr(id).block.is_none() {
                continue;
            }

            let mut incoming: FxHashSet<InstrId> = FxHashSet::default();
            for &arg in graph.instr(id).args.clone().iter() {
                incoming.extend(graph.instr(arg).effects_in.iter().copied());
                let Some(arg_block) = graph.instr(arg).block else {
                    continue;
                };
                for &e in &clobbers {
                    if e == id {
                        continue;
                    }
                    if can_precede(graph, e, arg, arg_block) {
                        incoming.insert(e);
                    }
                }
            }

            let target = &mut graph.instr_mut(id).effects_in;
            let before = target.len();
            target.extend(incoming);
            if target.len() != before {
                changed = true;
            }
        }
    }

    for instr in &mut graph.instrs {
        if !instr.removed {
            instr.alias_visited = 2;
        }
    }
}

/// Can effect `e` execute before `arg` is produced? True when `e`'s block
/// reaches `arg`'s, or when both share a block and `e` is numbered lower.
fn can_precede(graph: &HirGraph, e: InstrId, arg: InstrId, arg_block: crate::hir::instr::BlockId) -> bool {
    let Some(e_block) = graph.instr(e).block else {
        return false;
    };
    if e_block == arg_block {
        return graph.instr(e).id < graph.instr(arg).id;
    }
    graph.block(arg_block).reachable_from.contains(&e_block)
}
