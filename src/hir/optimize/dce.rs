//! Dead-code elimination
//!
//! Mark-sweep over the SSA graph. Instructions with observable side effects
//! are roots; marking closes over their arguments. Unmarked instructions are
//! removed, except constants: a `Nil` or `Literal` lowers to a const
//! interval that only materializes at real uses, so a dead one already emits
//! nothing.

use crate::hir::graph::HirGraph;
use crate::hir::instr::{HirKind, InstrId};

pub fn eliminate_dead_code(graph: &mut HirGraph) {
    for instr in &mut graph.instrs {
        instr.live = false;
    }

    // Roots: everything whose execution is observable
    let mut worklist: Vec<InstrId> = graph
        .instrs
        .iter()
        .enumerate()
        .filter(|(_, i)| !i.removed && i.block.is_some() && i.kind.is_dce_root())
        .map(|(idx, _)| InstrId(idx as u32))
        .collect();

    while let Some(id) = worklist.pop() {
        if graph.instr(id).live {
            continue;
        }
        graph.instr_mut(id).live = true;
        for &arg in graph.instr(id).args.clone().iter() {
            if !graph.instr(arg).live {
                worklist.push(arg);
            }
        }
    }

    // Sweep
    let dead: Vec<InstrId> = graph
        .instrs
        .iter()
        .enumerate()
        .filter(|(_, i)| {
            !i.removed
                && i.block.is_some()
                && !i.live
                && !matches!(i.kind, HirKind::Nil | HirKind::Literal(_))
        })
        .map(|(idx, _)| InstrId(idx as u32))
        .collect();
    for id in dead {
        graph.remove_instr(id);
    }

    // Everything that survived is live
    for instr in &mut graph.instrs {
        if !instr.removed {
            instr.live = true;
        }
    }
}
