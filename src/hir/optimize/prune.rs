//! Phi pruning
//!
//! Runs to a fixed point over every phi in the graph: trivial loop phis lose
//! their self input, zero-input phis become nil, single-input phis are
//! replaced by their input (re-enqueueing phi users that may have become
//! trivial), and unused phis are deleted.

use rustc_hash::FxHashSet;

use crate::hir::graph::HirGraph;
use crate::hir::instr::{HirKind, InstrId};

pub fn prune_phis(graph: &mut HirGraph) {
    // Collect all phis, emptying the per-block phi lists for now
    let mut queue: Vec<InstrId> = Vec::new();
    for block in &mut graph.blocks {
        queue.extend(block.phis.drain(..));
    }

    let mut keep: Vec<InstrId> = Vec::new();
    let mut kept: FxHashSet<InstrId> = FxHashSet::default();

    let mut i = 0;
    while i < queue.len() {
        let phi = queue[i];
        i += 1;

        if graph.instr(phi).removed || !graph.instr(phi).is_phi() {
            continue;
        }

        if graph.instr(phi).input_count() == 2 {
            let args = &graph.instr(phi).args;
            if args[1] != phi && args[0] != args[1] {
                if kept.insert(phi) {
                    keep.push(phi);
                }
                continue;
            }
            // Trivial loop phi or identical inputs: drop the second input
            drop_last_arg(graph, phi);
        }

        match graph.instr(phi).input_count() {
            0 => {
                // Nothing flows in: the phi becomes nil in place
                let instr = graph.instr_mut(phi);
                instr.kind = HirKind::Nil;
                instr.pinned = false;
            }
            1 => {
                // Phi users may become trivial once this one is folded
                for &user in graph.instr(phi).uses.clone().iter() {
                    if !graph.instr(user).removed && graph.instr(user).is_phi() {
                        queue.push(user);
                    }
                }
                let input = graph.instr(phi).args[0];
                graph.replace_all_uses(phi, input);
                graph.remove_instr(phi);
            }
            _ => {
                if kept.insert(phi) {
                    keep.push(phi);
                }
            }
        }
    }

    // Put surviving phis back into their blocks
    for &phi in &keep {
        if graph.instr(phi).removed || !graph.instr(phi).is_phi() {
            continue;
        }
        if let Some(block) = graph.instr(phi).block {
            graph.block_mut(block).phis.push(phi);
        }
    }

    // Unused phis are deleted; deleting one can orphan another, so loop
    loop {
        let dead: Vec<InstrId> = graph
            .instrs
            .iter()
            .enumerate()
            .filter(|(_, instr)| !instr.removed && instr.is_phi() && instr.uses.is_empty())
            .map(|(idx, _)| InstrId(idx as u32))
            .collect();
        if dead.is_empty() {
            break;
        }
        for phi in dead {
            graph.remove_instr(phi);
        }
    }
}

fn drop_last_arg(graph: &mut HirGraph, instr: InstrId) {
    if let Some(arg) = graph.instr_mut(instr).args.pop() {
        let uses = &mut graph.instr_mut(arg).uses;
        if let Some(pos) = uses.iter().position(|&u| u == instr) {
            uses.remove(pos);
        }
    }
}
