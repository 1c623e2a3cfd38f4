//! Global code motion (Click's algorithm)
//!
//! Two passes per function root. Schedule-early sinks every movable
//! instruction to the shallowest dominator-tree block that still dominates
//! its inputs; schedule-late lifts it from the least common ancestor of its
//! users toward the early block, settling on the smallest loop depth that
//! can still reach the instruction's original block. Pinned instructions and
//! anything under an effect chain stay put.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::CompileError;
use crate::hir::graph::HirGraph;
use crate::hir::instr::{BlockId, InstrId};

pub fn global_code_motion(graph: &mut HirGraph) -> Result<(), CompileError> {
    for instr in &mut graph.instrs {
        instr.gcm_visited = false;
    }

    let roots = graph.roots.clone();
    for root in roots {
        let blocks = blocks_of_root(graph, root);

        // Schedule-early
        let mut early: FxHashMap<InstrId, BlockId> = FxHashMap::default();
        for &block in &blocks {
            for instr in graph.block(block).instructions.clone() {
                schedule_early(graph, root, instr, &mut early);
            }
        }

        // Schedule-late; users are placed before their definitions so the
        // block of a user is always final when queried
        for instr in &mut graph.instrs {
            instr.gcm_visited = false;
        }
        for &block in &blocks {
            for instr in graph.block(block).instructions.clone() {
                schedule_late(graph, instr, &early)?;
            }
        }

        for &block in &blocks {
            reorder_block(graph, block);
        }
    }

    Ok(())
}

fn blocks_of_root(graph: &HirGraph, root: BlockId) -> Vec<BlockId> {
    let mut seen = vec![root];
    let mut worklist = vec![root];
    while let Some(block) = worklist.pop() {
        for succ in graph.block(block).succs.iter().copied() {
            if !seen.contains(&succ) {
                seen.push(succ);
                worklist.push(succ);
            }
        }
    }
    seen.sort();
    seen
}

fn movable(graph: &HirGraph, id: InstrId) -> bool {
    let instr = graph.instr(id);
    if instr.removed || instr.pinned || !instr.effects_in.is_empty() {
        return false;
    }
    match instr.block {
        Some(block) => graph.block(block).dfs_id != -1,
        None => false,
    }
}

/// Deepest block that dominates all of the instruction's inputs
fn schedule_early(
    graph: &mut HirGraph,
    root: BlockId,
    id: InstrId,
    early: &mut FxHashMap<InstrId, BlockId>,
) -> BlockId {
    if let Some(&block) = early.get(&id) {
        return block;
    }
    if graph.instr(id).gcm_visited || !movable(graph, id) {
        return graph.instr(id).block.unwrap_or(root);
    }
    graph.instr_mut(id).gcm_visited = true;

    let mut best = root;
    for arg in graph.instr(id).args.clone() {
        let arg_block = if movable(graph, arg) {
            schedule_early(graph, root, arg, early)
        } else {
            match graph.instr(arg).block {
                Some(b) => b,
                None => continue,
            }
        };
        if graph.block(arg_block).dominator_depth > graph.block(best).dominator_depth {
            best = arg_block;
        }
    }

    early.insert(id, best);
    best
}

/// Least common ancestor of the users, lifted to the cheapest loop depth on
/// the dominator chain toward the early block.
fn schedule_late(
    graph: &mut HirGraph,
    id: InstrId,
    early: &FxHashMap<InstrId, BlockId>,
) -> Result<BlockId, CompileError> {
    let current = graph.instr(id).block.unwrap_or(BlockId(0));
    if graph.instr(id).gcm_visited {
        return Ok(graph.instr(id).block.unwrap_or(current));
    }
    graph.instr_mut(id).gcm_visited = true;
    if !movable(graph, id) {
        return Ok(current);
    }

    let mut lca: Option<BlockId> = None;
    for user in graph.instr(id).uses.clone() {
        if graph.instr(user).removed {
            continue;
        }
        if graph.instr(user).is_phi() {
            // A phi input is used on the matching predecessor edge
            let Some(phi_block) = graph.instr(user).block else {
                continue;
            };
            let args = graph.instr(user).args.clone();
            for (k, &arg) in args.iter().enumerate() {
                if arg != id {
                    continue;
                }
                if let Some(&pred) = graph.block(phi_block).preds.get(k) {
                    lca = Some(merge_lca(graph, lca, pred));
                }
            }
        } else {
            let user_block = schedule_late(graph, user, early)?;
            lca = Some(merge_lca(graph, lca, user_block));
        }
    }

    // Unused values stay where they are
    let Some(lca) = lca else {
        return Ok(current);
    };

    let early_block = early.get(&id).copied().unwrap_or(current);
    let mut best = lca;
    let mut cursor = lca;
    let mut hops = 0;
    loop {
        let reaches_origin = cursor == current
            || graph.block(current).reachable_from.contains(&cursor);
        if reaches_origin && graph.block(cursor).loop_depth < graph.block(best).loop_depth {
            best = cursor;
        }
        if cursor == early_block {
            break;
        }
        cursor = match graph.block(cursor).dominator {
            Some(dom) => dom,
            None => break,
        };
        hops += 1;
        if hops > graph.blocks.len() {
            return Err(CompileError::internal("dominator chain cycle during gcm"));
        }
    }

    if best != current {
        relocate(graph, id, best);
    }
    Ok(best)
}

fn merge_lca(graph: &HirGraph, acc: Option<BlockId>, block: BlockId) -> BlockId {
    let Some(mut a) = acc else {
        return block;
    };
    let mut b = block;
    if graph.block(a).dfs_id == -1 {
        return b;
    }
    if graph.block(b).dfs_id == -1 {
        return a;
    }
    while graph.block(a).dominator_depth > graph.block(b).dominator_depth {
        a = graph.block(a).dominator.unwrap_or(a);
    }
    while graph.block(b).dominator_depth > graph.block(a).dominator_depth {
        b = graph.block(b).dominator.unwrap_or(b);
    }
    while a != b {
        match (graph.block(a).dominator, graph.block(b).dominator) {
            (Some(da), Some(db)) => {
                a = da;
                b = db;
            }
            _ => break,
        }
    }
    a
}

fn relocate(graph: &mut HirGraph, id: InstrId, target: BlockId) {
    let old = graph.instr(id).block;
    if let Some(old) = old {
        graph.block_mut(old).instructions.retain(|&i| i != id);
    }
    graph.instr_mut(id).block = Some(target);
    // Prepended; the per-block reorder below restores def-before-use
    graph.block_mut(target).instructions.insert(0, id);
}

/// Restore a lowering-safe order: phis first, control at the tail, everything
/// else stable-topologically sorted on intra-block dependencies.
fn reorder_block(graph: &mut HirGraph, block: BlockId) {
    let list = graph.block(block).instructions.clone();

    let mut phis = Vec::new();
    let mut middle = Vec::new();
    let mut control = Vec::new();
    for &id in &list {
        let instr = graph.instr(id);
        if instr.is_phi() {
            phis.push(id);
        } else if instr.is_control() {
            control.push(id);
        } else {
            middle.push(id);
        }
    }

    let in_middle: FxHashSet<InstrId> = middle.iter().copied().collect();
    let mut emitted: FxHashSet<InstrId> = FxHashSet::default();
    let mut ordered = phis.clone();
    let mut remaining = middle;
    while !remaining.is_empty() {
        let mut progressed = false;
        let mut next = Vec::new();
        for id in remaining {
            let ready = graph
                .instr(id)
                .args
                .iter()
                .all(|a| !in_middle.contains(a) || emitted.contains(a));
            if ready {
                emitted.insert(id);
                ordered.push(id);
                progressed = true;
            } else {
                next.push(id);
            }
        }
        if !progressed {
            // Should not happen in acyclic non-phi code; keep original order
            ordered.extend(next);
            break;
        }
        remaining = next;
    }
    ordered.extend(control);

    graph.block_mut(block).instructions = ordered;
}
