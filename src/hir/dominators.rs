//! Dominator tree construction
//!
//! Implementation of "A fast algorithm for finding dominators in a
//! flowgraph" by T. Lengauer and R. E. Tarjan, with the path-compressing
//! link-eval. Runs once per function root; afterwards each block's
//! `dominates` list holds its dominator-tree children and `dominator_depth`
//! its distance from the root.

use super::graph::HirGraph;
use super::instr::BlockId;
use crate::error::CompileError;

pub fn derive_dominators(graph: &mut HirGraph) -> Result<(), CompileError> {
    // Reset per-run state so the computation is idempotent
    for block in &mut graph.blocks {
        block.dfs_id = -1;
        block.parent = None;
        block.ancestor = None;
        block.label = block.id;
        block.semi = block.id;
        block.dominator = None;
        block.dominator_depth = -1;
        block.dominates.clear();
    }

    let roots = graph.roots.clone();
    for root in roots {
        derive_for_root(graph, root)?;
    }
    Ok(())
}

fn derive_for_root(graph: &mut HirGraph, root: BlockId) -> Result<(), CompileError> {
    let dfs_blocks = enumerate_dfs(graph, root);

    // Semidominators and buckets, in reverse DFS order except the root
    for &w in dfs_blocks.iter().skip(1).rev() {
        let parent = graph
            .block(w)
            .parent
            .ok_or_else(|| CompileError::internal("dfs block without parent"))?;

        let preds: Vec<BlockId> = graph.block(w).preds.iter().copied().collect();
        for v in preds {
            // Unreachable predecessors contribute nothing
            if graph.block(v).dfs_id == -1 {
                continue;
            }
            let u = evaluate(graph, v);
            let u_semi = graph.block(u).semi;
            if graph.block(u_semi).dfs_id < graph.block(graph.block(w).semi).dfs_id {
                graph.block_mut(w).semi = u_semi;
            }
        }

        let semi = graph.block(w).semi;
        graph.block_mut(semi).dominates.push(w);
        graph.block_mut(w).ancestor = Some(parent);

        // Empty the parent's bucket, assigning preliminary dominators
        while let Some(v) = pop_front(&mut graph.block_mut(parent).dominates) {
            let u = evaluate(graph, v);
            let u_semi = graph.block(u).semi;
            let v_semi = graph.block(v).semi;
            if graph.block(u_semi).dfs_id < graph.block(v_semi).dfs_id {
                graph.block_mut(v).dominator = Some(u);
            } else {
                graph.block_mut(v).dominator = Some(parent);
            }
        }
    }

    // Forward sweep: fix dominators that disagree with their semidominators,
    // then repurpose `dominates` as the dominator-tree children list.
    for &w in &dfs_blocks {
        graph.block_mut(w).dominates.clear();
    }
    graph.block_mut(root).dominator_depth = 0;
    for &w in dfs_blocks.iter().skip(1) {
        let dom = graph
            .block(w)
            .dominator
            .ok_or_else(|| CompileError::internal("reachable block without dominator"))?;
        if dom != graph.block(w).semi {
            let fixed = graph
                .block(dom)
                .dominator
                .ok_or_else(|| CompileError::internal("dominator chain broken"))?;
            graph.block_mut(w).dominator = Some(fixed);
        }

        let dom = graph.block(w).dominator.unwrap();
        graph.block_mut(dom).dominates.push(w);
        // DFS order visits the dominator first, its depth is already set
        let depth = graph.block(dom).dominator_depth;
        graph.block_mut(w).dominator_depth = depth + 1;
    }

    Ok(())
}

/// Number blocks in DFS preorder, recording the spanning-tree parent
fn enumerate_dfs(graph: &mut HirGraph, root: BlockId) -> Vec<BlockId> {
    let mut order = Vec::new();
    let mut next_id = 0;

    graph.block_mut(root).dfs_id = next_id;
    next_id += 1;
    order.push(root);

    let mut stack: Vec<(BlockId, usize)> = vec![(root, 0)];
    while let Some(&(block, i)) = stack.last() {
        if i < graph.block(block).succs.len() {
            let succ = graph.block(block).succs[i];
            stack.last_mut().unwrap().1 += 1;
            if graph.block(succ).dfs_id == -1 {
                graph.block_mut(succ).parent = Some(block);
                graph.block_mut(succ).dfs_id = next_id;
                next_id += 1;
                order.push(succ);
                stack.push((succ, 0));
            }
        } else {
            stack.pop();
        }
    }

    order
}

/// Path-compressing link-eval
fn evaluate(graph: &mut HirGraph, block: BlockId) -> BlockId {
    if graph.block(block).ancestor.is_none() {
        return block;
    }
    compress(graph, block);
    graph.block(block).label
}

fn compress(graph: &mut HirGraph, block: BlockId) {
    // Collect the ancestor chain bottom-up, then fold labels top-down
    let mut chain = vec![block];
    loop {
        let top = *chain.last().unwrap();
        let anc = graph.block(top).ancestor.unwrap();
        if graph.block(anc).ancestor.is_some() {
            chain.push(anc);
        } else {
            break;
        }
    }

    for &b in chain.iter().rev() {
        let anc = graph.block(b).ancestor.unwrap();
        let anc_label = graph.block(anc).label;
        let b_label = graph.block(b).label;
        let anc_semi = graph.block(anc_label).semi;
        let b_semi = graph.block(b_label).semi;
        if graph.block(anc_semi).dfs_id < graph.block(b_semi).dfs_id {
            graph.block_mut(b).label = anc_label;
        }
        if let Some(up) = graph.block(anc).ancestor {
            graph.block_mut(b).ancestor = Some(up);
        }
    }
}

fn pop_front(list: &mut Vec<BlockId>) -> Option<BlockId> {
    if list.is_empty() {
        None
    } else {
        Some(list.remove(0))
    }
}
