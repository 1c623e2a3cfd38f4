//! Global value numbering
//!
//! One structural map per function root. Inputs are numbered before their
//! users so the canonical identity of an instruction is stable by the time
//! it is inserted. Side-effecting instructions are never numbered, and the
//! pure kinds are only numbered when the effect chain shows nothing
//! clobbering upstream of their arguments.

use rustc_hash::FxHashMap;

use crate::ast::BinOpKind;
use crate::hir::graph::HirGraph;
use crate::hir::instr::{HirKind, InstrId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Key {
    BinOp(BinOpKind, InstrId, InstrId),
    Not(InstrId),
}

pub fn global_value_numbering(graph: &mut HirGraph) {
    for instr in &mut graph.instrs {
        instr.gvn_visited = false;
    }

    for root in graph.roots.clone() {
        let mut map: FxHashMap<Key, InstrId> = FxHashMap::default();

        // Blocks of this root, in construction order
        let mut worklist = vec![root];
        let mut seen = vec![root];
        while let Some(block) = worklist.pop() {
            for succ in graph.block(block).succs.clone() {
                if !seen.contains(&succ) {
                    seen.push(succ);
                    worklist.push(succ);
                }
            }
        }
        seen.sort();

        for block in seen {
            for instr in graph.block(block).instructions.clone() {
                number(graph, &mut map, instr);
            }
        }
    }
}

fn number(graph: &mut HirGraph, map: &mut FxHashMap<Key, InstrId>, id: InstrId) {
    if graph.instr(id).removed || graph.instr(id).gvn_visited {
        return;
    }
    graph.instr_mut(id).gvn_visited = true;

    for arg in graph.instr(id).args.clone() {
        number(graph, map, arg);
    }

    let Some(key) = key_of(graph, id) else {
        return;
    };

    match map.get(&key) {
        Some(&canonical) if canonical != id => {
            graph.replace_all_uses(id, canonical);
            graph.remove_instr(id);
        }
        Some(_) => {}
        None => {
            map.insert(key, id);
        }
    }
}

/// Only pure value kinds with a clean effect horizon are numberable.
/// Literals are keyed per occurrence and therefore never merge.
fn key_of(graph: &HirGraph, id: InstrId) -> Option<Key> {
    let instr = graph.instr(id);
    if !instr.effects_in.is_empty() {
        return None;
    }
    match instr.kind {
        HirKind::BinOp(op) => Some(Key::BinOp(op, instr.args[0], instr.args[1])),
        HirKind::Not => Some(Key::Not(instr.args[0])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstNode;
    use crate::hir::builder::build;
    use crate::hir::optimize::effects::{compute_effects, compute_reachability};

    fn live_binops(graph: &HirGraph) -> usize {
        graph
            .instrs
            .iter()
            .filter(|i| matches!(i.kind, HirKind::BinOp(_)) && !i.removed)
            .count()
    }

    #[test]
    fn test_identical_binops_over_same_values_merge() {
        // k = a + a; m = a + a; return k + m  -- with a read once, both sums
        // share arguments and collapse to one instruction
        let a = AstNode::stack_value(0);
        let ast = AstNode::function(
            vec![AstNode::stack_value(0)],
            vec![
                AstNode::assign(
                    AstNode::stack_value(1),
                    AstNode::bin_op(BinOpKind::Add, a.clone(), a.clone()),
                ),
                AstNode::assign(
                    AstNode::stack_value(2),
                    AstNode::bin_op(BinOpKind::Add, a.clone(), a.clone()),
                ),
                AstNode::ret(AstNode::bin_op(
                    BinOpKind::Add,
                    AstNode::stack_value(1),
                    AstNode::stack_value(2),
                )),
            ],
            3,
        );
        let mut graph = build(&ast).unwrap();
        compute_reachability(&mut graph);
        compute_effects(&mut graph);

        assert_eq!(live_binops(&graph), 3);
        global_value_numbering(&mut graph);
        assert_eq!(live_binops(&graph), 2, "one of the twin sums must fold");

        // The final sum now adds the canonical value to itself
        let ret = graph
            .instrs
            .iter()
            .find(|i| matches!(i.kind, HirKind::Return) && i.block.is_some())
            .unwrap();
        let sum = graph.instr(ret.args[0]);
        assert_eq!(sum.args[0], sum.args[1]);
    }

    #[test]
    fn test_distinct_literals_do_not_merge() {
        // return (1 + 2) + (1 + 2)  -- each occurrence of 1 and 2 is its own
        // literal, so the sums have different arguments and stay apart
        let ast = AstNode::function(
            vec![],
            vec![AstNode::ret(AstNode::bin_op(
                BinOpKind::Add,
                AstNode::bin_op(BinOpKind::Add, AstNode::number(1.0), AstNode::number(2.0)),
                AstNode::bin_op(BinOpKind::Add, AstNode::number(1.0), AstNode::number(2.0)),
            ))],
            0,
        );
        let mut graph = build(&ast).unwrap();
        compute_reachability(&mut graph);
        compute_effects(&mut graph);
        global_value_numbering(&mut graph);
        assert_eq!(live_binops(&graph), 3);
    }

    #[test]
    fn test_idempotent() {
        let a = AstNode::stack_value(0);
        let ast = AstNode::function(
            vec![AstNode::stack_value(0)],
            vec![
                AstNode::assign(
                    AstNode::stack_value(1),
                    AstNode::bin_op(BinOpKind::Add, a.clone(), a.clone()),
                ),
                AstNode::ret(AstNode::bin_op(BinOpKind::Add, a.clone(), a.clone())),
            ],
            2,
        );
        let mut graph = build(&ast).unwrap();
        compute_reachability(&mut graph);
        compute_effects(&mut graph);
        global_value_numbering(&mut graph);
        let snapshot: Vec<_> = graph.instrs.iter().map(|i| i.removed).collect();
        global_value_numbering(&mut graph);
        let again: Vec<_> = graph.instrs.iter().map(|i| i.removed).collect();
        assert_eq!(snapshot, again);
    }
}
