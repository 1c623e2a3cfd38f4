//! Structural invariants of the optimized SSA graph

use candor::ast::{AstNode, BinOpKind, UnOpKind};
use candor::hir::{HirGraph, InstrId};
use candor::{compile, CompileOptions};

use crate::common::{assign_binop, function, if_stmt, while_stmt};

fn sample_program() -> AstNode {
    // A branch, a loop and some arithmetic in one function
    function(
        vec![
            AstNode::assign(AstNode::stack_value(0), AstNode::number(10.0)),
            if_stmt(
                AstNode::stack_value(0),
                vec![assign_binop(
                    1,
                    BinOpKind::Add,
                    AstNode::stack_value(0),
                    AstNode::number(1.0),
                )],
                vec![assign_binop(
                    1,
                    BinOpKind::Sub,
                    AstNode::stack_value(0),
                    AstNode::number(1.0),
                )],
            ),
            while_stmt(
                AstNode::un_op(UnOpKind::PreDec, AstNode::stack_value(0)),
                vec![assign_binop(
                    1,
                    BinOpKind::Add,
                    AstNode::stack_value(1),
                    AstNode::stack_value(0),
                )],
            ),
            AstNode::ret(AstNode::stack_value(1)),
        ],
        2,
    )
}

fn optimized(ast: AstNode) -> HirGraph {
    compile(&ast, "invariants.can", &CompileOptions::default())
        .unwrap()
        .hir
}

#[test]
fn uses_are_the_exact_reverse_of_args() {
    let hir = optimized(sample_program());
    for (idx, instr) in hir.instrs.iter().enumerate() {
        if instr.removed || instr.block.is_none() {
            continue;
        }
        let id = InstrId(idx as u32);
        for &arg in &instr.args {
            let expected = instr.args.iter().filter(|&&a| a == arg).count();
            let recorded = hir.instr(arg).uses.iter().filter(|&&u| u == id).count();
            assert_eq!(
                recorded, expected,
                "i{} lists i{} as arg {} times but is recorded {} times",
                instr.id,
                hir.instr(arg).id,
                expected,
                recorded
            );
        }
        for &user in &instr.uses {
            assert!(
                hir.instr(user).args.contains(&id),
                "i{} claims user i{} which has no such arg",
                instr.id,
                hir.instr(user).id
            );
        }
    }
}

#[test]
fn block_degrees_are_bounded() {
    let hir = optimized(sample_program());
    for block in &hir.blocks {
        assert!(block.preds.len() <= 2);
        assert!(block.succs.len() <= 2);
        if !block.phis.is_empty() {
            assert!(
                block.preds.len() >= 2,
                "block {} has phis with {} predecessor(s)",
                block.id.0,
                block.preds.len()
            );
        }
    }
}

#[test]
fn finalized_blocks_end_with_one_control_instruction() {
    let hir = optimized(sample_program());
    for block in &hir.blocks {
        if block.dfs_id == -1 {
            continue; // unreachable
        }
        let controls = block
            .instructions
            .iter()
            .filter(|&&i| hir.instr(i).is_control())
            .count();
        assert_eq!(controls, 1, "block {}", block.id.0);
        let last = *block.instructions.last().unwrap();
        assert!(hir.instr(last).is_control());
    }
}

#[test]
fn dominator_tree_is_consistent() {
    let hir = optimized(sample_program());
    let root = hir.roots[0];
    for block in &hir.blocks {
        if block.dfs_id == -1 {
            continue;
        }
        if block.id == root {
            assert_eq!(block.dominator_depth, 0);
            assert!(block.dominator.is_none());
            continue;
        }
        let dom = block.dominator.expect("reachable block has a dominator");
        assert_ne!(dom, block.id, "no block strictly dominates itself");
        assert_eq!(
            block.dominator_depth,
            hir.block(dom).dominator_depth + 1
        );
        assert!(
            hir.block(dom).dominates.contains(&block.id),
            "children list out of sync"
        );
    }
}

#[test]
fn surviving_phis_are_nontrivial() {
    let hir = optimized(sample_program());
    for instr in &hir.instrs {
        if instr.removed || !instr.is_phi() {
            continue;
        }
        assert_eq!(instr.args.len(), 2);
        assert_ne!(instr.args[0], instr.args[1]);
        assert!(!instr.uses.is_empty());
    }
}

#[test]
fn optimization_pipeline_is_idempotent() {
    let mut hir = optimized(sample_program());
    let before = hir.print();
    candor::hir::optimize(&mut hir).unwrap();
    assert_eq!(before, hir.print(), "second optimization pass changed the graph");
}
