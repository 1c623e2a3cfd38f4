//! Shared helpers for the test suite

#![allow(dead_code)]

use candor::ast::{AstKind, AstNode, BinOpKind};
use candor::lir::{IntervalKind, Lir, UseKind};

/// Wrap statements into a top-level function node
pub fn function(body: Vec<AstNode>, stack_slots: usize) -> AstNode {
    AstNode::function(vec![], body, stack_slots)
}

/// `target = lhs op rhs` over stack slots
pub fn assign_binop(target: usize, op: BinOpKind, lhs: AstNode, rhs: AstNode) -> AstNode {
    AstNode::assign(AstNode::stack_value(target), AstNode::bin_op(op, lhs, rhs))
}

pub fn if_stmt(cond: AstNode, then_body: Vec<AstNode>, else_body: Vec<AstNode>) -> AstNode {
    AstNode::new(AstKind::If {
        cond: Box::new(cond),
        then_body,
        else_body: Some(else_body),
    })
}

pub fn while_stmt(cond: AstNode, body: Vec<AstNode>) -> AstNode {
    AstNode::new(AstKind::While {
        cond: Box::new(cond),
        body,
    })
}

/// Check the central allocation invariants over allocated LIR:
/// same-register intervals never overlap, same-spill-slot intervals never
/// overlap, and every register-constrained use ended up in a register.
pub fn check_allocation(lir: &Lir) {
    // Register disjointness (fixed intervals included)
    for a in 0..lir.intervals.len() {
        for b in (a + 1)..lir.intervals.len() {
            let ia = &lir.intervals[a];
            let ib = &lir.intervals[b];
            let same_reg = ia.kind == IntervalKind::Register
                && ib.kind == IntervalKind::Register
                && ia.index == ib.index;
            let same_slot = ia.kind == IntervalKind::Stack
                && ib.kind == IntervalKind::Stack
                && ia.index >= 0
                && ia.index == ib.index;
            if !(same_reg || same_slot) {
                continue;
            }
            for ra in &ia.ranges {
                for rb in &ib.ranges {
                    let disjoint = ra.end <= rb.start || rb.end <= ra.start;
                    assert!(
                        disjoint,
                        "intervals {} and {} share location {:?}/{} over [{},{}) and [{},{})",
                        a, b, ia.kind, ia.index, ra.start, ra.end, rb.start, rb.end
                    );
                }
            }
        }
    }

    // Register constraints are honored
    for (ui, site) in lir.uses.iter().enumerate() {
        if site.kind == UseKind::Register {
            let interval = lir.interval(site.interval);
            assert!(
                interval.is_register(),
                "register-constrained use {} landed in {:?}",
                ui,
                interval.kind
            );
        }
    }
}

/// Intervals handed out as gap scratch slots
pub fn gap_scratches(lir: &Lir) -> Vec<candor::lir::IntervalId> {
    lir.instrs
        .iter()
        .filter_map(|i| i.gap.as_ref().map(|g| g.scratch))
        .collect()
}
