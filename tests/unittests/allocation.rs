//! Register allocator properties over full compiles

use candor::ast::{AstNode, BinOpKind};
use candor::lir::{IntervalKind, LirKind, UseKind};
use candor::{compile, CompileOptions};

use crate::common::{check_allocation, function, gap_scratches, if_stmt};

#[test]
fn straight_line_allocation_is_consistent() {
    let ast = function(
        vec![AstNode::ret(AstNode::bin_op(
            BinOpKind::Add,
            AstNode::number(1.0),
            AstNode::number(2.0),
        ))],
        0,
    );
    let result = compile(&ast, "alloc.can", &CompileOptions::default()).unwrap();
    check_allocation(&result.functions[0].lir);
}

#[test]
fn low_pressure_program_spills_nothing() {
    // Three values live at once: far below the ten-register file. Only gap
    // scratch slots may touch the stack.
    let mut params = Vec::new();
    for i in 0..3 {
        params.push(AstNode::stack_value(i));
    }
    let sum = AstNode::bin_op(
        BinOpKind::Add,
        AstNode::bin_op(
            BinOpKind::Add,
            AstNode::stack_value(0),
            AstNode::stack_value(1),
        ),
        AstNode::stack_value(2),
    );
    let ast = AstNode::function(params, vec![AstNode::ret(sum)], 3);

    let result = compile(&ast, "pressure.can", &CompileOptions::default()).unwrap();
    let lir = &result.functions[0].lir;
    check_allocation(lir);

    let scratches = gap_scratches(lir);
    for (idx, interval) in lir.intervals.iter().enumerate() {
        if interval.kind == IntervalKind::Stack {
            assert!(
                scratches.contains(&candor::lir::IntervalId(idx as u32)),
                "value interval {} was spilled under low pressure",
                idx
            );
        }
    }
}

#[test]
fn high_pressure_program_spills_and_stays_consistent() {
    // Twelve parameters all live until the final sum: more than the file
    // can hold, so something must take a frame slot.
    let n = 12;
    let mut params = Vec::new();
    for i in 0..n {
        params.push(AstNode::stack_value(i));
    }
    let mut sum = AstNode::stack_value(0);
    for i in 1..n {
        sum = AstNode::bin_op(BinOpKind::Add, sum, AstNode::stack_value(i));
    }
    let ast = AstNode::function(params, vec![AstNode::ret(sum)], n);

    let result = compile(&ast, "pressure.can", &CompileOptions::default()).unwrap();
    let lir = &result.functions[0].lir;
    check_allocation(lir);

    let scratches = gap_scratches(lir);
    let spilled_values = lir
        .intervals
        .iter()
        .enumerate()
        .filter(|(idx, iv)| {
            iv.kind == IntervalKind::Stack
                && !scratches.contains(&candor::lir::IntervalId(*idx as u32))
        })
        .count();
    assert!(spilled_values > 0, "twelve live values must force a spill");
}

#[test]
fn calls_clobber_the_register_file() {
    // g(); return a + b  -- a and b live across the call cannot stay in
    // registers over it
    let ast = AstNode::function(
        vec![AstNode::stack_value(0), AstNode::stack_value(1)],
        vec![
            AstNode::call(AstNode::stack_value(2), vec![]),
            AstNode::ret(AstNode::bin_op(
                BinOpKind::Add,
                AstNode::stack_value(0),
                AstNode::stack_value(1),
            )),
        ],
        3,
    );
    let result = compile(&ast, "call.can", &CompileOptions::default()).unwrap();
    let lir = &result.functions[0].lir;
    check_allocation(lir);

    let call_pos = lir
        .instrs
        .iter()
        .find(|i| matches!(i.kind, LirKind::Call))
        .unwrap()
        .pos;
    // Every allocated (non-fixed) register interval avoids the call site
    for interval in &lir.intervals {
        if interval.kind == IntervalKind::Register && !interval.fixed {
            assert!(
                !interval.covers(call_pos),
                "a caller-saved value is still in a register at the call"
            );
        }
    }
}

#[test]
fn split_intervals_agree_across_edges() {
    // A diamond with enough arithmetic to force splitting; every value live
    // into the join must arrive in the location the join expects, or a gap
    // move must bridge the difference.
    let mut params = Vec::new();
    for i in 0..8 {
        params.push(AstNode::stack_value(i));
    }
    let mut then_sum = AstNode::stack_value(0);
    let mut else_sum = AstNode::stack_value(7);
    for i in 1..8 {
        then_sum = AstNode::bin_op(BinOpKind::Add, then_sum, AstNode::stack_value(i));
        else_sum = AstNode::bin_op(BinOpKind::Sub, else_sum, AstNode::stack_value(7 - i));
    }
    let ast = AstNode::function(
        params,
        vec![
            if_stmt(
                AstNode::stack_value(0),
                vec![AstNode::assign(AstNode::stack_value(0), then_sum)],
                vec![AstNode::assign(AstNode::stack_value(0), else_sum)],
            ),
            AstNode::ret(AstNode::stack_value(0)),
        ],
        8,
    );
    let result = compile(&ast, "edges.can", &CompileOptions::default()).unwrap();
    let lir = &result.functions[0].lir;
    check_allocation(lir);

    for (bi, block) in lir.blocks.iter().enumerate() {
        for &succ in &block.succs {
            for &interval in &lir.blocks[succ].live_in {
                let parent = lir.interval(interval).split_parent.unwrap_or(interval);
                if lir.interval(parent).split_children.is_empty() {
                    continue;
                }
                let left = lir.child_at(parent, block.end).unwrap();
                let right = lir.child_at(parent, lir.blocks[succ].start).unwrap();
                if left == right {
                    continue;
                }
                // A gap move must bridge the edge
                let bridged = lir.instrs.iter().any(|instr| {
                    instr
                        .gap
                        .as_ref()
                        .map(|gap| {
                            gap.moves.iter().any(|m| {
                                lir.use_site(m.src).interval == left
                                    && lir.use_site(m.dst).interval == right
                            })
                        })
                        .unwrap_or(false)
                });
                assert!(
                    bridged,
                    "edge {} -> {} leaves a split value unconnected",
                    bi, succ
                );
            }
        }
    }
}

#[test]
fn register_constrained_uses_are_satisfied_everywhere() {
    let ast = function(
        vec![
            AstNode::assign(
                AstNode::stack_value(0),
                AstNode::new(candor::ast::AstKind::ObjectLiteral {
                    keys: vec![AstNode::property("x")],
                    values: vec![AstNode::number(1.0)],
                }),
            ),
            AstNode::ret(AstNode::member(
                AstNode::stack_value(0),
                AstNode::property("x"),
            )),
        ],
        1,
    );
    let result = compile(&ast, "uses.can", &CompileOptions::default()).unwrap();
    let lir = &result.functions[0].lir;
    for site in &lir.uses {
        if site.kind == UseKind::Register {
            assert!(lir.interval(site.interval).is_register());
        }
    }
}

#[test]
fn fallthrough_gotos_are_removed() {
    let ast = function(
        vec![
            if_stmt(
                AstNode::stack_value(0),
                vec![AstNode::assign(
                    AstNode::stack_value(0),
                    AstNode::number(1.0),
                )],
                vec![AstNode::assign(
                    AstNode::stack_value(0),
                    AstNode::number(2.0),
                )],
            ),
            AstNode::ret(AstNode::stack_value(0)),
        ],
        1,
    );
    let result = compile(&ast, "fallthrough.can", &CompileOptions::default()).unwrap();
    let lir = &result.functions[0].lir;

    // Every surviving goto targets a non-adjacent block
    for (bi, block) in lir.blocks.iter().enumerate() {
        for &id in &block.instructions {
            let instr = lir.instr(id);
            if matches!(instr.kind, LirKind::Goto) {
                assert!(!instr.targets.is_empty());
                assert_ne!(instr.targets[0], bi + 1, "fall-through goto survived");
            }
            if matches!(instr.kind, LirKind::Branch) {
                assert_eq!(instr.targets.len(), 2);
            }
        }
    }
}

#[test]
fn spill_slot_indices_never_collide_in_time() {
    let n = 14;
    let mut params = Vec::new();
    for i in 0..n {
        params.push(AstNode::stack_value(i));
    }
    let mut sum = AstNode::stack_value(0);
    for i in 1..n {
        sum = AstNode::bin_op(BinOpKind::Add, sum, AstNode::stack_value(i));
    }
    let ast = AstNode::function(params, vec![AstNode::ret(sum)], n);
    let result = compile(&ast, "slots.can", &CompileOptions::default()).unwrap();
    let lir = &result.functions[0].lir;

    for a in 0..lir.intervals.len() {
        for b in (a + 1)..lir.intervals.len() {
            let (ia, ib) = (&lir.intervals[a], &lir.intervals[b]);
            if ia.kind != IntervalKind::Stack || ib.kind != IntervalKind::Stack {
                continue;
            }
            if ia.index != ib.index || ia.index < 0 {
                continue;
            }
            for ra in &ia.ranges {
                for rb in &ib.ranges {
                    assert!(
                        ra.end <= rb.start || rb.end <= ra.start,
                        "spill slot {} double-booked",
                        ia.index
                    );
                }
            }
        }
    }
    assert!(lir.spill_slots > 0);
}
