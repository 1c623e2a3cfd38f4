//! End-to-end HIR scenarios: source shapes in, optimized SSA out

use candor::ast::{AstKind, AstNode, BinOpKind, UnOpKind};
use candor::hir::{BlockId, HirGraph, HirKind, LitValue};
use candor::{compile, CompileOptions};

use crate::common::function;

fn compile_hir(ast: AstNode) -> HirGraph {
    compile(&ast, "scenario.can", &CompileOptions::default())
        .unwrap()
        .hir
}

/// (mnemonic, id, arg ids) for every instruction of a block
fn listing(hir: &HirGraph, block: BlockId) -> Vec<(String, i32, Vec<i32>)> {
    hir.block(block)
        .instructions
        .iter()
        .map(|&i| {
            let instr = hir.instr(i);
            (
                instr.kind.mnemonic().to_string(),
                instr.id,
                instr.args.iter().map(|&a| hir.instr(a).id).collect(),
            )
        })
        .collect()
}

#[test]
fn scenario_return_sum() {
    // return 1 + 2
    let hir = compile_hir(function(
        vec![AstNode::ret(AstNode::bin_op(
            BinOpKind::Add,
            AstNode::number(1.0),
            AstNode::number(2.0),
        ))],
        0,
    ));
    let root = hir.roots[0];
    assert_eq!(
        listing(&hir, root),
        vec![
            ("Entry".to_string(), 0, vec![]),
            ("Literal".to_string(), 2, vec![]),
            ("Literal".to_string(), 4, vec![]),
            ("BinOp".to_string(), 6, vec![2, 4]),
            ("Return".to_string(), 8, vec![6]),
        ]
    );
}

#[test]
fn scenario_object_store_delete_load() {
    // a = {}; a.b = 1; delete a.b; return a.b
    let hir = compile_hir(function(
        vec![
            AstNode::assign(
                AstNode::stack_value(0),
                AstNode::new(AstKind::ObjectLiteral {
                    keys: vec![],
                    values: vec![],
                }),
            ),
            AstNode::assign(
                AstNode::member(AstNode::stack_value(0), AstNode::property("b")),
                AstNode::number(1.0),
            ),
            AstNode::new(AstKind::Delete(Box::new(AstNode::member(
                AstNode::stack_value(0),
                AstNode::property("b"),
            )))),
            AstNode::ret(AstNode::member(
                AstNode::stack_value(0),
                AstNode::property("b"),
            )),
        ],
        1,
    ));
    let root = hir.roots[0];
    assert_eq!(
        listing(&hir, root),
        vec![
            ("Entry".to_string(), 0, vec![]),
            ("AllocateObject".to_string(), 2, vec![]),
            ("Literal".to_string(), 4, vec![]),
            ("Literal".to_string(), 6, vec![]),
            ("StoreProperty".to_string(), 8, vec![2, 6, 4]),
            ("Literal".to_string(), 10, vec![]),
            ("DeleteProperty".to_string(), 12, vec![2, 10]),
            ("Nil".to_string(), 14, vec![]),
            ("Literal".to_string(), 16, vec![]),
            ("LoadProperty".to_string(), 18, vec![2, 16]),
            ("Return".to_string(), 20, vec![18]),
        ]
    );
}

#[test]
fn scenario_if_else_phi() {
    // if (a) { a = 2 } else { a = 3 } return a
    let hir = compile_hir(function(
        vec![
            crate::common::if_stmt(
                AstNode::stack_value(0),
                vec![AstNode::assign(
                    AstNode::stack_value(0),
                    AstNode::number(2.0),
                )],
                vec![AstNode::assign(
                    AstNode::stack_value(0),
                    AstNode::number(3.0),
                )],
            ),
            AstNode::ret(AstNode::stack_value(0)),
        ],
        1,
    ));

    let join = hir
        .blocks
        .iter()
        .find(|b| b.preds.len() == 2)
        .expect("join block");
    assert_eq!(join.phis.len(), 1);

    let phi = hir.instr(join.phis[0]);
    assert_eq!(phi.id, 14);
    assert_eq!(
        phi.args
            .iter()
            .map(|&a| (hir.instr(a).id, hir.instr(a).kind.clone()))
            .collect::<Vec<_>>(),
        vec![
            (6, HirKind::Literal(LitValue::Num(2.0))),
            (8, HirKind::Literal(LitValue::Num(3.0))),
        ]
    );

    let ret = hir
        .instrs
        .iter()
        .find(|i| matches!(i.kind, HirKind::Return) && !i.removed && i.block == Some(join.id))
        .expect("return in join");
    assert_eq!(hir.instr(ret.args[0]).id, 14);
}

#[test]
fn scenario_while_accumulator_phi() {
    // while (--i) { k = k + 1 } return k
    let hir = compile_hir(function(
        vec![
            crate::common::while_stmt(
                AstNode::un_op(UnOpKind::PreDec, AstNode::stack_value(0)),
                vec![AstNode::assign(
                    AstNode::stack_value(1),
                    AstNode::bin_op(
                        BinOpKind::Add,
                        AstNode::stack_value(1),
                        AstNode::number(1.0),
                    ),
                )],
            ),
            AstNode::ret(AstNode::stack_value(1)),
        ],
        2,
    ));

    let header = hir.blocks.iter().find(|b| b.is_loop).expect("loop header");

    // The accumulator keeps a phi joining its initial value and the
    // incremented value
    let k_phi = header
        .phis
        .iter()
        .map(|&p| hir.instr(p))
        .find(|p| matches!(hir.instr(p.args[1]).kind, HirKind::BinOp(BinOpKind::Add)))
        .expect("phi for the accumulator");
    assert_eq!(k_phi.args.len(), 2);
    assert!(matches!(hir.instr(k_phi.args[0]).kind, HirKind::Nil));

    // Return reads the phi
    let ret = hir
        .instrs
        .iter()
        .find(|i| matches!(i.kind, HirKind::Return) && !i.removed && i.block.is_some())
        .expect("return");
    assert!(hir.instr(ret.args[0]).is_phi());
    assert_eq!(hir.instr(ret.args[0]).id, k_phi.id);
}

#[test]
fn scenario_short_circuit_and() {
    // i = 0; return i && 1
    let hir = compile_hir(function(
        vec![
            AstNode::assign(AstNode::stack_value(0), AstNode::number(0.0)),
            AstNode::ret(AstNode::bin_op(
                BinOpKind::LAnd,
                AstNode::stack_value(0),
                AstNode::number(1.0),
            )),
        ],
        1,
    ));

    // The diamond joins on the reserved logic slot; the phi reads
    // (lhs, rhs) in that order
    let join = hir
        .blocks
        .iter()
        .find(|b| b.preds.len() == 2 && !b.phis.is_empty())
        .expect("short-circuit join");
    let phi = hir.instr(join.phis[0]);
    assert_eq!(phi.args.len(), 2);
    assert_eq!(
        hir.instr(phi.args[0]).kind,
        HirKind::Literal(LitValue::Num(0.0)),
        "first phi input is the left operand"
    );
    assert_eq!(
        hir.instr(phi.args[1]).kind,
        HirKind::Literal(LitValue::Num(1.0)),
        "second phi input is the right operand"
    );

    let ret = hir
        .instrs
        .iter()
        .find(|i| matches!(i.kind, HirKind::Return) && !i.removed && i.block == Some(join.id))
        .expect("return");
    assert!(hir.instr(ret.args[0]).is_phi());
}

#[test]
fn scenario_vararg_call_protocol() {
    // fn(1, 2, [3, 4]...)
    let array = AstNode::new(AstKind::ArrayLiteral(vec![
        AstNode::number(3.0),
        AstNode::number(4.0),
    ]));
    let hir = compile_hir(function(
        vec![
            AstNode::call(
                AstNode::stack_value(0),
                vec![
                    AstNode::number(1.0),
                    AstNode::number(2.0),
                    AstNode::new(AstKind::VarArg(Box::new(array))),
                ],
            ),
            AstNode::ret(AstNode::nil()),
        ],
        1,
    ));
    let root = hir.roots[0];

    let tail: Vec<&HirKind> = hir
        .block(root)
        .instructions
        .iter()
        .map(|&i| &hir.instr(i).kind)
        .filter(|k| {
            matches!(
                k,
                HirKind::AlignStack
                    | HirKind::StoreVarArg
                    | HirKind::StoreArg
                    | HirKind::Call
            )
        })
        .collect();
    assert_eq!(
        tail,
        vec![
            &HirKind::AlignStack,
            &HirKind::StoreVarArg,
            &HirKind::StoreArg,
            &HirKind::StoreArg,
            &HirKind::Call,
        ]
    );

    // argc is 2 plus the vararg's size
    let call = hir
        .instrs
        .iter()
        .find(|i| matches!(i.kind, HirKind::Call) && !i.removed)
        .unwrap();
    let argc = hir.instr(call.args[1]);
    assert!(matches!(argc.kind, HirKind::BinOp(BinOpKind::Add)));
    assert_eq!(
        hir.instr(argc.args[0]).kind,
        HirKind::Literal(LitValue::Num(2.0))
    );
    assert!(matches!(hir.instr(argc.args[1]).kind, HirKind::Sizeof));

    // Stores run in reverse positional order
    let stores: Vec<&candor::hir::HirInstr> = hir
        .block(root)
        .instructions
        .iter()
        .map(|&i| hir.instr(i))
        .filter(|i| matches!(i.kind, HirKind::StoreArg))
        .collect();
    assert_eq!(
        hir.instr(stores[0].args[0]).kind,
        HirKind::Literal(LitValue::Num(2.0))
    );
    assert_eq!(
        hir.instr(stores[1].args[0]).kind,
        HirKind::Literal(LitValue::Num(1.0))
    );
}

#[test]
fn scenario_method_call_evaluates_receiver_once() {
    // a.b(1) -- the receiver feeds both the property load and the first
    // positional argument
    let hir = compile_hir(function(
        vec![
            AstNode::assign(
                AstNode::stack_value(0),
                AstNode::new(AstKind::ObjectLiteral {
                    keys: vec![],
                    values: vec![],
                }),
            ),
            AstNode::call(
                AstNode::member(AstNode::stack_value(0), AstNode::property("b")),
                vec![AstNode::new(AstKind::SelfArg), AstNode::number(1.0)],
            ),
            AstNode::ret(AstNode::nil()),
        ],
        1,
    ));

    let alloc = hir
        .instrs
        .iter()
        .enumerate()
        .find(|(_, i)| matches!(i.kind, HirKind::AllocateObject) && !i.removed)
        .map(|(idx, _)| idx)
        .unwrap();

    let load = hir
        .instrs
        .iter()
        .find(|i| matches!(i.kind, HirKind::LoadProperty) && !i.removed)
        .expect("property load for the callee");
    assert_eq!(load.args[0].index(), alloc);

    // One of the stores pushes the same receiver
    let receiver_stores = hir
        .instrs
        .iter()
        .filter(|i| {
            matches!(i.kind, HirKind::StoreArg) && !i.removed && i.args[0].index() == alloc
        })
        .count();
    assert_eq!(receiver_stores, 1);
}
