// Property tests: random programs through the whole pipeline
//
// Catches nondeterminism and allocation inconsistencies that hand-written
// cases miss.

use candor::ast::{AstKind, AstNode, BinOpKind};
use candor::{compile, CompileOptions};
use proptest::prelude::*;

use crate::common::check_allocation;

const SLOTS: usize = 4;

#[derive(Debug, Clone)]
enum Operand {
    Slot(usize),
    Literal(i32),
}

#[derive(Debug, Clone)]
struct Statement {
    target: usize,
    op: BinOpKind,
    lhs: Operand,
    rhs: Operand,
}

fn arb_operand() -> impl Strategy<Value = Operand> {
    prop_oneof![
        (0..SLOTS).prop_map(Operand::Slot),
        (-100i32..100).prop_map(Operand::Literal),
    ]
}

fn arb_op() -> impl Strategy<Value = BinOpKind> {
    prop_oneof![
        Just(BinOpKind::Add),
        Just(BinOpKind::Sub),
        Just(BinOpKind::Mul),
        Just(BinOpKind::Lt),
        Just(BinOpKind::Eq),
    ]
}

fn arb_statement() -> impl Strategy<Value = Statement> {
    (0..SLOTS, arb_op(), arb_operand(), arb_operand()).prop_map(|(target, op, lhs, rhs)| {
        Statement {
            target,
            op,
            lhs,
            rhs,
        }
    })
}

fn operand_ast(operand: &Operand) -> AstNode {
    match operand {
        Operand::Slot(i) => AstNode::stack_value(*i),
        Operand::Literal(n) => AstNode::number(*n as f64),
    }
}

fn statement_ast(statement: &Statement) -> AstNode {
    AstNode::assign(
        AstNode::stack_value(statement.target),
        AstNode::bin_op(
            statement.op,
            operand_ast(&statement.lhs),
            operand_ast(&statement.rhs),
        ),
    )
}

/// Straight-line program over a handful of slots
fn straight_line(statements: &[Statement]) -> AstNode {
    let mut body: Vec<AstNode> = statements.iter().map(statement_ast).collect();
    body.push(AstNode::ret(AstNode::stack_value(0)));
    AstNode::function(vec![], body, SLOTS)
}

/// The same statements split across an if/else diamond
fn diamond(cond_slot: usize, then: &[Statement], other: &[Statement]) -> AstNode {
    let body = vec![
        AstNode::new(AstKind::If {
            cond: Box::new(AstNode::stack_value(cond_slot)),
            then_body: then.iter().map(statement_ast).collect(),
            else_body: Some(other.iter().map(statement_ast).collect()),
        }),
        AstNode::ret(AstNode::stack_value(0)),
    ];
    AstNode::function(vec![], body, SLOTS)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn straight_line_compiles_consistently(
        statements in prop::collection::vec(arb_statement(), 1..8)
    ) {
        let ast = straight_line(&statements);
        let result = compile(&ast, "prop.can", &CompileOptions::default()).unwrap();
        prop_assert_eq!(result.functions.len(), 1);
        check_allocation(&result.functions[0].lir);
    }

    #[test]
    fn diamonds_compile_consistently(
        cond in 0..SLOTS,
        then in prop::collection::vec(arb_statement(), 1..5),
        other in prop::collection::vec(arb_statement(), 1..5),
    ) {
        let ast = diamond(cond, &then, &other);
        let result = compile(&ast, "prop.can", &CompileOptions::default()).unwrap();
        check_allocation(&result.functions[0].lir);
    }

    #[test]
    fn compilation_is_deterministic(
        statements in prop::collection::vec(arb_statement(), 1..8)
    ) {
        let ast = straight_line(&statements);
        let a = compile(&ast, "a.can", &CompileOptions::default()).unwrap();
        let b = compile(&ast, "b.can", &CompileOptions::default()).unwrap();
        prop_assert_eq!(a.hir.print(), b.hir.print());
        prop_assert_eq!(
            a.functions[0].lir.print(),
            b.functions[0].lir.print()
        );
    }

    #[test]
    fn optimization_is_idempotent(
        statements in prop::collection::vec(arb_statement(), 1..8)
    ) {
        let ast = straight_line(&statements);
        let mut result = compile(&ast, "idem.can", &CompileOptions::default()).unwrap();
        let before = result.hir.print();
        candor::hir::optimize(&mut result.hir).unwrap();
        prop_assert_eq!(before, result.hir.print());
    }
}
