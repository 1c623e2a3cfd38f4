//! End-to-end compilation pipeline: AST → HIR → optimized SSA → allocated LIR
//!
//! One `compile` call handles one top-level function and every function
//! literal nested in it; each literal becomes its own allocated LIR graph
//! ready for the machine-code emitter.

use log::{debug, trace};

use crate::ast::AstNode;
use crate::error::CompileError;
use crate::hir::instr::BlockId;
use crate::hir::{self, HirGraph, HirKind};
use crate::lir::{self, Lir};

/// Per-compile configuration. Replaces process-wide logging toggles: tracing
/// renders the IR printers through the `log` crate for this compile only.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Log the optimized HIR graph
    pub trace_hir: bool,
    /// Log each function's allocated LIR
    pub trace_lir: bool,
}

/// One function's worth of emitter-ready LIR
#[derive(Debug)]
pub struct CompiledFunction {
    /// HIR root block this function was lowered from
    pub root: BlockId,
    pub lir: Lir,
}

/// Result of compiling one top-level function and its nested literals
#[derive(Debug)]
pub struct CompileResult {
    pub hir: HirGraph,
    /// Main function first, nested literals after, in creation order
    pub functions: Vec<CompiledFunction>,
}

/// Compile a resolved AST. `filename` is used for diagnostics only.
pub fn compile(
    ast: &AstNode,
    filename: &str,
    options: &CompileOptions,
) -> Result<CompileResult, CompileError> {
    let mut graph = hir::build(ast)?;
    hir::optimize(&mut graph)?;

    if options.trace_hir {
        debug!(target: "candor::hir", "## HIR {} ##\n{}", filename, graph.print());
    }

    let mut functions = Vec::new();
    for root in graph.roots.clone() {
        // A literal swept by dead code keeps its blocks but compiles to
        // nothing
        if !root_is_live(&graph, root) {
            trace!(target: "candor::lir", "skipping dead function root {}", root.0);
            continue;
        }

        let mut lir = lir::lower_function(&graph, root)?;
        lir::allocate(&mut lir)?;

        if options.trace_lir {
            debug!(target: "candor::lir", "## LIR {} root {} ##\n{}", filename, root.0, lir.print());
        }

        functions.push(CompiledFunction { root, lir });
    }

    Ok(CompileResult { hir: graph, functions })
}

/// The main root is always compiled; a nested literal only if its defining
/// `Function` instruction survived optimization.
fn root_is_live(graph: &HirGraph, root: BlockId) -> bool {
    if graph.roots.first() == Some(&root) {
        return true;
    }
    graph.instrs.iter().any(|i| {
        !i.removed
            && i.block.is_some()
            && matches!(i.kind, HirKind::Function { body: Some(b), .. } if b == root)
    })
}

/// Source-map handoff: the offset of the AST node a LIR instruction
/// originates from, or -1 when synthetic. The emitter pairs these with code
/// offsets while it writes bytes.
pub fn ast_offset(result: &CompileResult, function: &CompiledFunction, instr: lir::LirId) -> i32 {
    function
        .lir
        .instr(instr)
        .hir
        .map(|h| result.hir.instr(h).offset)
        .unwrap_or(-1)
}
