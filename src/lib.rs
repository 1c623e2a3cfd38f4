//! # Candor middle-end
//!
//! The optimizing middle-end and register allocator of the Candor
//! just-in-time compiler. It consumes a resolved abstract syntax tree and
//! produces, per function, a flat register-allocated instruction stream for
//! the machine-code emitter.
//!
//! ## Quick Start
//!
//! ```
//! use candor::{compile, AstNode, BinOpKind, CompileOptions};
//!
//! // return 1 + 2
//! let ast = AstNode::function(
//!     vec![],
//!     vec![AstNode::ret(AstNode::bin_op(
//!         BinOpKind::Add,
//!         AstNode::number(1.0),
//!         AstNode::number(2.0),
//!     ))],
//!     0,
//! );
//! let result = compile(&ast, "example.can", &CompileOptions::default()).unwrap();
//! assert_eq!(result.functions.len(), 1);
//! ```
//!
//! ## Architecture
//!
//! Compilation runs strictly forward through four phases:
//!
//! 1. **HIR construction**: the AST is lowered to SSA with phis at joins
//! 2. **SSA optimization**: phi pruning, dominators, effect analysis,
//!    value numbering, dead code elimination, global code motion
//! 3. **LIR lowering**: instruction selection over virtual intervals with
//!    fixed-register constraints where the calling convention demands them
//! 4. **Linear scan**: liveness, interval construction, allocation with
//!    splitting, spill slots, and data-flow resolution across edges
//!
//! Everything for one compile lives in per-graph arenas addressed by index;
//! dropping the result frees the lot.

pub mod ast;
pub mod error;
pub mod hir;
pub mod lir;
pub mod pipeline;

pub use ast::{AstKind, AstNode, BinOpKind, ScopeSlot, UnOpKind};
pub use error::CompileError;
pub use hir::{HirGraph, HirKind, LitValue};
pub use lir::{Lir, LirKind, Location};
pub use pipeline::{ast_offset, compile, CompileOptions, CompileResult, CompiledFunction};
