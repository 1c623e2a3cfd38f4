//! High-level intermediate representation
//!
//! SSA over an arena of instructions and blocks. `builder` lowers the AST,
//! `dominators` and `optimize` massage the graph before LIR lowering.

pub mod block;
pub mod builder;
pub mod dominators;
pub mod graph;
pub mod instr;
pub mod optimize;

pub use block::{Env, HirBlock};
pub use builder::build;
pub use graph::HirGraph;
pub use instr::{BlockId, HirInstr, HirKind, InstrId, LitValue};
pub use optimize::optimize;
