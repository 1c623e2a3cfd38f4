//! SSA optimization passes
//!
//! Pass order: phi pruning, dominators, reachability, effect analysis,
//! value numbering, dead code, code motion. Each pass is idempotent on its
//! own output.

pub mod dce;
pub mod effects;
pub mod gcm;
pub mod gvn;
pub mod prune;

use super::dominators::derive_dominators;
use super::graph::HirGraph;
use crate::error::CompileError;

pub use dce::eliminate_dead_code;
pub use effects::{compute_effects, compute_reachability};
pub use gcm::global_code_motion;
pub use gvn::global_value_numbering;
pub use prune::prune_phis;

/// Run the full pass pipeline over a freshly built graph
pub fn optimize(graph: &mut HirGraph) -> Result<(), CompileError> {
    prune_phis(graph);
    derive_dominators(graph)?;
    compute_reachability(graph);
    compute_effects(graph);
    global_value_numbering(graph);
    eliminate_dead_code(graph);
    global_code_motion(graph)?;
    Ok(())
}
