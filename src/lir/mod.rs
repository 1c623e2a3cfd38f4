//! Low-level intermediate representation and register allocation

pub mod allocator;
pub mod intervals;
pub mod liveness;
pub mod lower;
pub mod types;

pub use allocator::allocate;
pub use lower::lower_function;
pub use types::{
    GapMove, GapState, Interval, IntervalId, IntervalKind, Lir, LirBlock, LirId, LirInstr,
    LirKind, LiveRange, Location, UseId, UseKind, UseSite, POINTER_SIZE, REGISTER_COUNT,
    REGISTER_NAMES,
};
