//! HIR instruction model
//!
//! The SSA node. Instructions live in the graph's arena and reference each
//! other through `InstrId` indices, so phi cycles and use lists never form
//! ownership cycles.

use std::fmt;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::ast::{BinOpKind, ScopeSlot};

/// Arena index of a HIR instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl InstrId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Arena index of a HIR basic block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Literal payloads carried by `Literal` instructions and const intervals
#[derive(Debug, Clone, PartialEq)]
pub enum LitValue {
    Nil,
    Bool(bool),
    Num(f64),
    Str(String),
}

impl fmt::Display for LitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LitValue::Nil => write!(f, "nil"),
            LitValue::Bool(b) => write!(f, "{}", b),
            LitValue::Num(n) => write!(f, "{}", n),
            LitValue::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// HIR instruction kinds
#[derive(Debug, Clone, PartialEq)]
pub enum HirKind {
    /// Per-root pseudo instruction owning a function body; nested literals
    /// evaluate to a closure
    Function {
        body: Option<BlockId>,
        arg_count: usize,
    },
    /// Frame setup at a function root
    Entry { context_slots: usize },

    Return,
    Goto,
    If,
    Phi,

    Nil,
    Literal(LitValue),

    LoadArg,
    /// (index, trailing-count, target-array)
    LoadVarArg,
    StoreArg,
    StoreVarArg,
    LoadContext(ScopeSlot),
    StoreContext(ScopeSlot),

    LoadProperty,
    StoreProperty,
    DeleteProperty,
    AllocateObject,
    AllocateArray,

    /// (callee, argc)
    Call,
    AlignStack,

    BinOp(BinOpKind),
    Not,
    Typeof,
    Sizeof,
    Keysof,
    Clone,
    CollectGarbage,
    GetStackTrace,
}

impl HirKind {
    /// Control instructions terminate a block and never move.
    pub fn is_control(&self) -> bool {
        matches!(self, HirKind::Return | HirKind::Goto | HirKind::If)
    }

    /// Pure value producers: the only kinds GVN may number and GCM may move.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            HirKind::Nil | HirKind::Literal(_) | HirKind::BinOp(_) | HirKind::Not
        )
    }

    /// Roots of the dead-code mark phase.
    pub fn is_dce_root(&self) -> bool {
        matches!(
            self,
            HirKind::Call
                | HirKind::StoreArg
                | HirKind::StoreVarArg
                | HirKind::StoreContext(_)
                | HirKind::StoreProperty
                | HirKind::DeleteProperty
                | HirKind::If
                | HirKind::Goto
                | HirKind::Return
                | HirKind::AlignStack
                | HirKind::Entry { .. }
                | HirKind::CollectGarbage
                | HirKind::GetStackTrace
        )
    }

    /// Instructions that may clobber shared state, i.e. the sources the
    /// effect analysis tracks.
    pub fn clobbers(&self) -> bool {
        matches!(
            self,
            HirKind::Call
                | HirKind::StoreProperty
                | HirKind::DeleteProperty
                | HirKind::StoreContext(_)
                | HirKind::CollectGarbage
        )
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            HirKind::Function { .. } => "Function",
            HirKind::Entry { .. } => "Entry",
            HirKind::Return => "Return",
            HirKind::Goto => "Goto",
            HirKind::If => "If",
            HirKind::Phi => "Phi",
            HirKind::Nil => "Nil",
            HirKind::Literal(_) => "Literal",
            HirKind::LoadArg => "LoadArg",
            HirKind::LoadVarArg => "LoadVarArg",
            HirKind::StoreArg => "StoreArg",
            HirKind::StoreVarArg => "StoreVarArg",
            HirKind::LoadContext(_) => "LoadContext",
            HirKind::StoreContext(_) => "StoreContext",
            HirKind::LoadProperty => "LoadProperty",
            HirKind::StoreProperty => "StoreProperty",
            HirKind::DeleteProperty => "DeleteProperty",
            HirKind::AllocateObject => "AllocateObject",
            HirKind::AllocateArray => "AllocateArray",
            HirKind::Call => "Call",
            HirKind::AlignStack => "AlignStack",
            HirKind::BinOp(_) => "BinOp",
            HirKind::Not => "Not",
            HirKind::Typeof => "Typeof",
            HirKind::Sizeof => "Sizeof",
            HirKind::Keysof => "Keysof",
            HirKind::Clone => "Clone",
            HirKind::CollectGarbage => "CollectGarbage",
            HirKind::GetStackTrace => "GetStackTrace",
        }
    }
}

/// A single SSA instruction
#[derive(Debug, Clone)]
pub struct HirInstr {
    /// Even monotonic id; the root `Function` pseudo instruction takes -2 so
    /// the entry of a function is i0
    pub id: i32,
    pub kind: HirKind,
    /// Owning block; `None` only for the per-function root pseudo
    /// instruction and for instructions synthesized after a terminator
    pub block: Option<BlockId>,
    /// Ordered inputs
    pub args: SmallVec<[InstrId; 3]>,
    /// Reverse edges: every instruction listing us in `args`
    pub uses: Vec<InstrId>,
    /// Environment slot this instruction currently defines, if any
    pub slot: Option<ScopeSlot>,
    /// Source offset of the originating AST node (-1 synthetic)
    pub offset: i32,
    /// Instruction has been deleted from the graph
    pub removed: bool,
    /// Mark bit of the dead-code eliminator
    pub live: bool,
    /// Pinned instructions must not be reordered across blocks
    pub pinned: bool,
    /// Instructions that may clobber state observed at this point
    pub effects_in: FxHashSet<InstrId>,
    /// Effectful users downstream of this value
    pub effects_out: FxHashSet<InstrId>,
    /// Guard for the two effect passes: 0 untouched, 1 out-pass, 2 in-pass
    pub alias_visited: u8,
    pub gvn_visited: bool,
    pub gcm_visited: bool,
}

impl HirInstr {
    pub fn new(id: i32, kind: HirKind, block: Option<BlockId>) -> Self {
        let pinned = !kind.is_pure();
        HirInstr {
            id,
            kind,
            block,
            args: SmallVec::new(),
            uses: Vec::new(),
            slot: None,
            offset: -1,
            removed: false,
            live: false,
            pinned,
            effects_in: FxHashSet::default(),
            effects_out: FxHashSet::default(),
            alias_visited: 0,
            gvn_visited: false,
            gcm_visited: false,
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, HirKind::Phi)
    }

    pub fn is_control(&self) -> bool {
        self.kind.is_control()
    }

    /// Number of phi inputs (phis use `args` as the input list)
    pub fn input_count(&self) -> usize {
        self.args.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_kinds_are_unpinned() {
        let lit = HirInstr::new(2, HirKind::Literal(LitValue::Num(1.0)), None);
        assert!(!lit.pinned);
        let binop = HirInstr::new(4, HirKind::BinOp(BinOpKind::Add), None);
        assert!(!binop.pinned);
    }

    #[test]
    fn test_effectful_kinds_are_pinned() {
        let call = HirInstr::new(0, HirKind::Call, None);
        assert!(call.pinned);
        let phi = HirInstr::new(0, HirKind::Phi, None);
        assert!(phi.pinned);
        let load = HirInstr::new(0, HirKind::LoadProperty, None);
        assert!(load.pinned);
    }

    #[test]
    fn test_dce_roots() {
        assert!(HirKind::Return.is_dce_root());
        assert!(HirKind::StoreProperty.is_dce_root());
        assert!(HirKind::Entry { context_slots: 0 }.is_dce_root());
        assert!(!HirKind::LoadProperty.is_dce_root());
        assert!(!HirKind::Nil.is_dce_root());
    }

    #[test]
    fn test_clobber_set() {
        assert!(HirKind::Call.clobbers());
        assert!(HirKind::StoreContext(ScopeSlot::context(0, 0)).clobbers());
        assert!(!HirKind::LoadProperty.clobbers());
        assert!(!HirKind::BinOp(BinOpKind::Add).clobbers());
    }

    #[test]
    fn test_lit_value_display() {
        assert_eq!(LitValue::Num(3.0).to_string(), "3");
        assert_eq!(LitValue::Str("b".into()).to_string(), "\"b\"");
        assert_eq!(LitValue::Nil.to_string(), "nil");
    }
}
