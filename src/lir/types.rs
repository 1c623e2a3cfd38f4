//! LIR type definitions
//!
//! Low-level instructions whose operands are `Use` records over intervals.
//! Instructions carry even ids; odd positions are reserved for gaps so the
//! allocator can insert parallel moves without renumbering.

use std::fmt::Write as _;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::ast::BinOpKind;
use crate::error::CompileError;
use crate::hir::instr::{BlockId, InstrId, LitValue};

/// Allocatable register file. The runtime reserves rsi/rdi as context and
/// root registers and r14 as the emitter scratch; none of them appear here.
pub const REGISTER_COUNT: usize = 10;

pub const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "rax", "rbx", "rcx", "rdx", "r8", "r9", "r10", "r11", "r12", "r13",
];

pub const RAX: usize = 0;
pub const RBX: usize = 1;
pub const RCX: usize = 2;

pub const POINTER_SIZE: usize = 8;

/// Frame offset of an allocator spill index. Frame slot 0 is reserved for
/// argc, so allocator index `k` occupies frame slot `k + 1` at
/// `frame_base - POINTER_SIZE * (k + 2)`.
pub fn frame_offset(index: u32) -> i32 {
    -((POINTER_SIZE as i32) * (index as i32 + 2))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalId(pub u32);

impl IntervalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UseId(pub u32);

impl UseId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LirId(pub u32);

impl LirId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Operand constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseKind {
    Any,
    Register,
}

/// One operand position of one instruction
#[derive(Debug, Clone)]
pub struct UseSite {
    pub interval: IntervalId,
    pub kind: UseKind,
    pub instr: LirId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    pub start: i32,
    pub end: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    Virtual,
    Register,
    Stack,
    Const,
}

/// A virtual or physical location's liveness: ordered disjoint half-open
/// ranges plus position-sorted uses.
#[derive(Debug, Clone)]
pub struct Interval {
    pub kind: IntervalKind,
    /// Fixed intervals are pre-bound to a physical register
    pub fixed: bool,
    /// Register or spill index; -1 while unassigned
    pub index: i32,
    pub ranges: Vec<LiveRange>,
    pub uses: Vec<UseId>,
    pub split_parent: Option<IntervalId>,
    pub split_children: Vec<IntervalId>,
    pub register_hint: Option<UseId>,
    /// Payload of const intervals
    pub value: Option<LitValue>,
}

impl Interval {
    fn new(kind: IntervalKind) -> Self {
        Interval {
            kind,
            fixed: false,
            index: -1,
            ranges: Vec::new(),
            uses: Vec::new(),
            split_parent: None,
            split_children: Vec::new(),
            register_hint: None,
            value: None,
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.kind == IntervalKind::Virtual
    }

    pub fn is_register(&self) -> bool {
        self.kind == IntervalKind::Register
    }

    pub fn is_stack(&self) -> bool {
        self.kind == IntervalKind::Stack
    }

    pub fn is_const(&self) -> bool {
        self.kind == IntervalKind::Const
    }

    pub fn start(&self) -> i32 {
        self.ranges.first().map_or(i32::MAX, |r| r.start)
    }

    pub fn end(&self) -> i32 {
        self.ranges.last().map_or(i32::MIN, |r| r.end)
    }

    pub fn covers(&self, pos: i32) -> bool {
        for range in &self.ranges {
            if range.start > pos {
                return false;
            }
            if range.end > pos {
                return true;
            }
        }
        false
    }

    pub fn allocate(&mut self, register: usize) {
        self.kind = IntervalKind::Register;
        self.index = register as i32;
    }

    pub fn spill_to(&mut self, index: i32) {
        self.kind = IntervalKind::Stack;
        self.index = index;
    }

    /// Same physical location as another interval
    pub fn same_location(&self, other: &Interval) -> bool {
        self.kind == other.kind && self.index == other.index
    }
}

/// LIR instruction kinds
#[derive(Debug, Clone, PartialEq)]
pub enum LirKind {
    /// Block head; binding point for control-flow targets
    Label,
    /// Parallel-move slot at an odd position
    Gap,
    Move,
    Phi,
    Goto,
    Branch,
    Return,
    Entry { context_slots: usize },
    Nil,
    Literal,
    LoadArg,
    LoadVarArg,
    StoreArg,
    StoreVarArg,
    LoadContext { index: usize, depth: usize },
    StoreContext { index: usize, depth: usize },
    LoadProperty,
    StoreProperty,
    DeleteProperty,
    AllocateObject,
    AllocateArray,
    Function { body: BlockId },
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

impl LirKind {
    /// Does the operation call into the runtime stub library? Calls clobber
    /// the entire register file at their position.
    pub fn has_call(&self) -> bool {
        matches!(
            self,
            LirKind::Call
                | LirKind::LoadProperty
                | LirKind::StoreProperty
                | LirKind::DeleteProperty
                | LirKind::AllocateObject
                | LirKind::AllocateArray
                | LirKind::Function { .. }
                | LirKind::Typeof
                | LirKind::Keysof
                | LirKind::Clone
                | LirKind::CollectGarbage
                | LirKind::GetStackTrace
                | LirKind::LoadVarArg
                | LirKind::StoreVarArg
        )
    }

    pub fn is_control(&self) -> bool {
        matches!(self, LirKind::Goto | LirKind::Branch | LirKind::Return)
    }
}

/// One parallel move inside a gap
#[derive(Debug, Clone)]
pub struct GapMove {
    pub src: UseId,
    pub dst: UseId,
}

/// Payload of a `Gap` instruction: unordered simultaneous moves plus the
/// scratch spill slot for cycle breaking.
#[derive(Debug, Clone)]
pub struct GapState {
    pub moves: Vec<GapMove>,
    pub scratch: IntervalId,
}

#[derive(Debug, Clone)]
pub struct LirInstr {
    pub kind: LirKind,
    /// Even id; gaps take the odd positions
    pub pos: i32,
    /// Flattened block index
    pub block: usize,
    pub inputs: SmallVec<[UseId; 3]>,
    pub scratches: SmallVec<[UseId; 1]>,
    pub result: Option<UseId>,
    /// Originating HIR node, for source-map annotation
    pub hir: Option<InstrId>,
    pub gap: Option<GapState>,
    /// Resolved control-flow targets (flattened block indices)
    pub targets: SmallVec<[usize; 2]>,
}

impl LirInstr {
    pub fn has_call(&self) -> bool {
        self.kind.has_call()
    }
}

/// One flattened block
#[derive(Debug)]
pub struct LirBlock {
    pub hir: BlockId,
    pub start: i32,
    pub end: i32,
    pub instructions: Vec<LirId>,
    pub label: LirId,
    /// Flattened indices of the successor blocks
    pub succs: SmallVec<[usize; 2]>,
    pub live_gen: FxHashSet<IntervalId>,
    pub live_kill: FxHashSet<IntervalId>,
    pub live_in: FxHashSet<IntervalId>,
    pub live_out: FxHashSet<IntervalId>,
}

/// Where an operand ends up after allocation
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Register(usize),
    Spill(u32),
    Constant(LitValue),
}

/// The LIR graph of one function root
#[derive(Debug)]
pub struct Lir {
    pub instrs: Vec<LirInstr>,
    pub uses: Vec<UseSite>,
    pub intervals: Vec<Interval>,
    pub blocks: Vec<LirBlock>,
    /// Fixed intervals, one per physical register
    pub registers: [IntervalId; REGISTER_COUNT],
    /// Number of spill slots handed out (excluding the reserved argc slot)
    pub spill_slots: u32,
}

impl Lir {
    pub fn new() -> Self {
        let mut lir = Lir {
            instrs: Vec::new(),
            uses: Vec::new(),
            intervals: Vec::new(),
            blocks: Vec::new(),
            registers: [IntervalId(0); REGISTER_COUNT],
            spill_slots: 0,
        };
        for i in 0..REGISTER_COUNT {
            let id = lir.new_interval(IntervalKind::Register);
            lir.intervals[id.index()].fixed = true;
            lir.intervals[id.index()].index = i as i32;
            lir.registers[i] = id;
        }
        lir
    }

    pub fn interval(&self, id: IntervalId) -> &Interval {
        &self.intervals[id.index()]
    }

    pub fn interval_mut(&mut self, id: IntervalId) -> &mut Interval {
        &mut self.intervals[id.index()]
    }

    pub fn use_site(&self, id: UseId) -> &UseSite {
        &self.uses[id.index()]
    }

    pub fn instr(&self, id: LirId) -> &LirInstr {
        &self.instrs[id.index()]
    }

    pub fn instr_mut(&mut self, id: LirId) -> &mut LirInstr {
        &mut self.instrs[id.index()]
    }

    pub fn new_interval(&mut self, kind: IntervalKind) -> IntervalId {
        let id = IntervalId(self.intervals.len() as u32);
        self.intervals.push(Interval::new(kind));
        id
    }

    pub fn new_virtual(&mut self) -> IntervalId {
        self.new_interval(IntervalKind::Virtual)
    }

    pub fn new_const(&mut self, value: LitValue) -> IntervalId {
        let id = self.new_interval(IntervalKind::Const);
        self.intervals[id.index()].value = Some(value);
        id
    }

    pub fn use_pos(&self, id: UseId) -> i32 {
        self.instr(self.use_site(id).instr).pos
    }

    /// Create a use site and insert it position-sorted into the interval's
    /// use list.
    pub fn new_use(&mut self, interval: IntervalId, kind: UseKind, instr: LirId) -> UseId {
        let id = UseId(self.uses.len() as u32);
        self.uses.push(UseSite {
            interval,
            kind,
            instr,
        });
        let pos = self.instr(instr).pos;
        let at = {
            let uses = &self.intervals[interval.index()].uses;
            uses.iter()
                .position(|&u| self.use_pos(u) > pos)
                .unwrap_or(uses.len())
        };
        self.intervals[interval.index()].uses.insert(at, id);
        id
    }

    /// Prepend or merge a `[start, end)` range; interval construction walks
    /// backwards, so new ranges only ever arrive at the front.
    pub fn add_range(&mut self, interval: IntervalId, start: i32, end: i32) {
        let ranges = &mut self.intervals[interval.index()].ranges;
        if let Some(first) = ranges.first_mut() {
            if first.start == end {
                first.start = start;
                return;
            }
            debug_assert!(end < first.start, "ranges must arrive in reverse order");
        }
        ranges.insert(0, LiveRange { start, end });
    }

    /// First position where two intervals intersect
    pub fn find_intersection(&self, a: IntervalId, b: IntervalId) -> Option<i32> {
        for ra in &self.interval(a).ranges {
            for rb in &self.interval(b).ranges {
                if ra.start >= rb.start && ra.start < rb.end {
                    return Some(ra.start);
                }
                if rb.start >= ra.start && rb.start < ra.end {
                    return Some(rb.start);
                }
            }
        }
        None
    }

    /// First use at or after `pos`, optionally restricted to a constraint
    pub fn use_after(&self, interval: IntervalId, pos: i32, kind: Option<UseKind>) -> Option<UseId> {
        for &u in &self.interval(interval).uses {
            if self.use_pos(u) >= pos {
                match kind {
                    Some(k) if self.use_site(u).kind != k => continue,
                    _ => return Some(u),
                }
            }
        }
        None
    }

    /// The split child (or the interval itself) covering `pos`
    pub fn child_at(&self, interval: IntervalId, pos: i32) -> Result<IntervalId, CompileError> {
        let root = self.interval(interval).split_parent.unwrap_or(interval);
        if self.interval(root).covers(pos) {
            return Ok(root);
        }
        for &child in &self.interval(root).split_children {
            if self.interval(child).covers(pos) {
                return Ok(child);
            }
        }
        Err(CompileError::internal(format!(
            "no split child covers position {}",
            pos
        )))
    }

    /// Resolved location of an operand after allocation
    pub fn location(&self, use_id: UseId) -> Result<Location, CompileError> {
        let interval = self.interval(self.use_site(use_id).interval);
        match interval.kind {
            IntervalKind::Register => Ok(Location::Register(interval.index as usize)),
            IntervalKind::Stack => Ok(Location::Spill(interval.index as u32)),
            IntervalKind::Const => Ok(Location::Constant(
                interval
                    .value
                    .clone()
                    .ok_or_else(|| CompileError::internal("const interval without payload"))?,
            )),
            IntervalKind::Virtual => Err(CompileError::internal(
                "operand left unallocated after register allocation",
            )),
        }
    }

    /// One line per interval: location and live ranges
    pub fn print_intervals(&self) -> String {
        let mut out = String::new();
        for (i, interval) in self.intervals.iter().enumerate() {
            if interval.ranges.is_empty() {
                continue;
            }
            let location = match interval.kind {
                IntervalKind::Register if interval.index >= 0 => {
                    REGISTER_NAMES[interval.index as usize].to_string()
                }
                IntervalKind::Stack => format!("[{}]", interval.index),
                IntervalKind::Const => "const".to_string(),
                _ => "?".to_string(),
            };
            let ranges: Vec<String> = interval
                .ranges
                .iter()
                .map(|r| format!("[{};{})", r.start, r.end))
                .collect();
            let _ = write!(out, "{:>3} {:<5}: {}", i, location, ranges.join(" "));
            if let Some(parent) = interval.split_parent {
                let _ = write!(out, " P:{}", parent.0);
            }
            let _ = writeln!(out);
        }
        out
    }

    /// Pretty-print blocks, instructions and operands
    pub fn print(&self) -> String {
        let mut out = String::new();
        for (i, block) in self.blocks.iter().enumerate() {
            let _ = writeln!(out, "# Block {} [{}; {}]", i, block.start, block.end);
            for &instr in &block.instructions {
                let _ = writeln!(out, "{}", self.display_instr(instr));
            }
        }
        out
    }

    fn display_operand(&self, use_id: UseId) -> String {
        let interval = self.interval(self.use_site(use_id).interval);
        match interval.kind {
            IntervalKind::Register if interval.index >= 0 => {
                REGISTER_NAMES[interval.index as usize].to_string()
            }
            IntervalKind::Stack if interval.index >= 0 => format!("[{}]", interval.index),
            IntervalKind::Const => match &interval.value {
                Some(v) => format!("{}", v),
                None => "const".to_string(),
            },
            _ => format!("v{}", self.use_site(use_id).interval.0),
        }
    }

    pub fn display_instr(&self, id: LirId) -> String {
        let instr = self.instr(id);
        let mut line = format!("{:>3}: ", instr.pos);
        if let Some(result) = instr.result {
            let _ = write!(line, "{} = ", self.display_operand(result));
        }
        let _ = write!(line, "{}", kind_tag(&instr.kind));
        let inputs: Vec<String> = instr
            .inputs
            .iter()
            .map(|&u| self.display_operand(u))
            .collect();
        if !inputs.is_empty() {
            let _ = write!(line, " {}", inputs.join(", "));
        }
        if let Some(gap) = &instr.gap {
            let moves: Vec<String> = gap
                .moves
                .iter()
                .map(|m| {
                    format!(
                        "{} => {}",
                        self.display_operand(m.src),
                        self.display_operand(m.dst)
                    )
                })
                .collect();
            let _ = write!(line, " {{{}}}", moves.join(", "));
        }
        line
    }
}

impl Default for Lir {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_tag(kind: &LirKind) -> &'static str {
    match kind {
        LirKind::Label => "Label",
        LirKind::Gap => "Gap",
        LirKind::Move => "Move",
        LirKind::Phi => "Phi",
        LirKind::Goto => "Goto",
        LirKind::Branch => "Branch",
        LirKind::Return => "Return",
        LirKind::Entry { .. } => "Entry",
        LirKind::Nil => "Nil",
        LirKind::Literal => "Literal",
        LirKind::LoadArg => "LoadArg",
        LirKind::LoadVarArg => "LoadVarArg",
        LirKind::StoreArg => "StoreArg",
        LirKind::StoreVarArg => "StoreVarArg",
        LirKind::LoadContext { .. } => "LoadContext",
        LirKind::StoreContext { .. } => "StoreContext",
        LirKind::LoadProperty => "LoadProperty",
        LirKind::StoreProperty => "StoreProperty",
        LirKind::DeleteProperty => "DeleteProperty",
        LirKind::AllocateObject => "AllocateObject",
        LirKind::AllocateArray => "AllocateArray",
        LirKind::Function { .. } => "Function",
        LirKind::Call => "Call",
        LirKind::AlignStack => "AlignStack",
        LirKind::BinOp(_) => "BinOp",
        LirKind::Not => "Not",
        LirKind::Typeof => "Typeof",
        LirKind::Sizeof => "Sizeof",
        LirKind::Keysof => "Keysof",
        LirKind::Clone => "Clone",
        LirKind::CollectGarbage => "CollectGarbage",
        LirKind::GetStackTrace => "GetStackTrace",
    }
}
