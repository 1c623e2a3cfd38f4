//! Linear-scan register allocation
//!
//! Walks intervals in start order over the even-numbered instruction
//! positions. Free registers are taken outright, blocked ones are stolen
//! from the interval with the furthest next use, and splitting moves later
//! ranges and uses into a child interval enqueued for another pass.
//! Afterwards data flow is resolved across block edges and spilled
//! intervals receive frame slots.

use rustc_hash::FxHashSet;

use super::intervals::build_intervals;
use super::liveness::compute_liveness;
use super::types::{
    GapMove, GapState, IntervalId, Lir, LirId, LirInstr, LirKind, LiveRange, UseId, UseKind,
    REGISTER_COUNT,
};
use crate::error::CompileError;

pub struct Allocator<'l> {
    lir: &'l mut Lir,
    unhandled: Vec<IntervalId>,
    active: Vec<IntervalId>,
    inactive: Vec<IntervalId>,
    unhandled_spills: Vec<IntervalId>,
    active_spills: Vec<IntervalId>,
    inactive_spills: Vec<IntervalId>,
    free_spills: Vec<IntervalId>,
    spill_index: u32,
}

/// Run the whole allocation pipeline over lowered LIR
pub fn allocate(lir: &mut Lir) -> Result<(), CompileError> {
    compute_liveness(lir);
    build_intervals(lir);

    let mut allocator = Allocator {
        lir,
        unhandled: Vec::new(),
        active: Vec::new(),
        inactive: Vec::new(),
        unhandled_spills: Vec::new(),
        active_spills: Vec::new(),
        inactive_spills: Vec::new(),
        free_spills: Vec::new(),
        spill_index: 0,
    };
    allocator.walk_intervals()?;
    allocator.resolve_data_flow()?;
    allocator.allocate_spills()?;

    allocator.lir.spill_slots = allocator.spill_index;
    Ok(())
}

impl<'l> Allocator<'l> {
    fn start(&self, interval: IntervalId) -> i32 {
        self.lir.interval(interval).start()
    }

    fn end(&self, interval: IntervalId) -> i32 {
        self.lir.interval(interval).end()
    }

    fn register_index(&self, interval: IntervalId) -> usize {
        self.lir.interval(interval).index as usize
    }

    fn insert_sorted(&mut self, interval: IntervalId) {
        let start = self.start(interval);
        let at = self
            .unhandled
            .iter()
            .position(|&i| self.lir.interval(i).start() > start)
            .unwrap_or(self.unhandled.len());
        self.unhandled.insert(at, interval);
    }

    // === Main walk ===

    fn walk_intervals(&mut self) -> Result<(), CompileError> {
        // Populate the work lists; const rematerialization grows the
        // interval arena while we scan it
        let mut idx = 0;
        while idx < self.lir.intervals.len() {
            let id = IntervalId(idx as u32);
            idx += 1;

            if self.lir.interval(id).ranges.is_empty() {
                continue;
            }

            if self.lir.interval(id).fixed {
                self.inactive.push(id);
            } else if self.lir.interval(id).is_const() {
                self.rematerialize(id)?;
            } else if self.lir.interval(id).is_stack() {
                // Gap scratch slots keep their pre-assigned fate
            } else {
                self.unhandled.push(id);
            }
        }

        let mut unhandled = std::mem::take(&mut self.unhandled);
        unhandled.sort_by_key(|&i| self.lir.interval(i).start());
        self.unhandled = unhandled;
        let mut inactive = std::mem::take(&mut self.inactive);
        inactive.sort_by_key(|&i| self.lir.interval(i).start());
        self.inactive = inactive;

        while !self.unhandled.is_empty() {
            let current = self.unhandled.remove(0);
            let position = self.start(current);

            shuffle(self.lir, &mut self.active, &mut self.inactive, None, position);

            // An interval may have been spilled while queued
            if !self.lir.interval(current).is_virtual() {
                continue;
            }

            self.try_allocate_free_reg(current)?;
            if !self.lir.interval(current).is_register() {
                self.allocate_blocked_reg(current)?;
            }

            let interval = self.lir.interval(current);
            if !(interval.is_register() || interval.is_stack()) {
                return Err(CompileError::internal(
                    "interval left unplaced by the allocation walk",
                ));
            }
            if self.lir.interval(current).is_register() {
                self.active.push(current);
            }
        }

        Ok(())
    }

    /// Constants are never held in a register for long: each real use gets a
    /// fresh one-instruction register interval filled from the constant in
    /// the preceding gap.
    fn rematerialize(&mut self, interval: IntervalId) -> Result<(), CompileError> {
        let uses: Vec<_> = self.lir.interval(interval).uses.clone();
        for use_id in uses {
            let instr = self.lir.use_site(use_id).instr;
            // Skip the constant's definition and uses inside freshly made
            // gap moves
            if self.lir.instr(instr).result == Some(use_id) {
                continue;
            }
            if matches!(self.lir.instr(instr).kind, LirKind::Gap) {
                continue;
            }

            let pos = self.lir.instr(instr).pos;
            let reg = self.lir.new_virtual();
            let gap = self.get_gap(pos - 1)?;
            let src = self.lir.new_use(interval, UseKind::Any, gap);
            let dst = self.lir.new_use(reg, UseKind::Register, gap);
            self.push_gap_move(gap, src, dst)?;

            // Rebind the operand to the one-instruction interval
            self.reassign_use(use_id, reg);
            self.lir.add_range(reg, pos - 1, pos);
        }
        Ok(())
    }

    fn reassign_use(&mut self, use_id: UseId, to: IntervalId) {
        let from = self.lir.uses[use_id.index()].interval;
        self.lir.uses[use_id.index()].interval = to;
        let uses = &mut self.lir.intervals[from.index()].uses;
        if let Some(at) = uses.iter().position(|&u| u == use_id) {
            uses.remove(at);
        }
        // Keep the receiving list position-sorted
        let pos = self.lir.use_pos(use_id);
        let at = {
            let uses = &self.lir.intervals[to.index()].uses;
            uses.iter()
                .position(|&u| self.lir.use_pos(u) > pos)
                .unwrap_or(uses.len())
        };
        self.lir.intervals[to.index()].uses.insert(at, use_id);
    }

    fn try_allocate_free_reg(&mut self, current: IntervalId) -> Result<(), CompileError> {
        let mut free_pos = [i32::MAX; REGISTER_COUNT];

        // Active registers are not free at all
        for &active in &self.active {
            free_pos[self.register_index(active)] = 0;
        }

        // Inactive intervals limit availability where they intersect
        for &inactive in &self.inactive {
            let Some(pos) = self.lir.find_intersection(current, inactive) else {
                continue;
            };
            let index = self.register_index(inactive);
            if free_pos[index] > pos {
                free_pos[index] = pos;
            }
        }

        let mut max = -1;
        let mut max_reg = 0;
        for (r, &pos) in free_pos.iter().enumerate() {
            if pos > max {
                max = pos;
                max_reg = r;
            }
        }

        // Prefer the register hint when it stays free long enough
        if let Some(hint) = self.lir.interval(current).register_hint {
            let hinted = self.lir.use_site(hint).interval;
            if self.lir.interval(hinted).is_register() && self.lir.interval(hinted).index >= 0 {
                let reg = self.register_index(hinted);
                if free_pos[reg] - 2 > self.start(current) {
                    max = free_pos[reg];
                    max_reg = reg;
                }
            }
        }

        // All registers occupied
        if max - 2 <= self.start(current) {
            return Ok(());
        }

        if max <= self.end(current) {
            // Free only up to `max`: keep the tail for another round,
            // biased into the preceding gap
            let split_pos = if max % 2 == 0 { max - 1 } else { max - 2 };
            self.split(current, split_pos)?;
        }

        self.lir.interval_mut(current).allocate(max_reg);
        Ok(())
    }

    fn allocate_blocked_reg(&mut self, current: IntervalId) -> Result<(), CompileError> {
        let first_use = self.lir.use_after(current, 0, Some(UseKind::Register));
        let Some(first_use) = first_use else {
            // No register use at all: the whole interval can live on the
            // stack
            self.spill(current);
            return Ok(());
        };
        let first_use_pos = self.lir.use_pos(first_use);

        let mut use_pos = [i32::MAX; REGISTER_COUNT];
        let mut block_pos = [i32::MAX; REGISTER_COUNT];

        for &active in &self.active {
            let index = self.register_index(active);
            if self.lir.interval(active).fixed {
                // A fixed interval cannot be evicted
                block_pos[index] = 0;
                use_pos[index] = 0;
            } else if let Some(next) = self.lir.use_after(active, self.start(current), None) {
                let pos = self.lir.use_pos(next);
                if use_pos[index] > pos {
                    use_pos[index] = pos;
                }
            }
        }

        for &inactive in &self.inactive {
            let index = self.register_index(inactive);
            let Some(intersection) = self.lir.find_intersection(current, inactive) else {
                continue;
            };
            if self.lir.interval(inactive).fixed {
                if block_pos[index] > intersection {
                    block_pos[index] = intersection;
                }
                if use_pos[index] > intersection {
                    use_pos[index] = intersection;
                }
            } else if let Some(next) = self.lir.use_after(inactive, self.start(current), None) {
                let pos = self.lir.use_pos(next);
                if use_pos[index] > pos {
                    use_pos[index] = pos;
                }
            }
        }

        let mut use_max = -1;
        let mut use_reg = 0;
        for (r, &pos) in use_pos.iter().enumerate() {
            if pos > use_max {
                use_max = pos;
                use_reg = r;
            }
        }

        if use_max < first_use_pos || block_pos[use_reg] <= self.start(current) {
            // Everything else is used sooner: spill this interval up to its
            // first register use
            self.spill(current);
            if first_use_pos - 1 > self.start(current) {
                self.split(current, first_use_pos - 1)?;
            }
        } else {
            // Steal the register with the furthest next use
            self.lir.interval_mut(current).allocate(use_reg);

            if block_pos[use_reg] <= self.end(current) {
                self.split(current, block_pos[use_reg] - 1)?;
            }

            let mut split_pos = self.start(current);
            if split_pos % 2 == 0 {
                split_pos -= 1;
            }

            // Evict the intersecting holders of the stolen register
            let mut i = 0;
            while i < self.active.len() {
                let interval = self.active[i];
                if !self.same_register(interval, current) {
                    i += 1;
                    continue;
                }
                if split_pos > self.start(interval) {
                    self.split(interval, split_pos)?;
                    i += 1;
                } else {
                    // The holder starts where the steal happens; its whole
                    // remainder goes to the stack
                    self.spill(interval);
                    self.active.remove(i);
                }
            }

            let mut i = 0;
            while i < self.inactive.len() {
                let interval = self.inactive[i];
                if self.lir.interval(interval).fixed || !self.same_register(interval, current) {
                    i += 1;
                    continue;
                }
                let Some(intersection) = self.lir.find_intersection(current, interval) else {
                    i += 1;
                    continue;
                };

                match self
                    .lir
                    .use_after(interval, self.start(current), Some(UseKind::Register))
                {
                    None => {
                        self.split(interval, split_pos)?;
                    }
                    Some(next) => {
                        let next_pos = self.lir.use_pos(next);
                        if intersection >= next_pos {
                            self.split(interval, intersection)?;
                        } else {
                            self.split(interval, next_pos - 1)?;
                        }
                    }
                }
                self.inactive.remove(i);
            }
        }

        Ok(())
    }

    fn same_register(&self, a: IntervalId, b: IntervalId) -> bool {
        self.lir
            .interval(a)
            .same_location(self.lir.interval(b))
    }

    /// Value-preserving split: later ranges and uses move into a fresh child
    /// enqueued for allocation, with a connecting move at the split point
    /// unless the edge resolution will provide one.
    fn split(&mut self, interval: IntervalId, pos: i32) -> Result<IntervalId, CompileError> {
        if self.lir.interval(interval).fixed {
            return Err(CompileError::internal("attempt to split a fixed interval"));
        }
        if pos <= self.start(interval) || pos >= self.end(interval) {
            return Err(CompileError::internal(format!(
                "split position {} outside interval [{}, {})",
                pos,
                self.start(interval),
                self.end(interval)
            )));
        }

        let child = self.lir.new_virtual();

        // Move uses at or after the split point
        let mut stay = Vec::new();
        let mut moved = Vec::new();
        for &u in &self.lir.intervals[interval.index()].uses {
            if self.lir.use_pos(u) < pos {
                stay.push(u);
            } else {
                moved.push(u);
            }
        }
        for &u in &moved {
            self.lir.uses[u.index()].interval = child;
        }
        self.lir.intervals[interval.index()].uses = stay;
        self.lir.intervals[child.index()].uses = moved;

        // Move (and possibly cut) the ranges
        let mut ranges = std::mem::take(&mut self.lir.intervals[interval.index()].ranges);
        let mut child_ranges = Vec::new();
        while let Some(last) = ranges.last().copied() {
            if last.end <= pos {
                break;
            }
            ranges.pop();
            if last.start < pos {
                ranges.push(LiveRange {
                    start: last.start,
                    end: pos,
                });
                child_ranges.insert(
                    0,
                    LiveRange {
                        start: pos,
                        end: last.end,
                    },
                );
                break;
            }
            child_ranges.insert(0, last);
        }
        self.lir.intervals[interval.index()].ranges = ranges;
        self.lir.intervals[child.index()].ranges = child_ranges;

        let parent = self.lir.interval(interval).split_parent.unwrap_or(interval);
        self.lir.intervals[child.index()].split_parent = Some(parent);
        self.lir.intervals[parent.index()].split_children.insert(0, child);

        self.insert_sorted(child);

        // If the parent now ends on a block edge, resolution inserts the
        // connecting move
        let parent_end = self.end(interval);
        if self.is_block_start(parent_end) {
            return Ok(child);
        }

        let gap = self.get_gap(pos)?;
        let src = self.lir.new_use(interval, UseKind::Any, gap);
        let dst = self.lir.new_use(child, UseKind::Any, gap);
        self.push_gap_move(gap, src, dst)?;

        Ok(child)
    }

    fn is_block_start(&self, pos: i32) -> bool {
        self.lir.blocks.iter().any(|b| b.start == pos)
    }

    /// Find or create the gap at an odd position
    fn get_gap(&mut self, pos: i32) -> Result<LirId, CompileError> {
        for bi in 0..self.lir.blocks.len() {
            if self.lir.blocks[bi].end <= pos {
                continue;
            }
            let list = self.lir.blocks[bi].instructions.clone();
            for (at, &instr) in list.iter().enumerate() {
                let ipos = self.lir.instr(instr).pos;
                if ipos < pos {
                    continue;
                }
                if ipos == pos {
                    if !matches!(self.lir.instr(instr).kind, LirKind::Gap) {
                        return Err(CompileError::internal(format!(
                            "odd position {} occupied by a non-gap",
                            pos
                        )));
                    }
                    return Ok(instr);
                }

                // The gap needs a scratch spill slot for move cycles
                let scratch = self.lir.new_virtual();
                self.lir.add_range(scratch, pos - 1, pos + 1);
                self.spill(scratch);

                let id = LirId(self.lir.instrs.len() as u32);
                self.lir.instrs.push(LirInstr {
                    kind: LirKind::Gap,
                    pos,
                    block: bi,
                    inputs: Default::default(),
                    scratches: Default::default(),
                    result: None,
                    hir: None,
                    gap: Some(GapState {
                        moves: Vec::new(),
                        scratch,
                    }),
                    targets: Default::default(),
                });
                self.lir.blocks[bi].instructions.insert(at, id);
                return Ok(id);
            }
        }
        Err(CompileError::internal(format!(
            "no block can hold a gap at position {}",
            pos
        )))
    }

    fn push_gap_move(&mut self, gap: LirId, src: UseId, dst: UseId) -> Result<(), CompileError> {
        self.lir
            .instr_mut(gap)
            .gap
            .as_mut()
            .ok_or_else(|| CompileError::internal("gap instruction without gap state"))?
            .moves
            .push(GapMove { src, dst });
        Ok(())
    }

    fn spill(&mut self, interval: IntervalId) {
        debug_assert!(!self.lir.interval(interval).is_stack());
        self.lir.interval_mut(interval).spill_to(-1);
        self.unhandled_spills.push(interval);
    }

    // === Data-flow resolution ===

    /// Split intervals may change location across block edges; connect the
    /// differing sides with a move in the gap on the branch side of a
    /// two-successor edge or the join side otherwise. Fall-through gotos are
    /// then removed and remaining control instructions get their targets
    /// bound.
    fn resolve_data_flow(&mut self) -> Result<(), CompileError> {
        for bi in 0..self.lir.blocks.len() {
            let succs: Vec<usize> = self.lir.blocks[bi].succs.iter().copied().collect();
            for &succ in &succs {
                let mut gap: Option<LirId> = None;

                let live_in: Vec<IntervalId> =
                    self.lir.blocks[succ].live_in.iter().copied().collect();
                for interval in live_in {
                    let parent = self
                        .lir
                        .interval(interval)
                        .split_parent
                        .unwrap_or(interval);
                    if self.lir.interval(parent).split_children.is_empty() {
                        continue;
                    }

                    let left = self.lir.child_at(parent, self.lir.blocks[bi].end)?;
                    let right = self.lir.child_at(parent, self.lir.blocks[succ].start)?;
                    if left == right {
                        continue;
                    }

                    let gap_id = match gap {
                        Some(g) => g,
                        None => {
                            let g = if succs.len() == 2 {
                                // In the branch
                                self.get_gap(self.lir.blocks[succ].start + 1)?
                            } else {
                                // Before the join
                                self.get_gap(self.lir.blocks[bi].end - 1)?
                            };
                            gap = Some(g);
                            g
                        }
                    };
                    let src = self.lir.new_use(left, UseKind::Any, gap_id);
                    let dst = self.lir.new_use(right, UseKind::Any, gap_id);
                    self.push_gap_move(gap_id, src, dst)?;
                }

                // Fall-through gotos disappear; everything else binds its
                // target label
                let control = *self.lir.blocks[bi].instructions.last().ok_or_else(|| {
                    CompileError::internal("block without instructions during resolution")
                })?;
                if !self.lir.instr(control).kind.is_control() {
                    return Err(CompileError::internal(
                        "block does not end in a control instruction",
                    ));
                }
                if matches!(self.lir.instr(control).kind, LirKind::Goto) && succ == bi + 1 {
                    self.lir.blocks[bi].instructions.pop();
                } else {
                    self.lir.instr_mut(control).targets.push(succ);
                }
            }
        }
        Ok(())
    }

    // === Spill slots ===

    /// Analogous sweep over spilled intervals keyed on start position; a
    /// retired slot is reused when no live spill occupies it.
    fn allocate_spills(&mut self) -> Result<(), CompileError> {
        let mut spills = std::mem::take(&mut self.unhandled_spills);
        spills.sort_by_key(|&i| self.lir.interval(i).start());
        self.unhandled_spills = spills;

        while !self.unhandled_spills.is_empty() {
            let current = self.unhandled_spills.remove(0);
            let position = self.start(current);

            shuffle(
                self.lir,
                &mut self.active_spills,
                &mut self.inactive_spills,
                Some(&mut self.free_spills),
                position,
            );

            // Try a retired slot first
            let mut found = None;
            while let Some(candidate) = self.free_spills.pop() {
                let mut usable = true;
                for &active in &self.active_spills {
                    if self
                        .lir
                        .interval(active)
                        .same_location(self.lir.interval(candidate))
                    {
                        usable = false;
                        break;
                    }
                }
                if usable {
                    for &inactive in &self.inactive_spills {
                        if self
                            .lir
                            .interval(inactive)
                            .same_location(self.lir.interval(candidate))
                            && self.lir.find_intersection(inactive, current).is_some()
                        {
                            usable = false;
                            break;
                        }
                    }
                }
                if usable {
                    found = Some(candidate);
                    break;
                }
            }
            if let Some(slot) = found {
                let index = self.lir.interval(slot).index;
                self.lir.interval_mut(current).spill_to(index);
                self.active_spills.push(current);
                continue;
            }

            // Any index not blocked right now will do
            let mut blocked: FxHashSet<i32> = FxHashSet::default();
            let mut max_index = 0;
            for &active in &self.active_spills {
                let index = self.lir.interval(active).index;
                blocked.insert(index);
                if index > max_index {
                    max_index = index;
                }
            }
            for &inactive in &self.inactive_spills {
                if self.lir.find_intersection(inactive, current).is_some() {
                    let index = self.lir.interval(inactive).index;
                    blocked.insert(index);
                    if index > max_index {
                        max_index = index;
                    }
                }
            }

            let mut assigned = false;
            for index in 0..max_index {
                if !blocked.contains(&index) {
                    self.lir.interval_mut(current).spill_to(index);
                    self.active_spills.push(current);
                    assigned = true;
                    break;
                }
            }
            if assigned {
                continue;
            }

            self.lir
                .interval_mut(current)
                .spill_to(self.spill_index as i32);
            self.spill_index += 1;
            self.active_spills.push(current);
        }

        Ok(())
    }
}

/// Move expired or currently-uncovered intervals between the active and
/// inactive lists at `pos`; expired ones land in `handled` when provided.
fn shuffle(
    lir: &Lir,
    active: &mut Vec<IntervalId>,
    inactive: &mut Vec<IntervalId>,
    mut handled: Option<&mut Vec<IntervalId>>,
    pos: i32,
) {
    let mut i = 0;
    while i < active.len() {
        let interval = active[i];
        if lir.interval(interval).end() < pos {
            active.remove(i);
            if let Some(handled) = handled.as_mut() {
                handled.push(interval);
            }
        } else if !lir.interval(interval).covers(pos) {
            active.remove(i);
            inactive.push(interval);
        } else {
            i += 1;
        }
    }

    let mut i = 0;
    while i < inactive.len() {
        let interval = inactive[i];
        if lir.interval(interval).end() < pos {
            inactive.remove(i);
            if let Some(handled) = handled.as_mut() {
                handled.push(interval);
            }
        } else if lir.interval(interval).covers(pos) {
            inactive.remove(i);
            active.push(interval);
        } else {
            i += 1;
        }
    }
}
