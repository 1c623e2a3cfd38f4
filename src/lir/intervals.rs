//! Live-interval construction
//!
//! Walks blocks and instructions in reverse. Values live across a block get
//! the whole block range first and results shorten it; call sites give every
//! physical register a one-instruction range, forcing caller-saved values
//! out of registers.

use super::types::{Lir, UseKind, REGISTER_COUNT};

pub fn build_intervals(lir: &mut Lir) {
    for bi in (0..lir.blocks.len()).rev() {
        let start = lir.blocks[bi].start;
        let end = lir.blocks[bi].end;

        // Everything leaving the block is conservatively live across it
        let live_out: Vec<_> = lir.blocks[bi].live_out.iter().copied().collect();
        for interval in live_out {
            lir.add_range(interval, start, end + 2);
        }

        for &instr_id in lir.blocks[bi].instructions.clone().iter().rev() {
            let pos = lir.instr(instr_id).pos;

            if lir.instr(instr_id).has_call() {
                for r in 0..REGISTER_COUNT {
                    let reg = lir.registers[r];
                    if lir.interval(reg).covers(pos) {
                        continue;
                    }
                    lir.add_range(reg, pos, pos + 1);
                    lir.new_use(reg, UseKind::Register, instr_id);
                }
            }

            if let Some(result) = lir.instr(instr_id).result {
                let interval = lir.use_site(result).interval;
                if lir.interval(interval).ranges.is_empty() {
                    // Used only by the instruction itself
                    lir.add_range(interval, pos, pos + 1);
                } else if !lir.blocks[bi].live_in.contains(&interval) {
                    // The pending range starts at the definition
                    lir.intervals[interval.index()].ranges[0].start = pos;
                }
            }

            // Scratches live only right before the instruction so fixed
            // intervals can't evict them
            for &scratch in lir.instr(instr_id).scratches.clone().iter() {
                let interval = lir.use_site(scratch).interval;
                lir.add_range(interval, pos - 1, pos);
            }

            // Inputs are live from the block start up to the instruction
            for &input in lir.instr(instr_id).inputs.clone().iter() {
                let interval = lir.use_site(input).interval;
                if !lir.interval(interval).covers(pos - 1) {
                    lir.add_range(interval, start, pos);
                }
            }
        }
    }
}
