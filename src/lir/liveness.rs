//! Per-block liveness
//!
//! `live_gen` holds intervals read before any local definition, `live_kill`
//! scratches and results; the classic backward fixpoint then yields
//! `live_in`/`live_out`.

use rustc_hash::FxHashSet;

use super::types::{IntervalId, Lir};

pub fn compute_liveness(lir: &mut Lir) {
    compute_local_sets(lir);
    compute_global_sets(lir);
}

fn compute_local_sets(lir: &mut Lir) {
    for bi in 0..lir.blocks.len() {
        let mut gen: FxHashSet<IntervalId> = FxHashSet::default();
        let mut kill: FxHashSet<IntervalId> = FxHashSet::default();

        for &instr in &lir.blocks[bi].instructions {
            let instr = &lir.instrs[instr.index()];

            for &input in &instr.inputs {
                let interval = lir.uses[input.index()].interval;
                if !kill.contains(&interval) {
                    gen.insert(interval);
                }
            }
            for &scratch in &instr.scratches {
                kill.insert(lir.uses[scratch.index()].interval);
            }
            if let Some(result) = instr.result {
                kill.insert(lir.uses[result.index()].interval);
            }
        }

        lir.blocks[bi].live_gen = gen;
        lir.blocks[bi].live_kill = kill;
    }
}

fn compute_global_sets(lir: &mut Lir) {
    let mut change = true;
    while change {
        change = false;

        for bi in (0..lir.blocks.len()).rev() {
            // Every successor's input adds to this block's output
            let mut incoming: Vec<IntervalId> = Vec::new();
            for &succ in lir.blocks[bi].succs.clone().iter() {
                incoming.extend(lir.blocks[succ].live_in.iter().copied());
            }
            for interval in incoming {
                if lir.blocks[bi].live_out.insert(interval) {
                    change = true;
                }
            }

            // Inputs are live_gen...
            let gen: Vec<IntervalId> = lir.blocks[bi].live_gen.iter().copied().collect();
            for interval in gen {
                if lir.blocks[bi].live_in.insert(interval) {
                    change = true;
                }
            }

            // ...plus whatever flows out and is not killed locally
            let flowing: Vec<IntervalId> = lir.blocks[bi]
                .live_out
                .iter()
                .copied()
                .filter(|iv| !lir.blocks[bi].live_kill.contains(iv))
                .collect();
            for interval in flowing {
                if lir.blocks[bi].live_in.insert(interval) {
                    change = true;
                }
            }
        }
    }
}
