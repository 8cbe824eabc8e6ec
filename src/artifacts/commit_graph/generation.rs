//! Topological generation numbers
//!
//! `generation(c) = 1 + max(generation(p) for p in parents(c))`, with roots at 1. The
//! value saturates at [`GENERATION_NUMBER_MAX`]: a parent at the cap contributes
//! `MAX - 1`, so the child lands exactly on the cap instead of overflowing.
//!
//! The walk is a post-order DFS driven by an explicit stack so that deep linear
//! histories cannot exhaust the call stack.

pub const GENERATION_NUMBER_ZERO: u32 = 0;
pub const GENERATION_NUMBER_INFINITY: u32 = 0xFFFF_FFFF;
pub const GENERATION_NUMBER_MAX: u32 = 0x3FFF_FFFF;

/// A parent edge as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRef {
    /// Another commit of the batch, by dense index
    Local(usize),
    /// A commit outside the batch whose generation is already known
    Known(u32),
}

/// Generation of a commit whose highest parent generation is `max_parent`
pub fn next_generation(max_parent: u32) -> u32 {
    max_parent.min(GENERATION_NUMBER_MAX - 1) + 1
}

/// Compute a generation for every commit of the batch
///
/// `parents[i]` lists the parents of commit `i`. A parent cycle, impossible for a
/// content-addressed history but reachable with a forged store, is an error.
pub fn compute_generations(parents: &[Vec<ParentRef>]) -> anyhow::Result<Vec<u32>> {
    let mut generations = vec![GENERATION_NUMBER_ZERO; parents.len()];
    let mut on_stack = vec![false; parents.len()];
    let mut stack = Vec::new();

    for start in 0..parents.len() {
        if generations[start] != GENERATION_NUMBER_ZERO {
            continue;
        }

        stack.push(start);
        on_stack[start] = true;

        while let Some(&current) = stack.last() {
            let mut max_parent = GENERATION_NUMBER_ZERO;
            let mut pending = None;

            for parent in &parents[current] {
                let generation = match *parent {
                    ParentRef::Local(index) => generations[index],
                    ParentRef::Known(generation) => generation,
                };

                match *parent {
                    ParentRef::Local(index) if generation == GENERATION_NUMBER_ZERO => {
                        pending = Some(index);
                        break;
                    }
                    _ => max_parent = max_parent.max(generation),
                }
            }

            match pending {
                Some(index) if on_stack[index] => {
                    anyhow::bail!("commit parents form a cycle through commit #{index}");
                }
                Some(index) => {
                    stack.push(index);
                    on_stack[index] = true;
                }
                None => {
                    generations[current] = next_generation(max_parent);
                    on_stack[current] = false;
                    stack.pop();
                }
            }
        }
    }

    Ok(generations)
}
