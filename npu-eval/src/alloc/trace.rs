use std::fmt::{Debug, Formatter};

use crate::alloc::pool::BlockId;

/// A record of the intermediate allocations of one execution, checked for conflicts afterwards.
///
/// Time is measured in kernel dispatches: a block allocated before dispatch `a` and freed after dispatch `b`
/// lives during `a..=b`.
#[derive(Clone, Default)]
pub struct AllocTrace {
    entries: Vec<TraceEntry>,
    open: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub block: BlockId,
    pub addr: u64,
    pub size: usize,
    pub life_start: usize,
    /// `None` while the block is still live.
    pub life_end: Option<usize>,
    pub debug_id: String,
}

impl AllocTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn on_malloc(&mut self, block: BlockId, addr: u64, size: usize, time: usize, debug_id: &str) {
        self.open.push(self.entries.len());
        self.entries.push(TraceEntry {
            block,
            addr,
            size,
            life_start: time,
            life_end: None,
            debug_id: debug_id.to_owned(),
        });
    }

    pub fn on_free(&mut self, block: BlockId, time: usize) {
        if let Some(pos) = self.open.iter().position(|&i| self.entries[i].block == block) {
            let index = self.open.remove(pos);
            self.entries[index].life_end = Some(time);
        }
    }

    /// Check that no two blocks overlap in both memory and time.
    pub fn check(&self) -> Result<(), String> {
        if let Some(&open) = self.open.first() {
            return Err(format!("{:?} was never freed", self.entries[open].block));
        }

        for (i, a) in self.entries.iter().enumerate() {
            let a_end = a.life_end.unwrap_or(a.life_start);

            // exclude self and already checked pairs
            for b in &self.entries[i + 1..] {
                let b_end = b.life_end.unwrap_or(b.life_start);

                let overlap_life = overlaps_inclusive(a.life_start, a_end, b.life_start, b_end);
                let overlap_mem = overlaps_exclusive(a.addr, a.addr + a.size as u64, b.addr, b.addr + b.size as u64);

                if overlap_life && overlap_mem {
                    return Err(format!(
                        "{:?} ({}) and {:?} ({}) overlap in both memory ({:#x}..{:#x} and {:#x}..{:#x}) and time ({:?} and {:?})",
                        a.block,
                        a.debug_id,
                        b.block,
                        b.debug_id,
                        a.addr,
                        a.addr + a.size as u64,
                        b.addr,
                        b.addr + b.size as u64,
                        a.life_start..=a_end,
                        b.life_start..=b_end,
                    ));
                }
            }
        }

        Ok(())
    }
}

fn overlaps_exclusive(a_start: u64, a_end: u64, b_start: u64, b_end: u64) -> bool {
    a_start < b_end && b_start < a_end
}

fn overlaps_inclusive(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start <= b_end && b_start <= a_end
}

impl Debug for AllocTrace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "AllocTrace {{")?;
        writeln!(f, "  open: {},", self.open.len())?;
        writeln!(f, "  entries: [")?;
        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(f, "    {}: {:?}", i, entry)?;
        }
        writeln!(f, "  ]")?;
        writeln!(f, "}}")?;
        Ok(())
    }
}
