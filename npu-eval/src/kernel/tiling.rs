use std::ops::Range;

use bytemuck::{Pod, Zeroable};

use crate::error::EvalResult;
use crate::kernel::tiling_failed;

/// An even split of `total` work units over `cores` cores, where the first `remainder` cores get one extra unit.
///
/// Embedded in the tiling structs, so kernels compute their own range from it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct CoreSplit {
    pub cores: u32,
    pub per_core: u32,
    pub remainder: u32,
}

impl CoreSplit {
    /// Split `total` units over at most `max_cores` cores, never leaving a core without work
    /// unless there is no work at all.
    pub fn new(total: u32, max_cores: u32) -> CoreSplit {
        assert!(max_cores > 0, "Need at least one core");
        let cores = total.clamp(1, max_cores);
        CoreSplit {
            cores,
            per_core: total / cores,
            remainder: total % cores,
        }
    }

    pub fn total(&self) -> u32 {
        self.per_core * self.cores + self.remainder
    }

    /// The units handled by `core`.
    pub fn range(&self, core: u32) -> Range<usize> {
        let core = core.min(self.cores);
        let start = core * self.per_core + core.min(self.remainder);
        let len = if core < self.cores {
            self.per_core + (core < self.remainder) as u32
        } else {
            0
        };
        start as usize..(start + len) as usize
    }
}

/// Convert a size to the `u32` tiling fields use.
pub(crate) fn tiling_u32(kernel: &'static str, what: &str, value: usize) -> EvalResult<u32> {
    u32::try_from(value).map_err(|_| tiling_failed(kernel, format!("{} {} does not fit in the tiling data", what, value)))
}
