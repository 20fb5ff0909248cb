use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};

use npu_sys::device::Device;
use npu_sys::mem::DevicePtr;

use crate::error::{EvalError, EvalResult};

/// Alignment of block sizes, and of the payload start address.
pub const BLOCK_ALIGNMENT: usize = 32;
/// Extra bytes added to every block.
pub const BLOCK_HEADER_SLACK: usize = 32;
/// Alignment of newly carved blocks within the arena, required by device DMA.
pub const ARENA_ALIGNMENT: usize = 64;

/// Hands out byte ranges for intermediate tensors during graph execution.
///
/// Implementations take `&self` and synchronize internally, one lock per call.
pub trait MemoryAllocationSolver: Debug + Send + Sync {
    /// Allocate a block of at least `size` bytes.
    fn malloc(&self, size: usize) -> EvalResult<BlockId>;

    /// Return a block to the free set. Freeing a block twice or an unknown block is reported
    /// as an error and leaves the allocator untouched.
    fn free(&self, block: BlockId) -> EvalResult<()>;

    /// The device pointer of a used block, `None` (and an error log) for freed or unknown blocks.
    fn block_ptr(&self, block: BlockId) -> Option<DevicePtr>;

    /// Total bytes carved out of the arena so far.
    fn size(&self) -> usize;

    /// Bytes of the blocks that are currently in use.
    fn malloc_size(&self) -> usize;

    /// Forget every block, only allowed when no block is in use.
    fn reset(&self) -> EvalResult<()>;
}

/// A process-unique (per pool) block identifier, never reused until the pool is dropped.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockId(u64);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Block {
    pub id: BlockId,
    /// Offset of the block within the arena.
    pub offset: usize,
    /// Aligned block size, including the header slack.
    pub size: usize,
}

/// A bump allocator with a free list over a single device reservation.
///
/// Requests are first served from the free list, in the order blocks were freed, taking the first block that is large enough.
/// Only if that fails a new block is carved from the end of the arena.
/// Blocks are never split or merged, so repeated executions with the same sizes get the same blocks back.
#[derive(Debug)]
pub struct BlockPool {
    arena: DevicePtr,
    capacity: usize,
    state: Mutex<PoolState>,
}

#[derive(Debug)]
struct PoolState {
    next_id: u64,
    cursor: usize,
    used: Vec<Block>,
    free: Vec<Block>,
}

/// Round `size` up to the block alignment and add the header slack.
pub fn aligned_block_size(size: usize) -> Option<usize> {
    round_up(size, BLOCK_ALIGNMENT)?.checked_add(BLOCK_HEADER_SLACK)
}

fn round_up(x: usize, align: usize) -> Option<usize> {
    Some(x.checked_add(align - 1)? / align * align)
}

impl BlockPool {
    /// Create a pool by making a single reservation of `capacity` bytes on `device`.
    pub fn new(device: &Device, capacity: usize) -> EvalResult<Self> {
        let arena = device.reserve(capacity)?;
        tracing::debug!(capacity, addr = arena.addr(), "created block pool");

        Ok(BlockPool {
            arena,
            capacity,
            state: Mutex::new(PoolState {
                next_id: 0,
                cursor: 0,
                used: vec![],
                free: vec![],
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn device(&self) -> &Device {
        self.arena.device()
    }

    pub fn used_blocks(&self) -> usize {
        self.state().used.len()
    }

    pub fn free_blocks(&self) -> usize {
        self.state().free.len()
    }

    /// The used block `id`, if any.
    pub fn block(&self, id: BlockId) -> Option<Block> {
        self.state().used.iter().find(|b| b.id == id).copied()
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryAllocationSolver for BlockPool {
    fn malloc(&self, size: usize) -> EvalResult<BlockId> {
        let mut state = self.state();

        let oom = |aligned: usize, cursor: usize| {
            let remaining = self.capacity.saturating_sub(cursor);
            tracing::warn!(size, aligned, remaining, capacity = self.capacity, "block pool exhausted");
            EvalError::OutOfMemory {
                requested: size,
                aligned,
                remaining,
                capacity: self.capacity,
            }
        };

        let aligned = match aligned_block_size(size) {
            Some(aligned) => aligned,
            None => return Err(oom(usize::MAX, state.cursor)),
        };

        // first fit in the free list
        if let Some(index) = state.free.iter().position(|b| b.size >= aligned) {
            let block = state.free.remove(index);
            state.used.push(block);
            tracing::trace!(block = block.id.0, size, offset = block.offset, "reused free block");
            return Ok(block.id);
        }

        // bump allocate
        let start = match round_up(state.cursor, ARENA_ALIGNMENT) {
            Some(start) => start,
            None => return Err(oom(aligned, state.cursor)),
        };
        let end = match start.checked_add(aligned) {
            Some(end) if end <= self.capacity => end,
            _ => return Err(oom(aligned, state.cursor)),
        };

        let block = Block {
            id: BlockId(state.next_id),
            offset: start,
            size: aligned,
        };
        state.next_id += 1;
        state.cursor = end;
        state.used.push(block);

        tracing::trace!(block = block.id.0, size, offset = block.offset, "allocated new block");
        Ok(block.id)
    }

    fn free(&self, block: BlockId) -> EvalResult<()> {
        let mut state = self.state();

        if let Some(index) = state.used.iter().position(|b| b.id == block) {
            let block = state.used.remove(index);
            state.free.push(block);
            return Ok(());
        }

        if state.free.iter().any(|b| b.id == block) {
            tracing::error!(block = block.0, "double free");
            Err(EvalError::DoubleFree { block })
        } else {
            tracing::error!(block = block.0, "free of unknown block");
            Err(EvalError::InvalidFree { block })
        }
    }

    fn block_ptr(&self, block: BlockId) -> Option<DevicePtr> {
        let offset = match self.block(block) {
            Some(b) => b.offset,
            None => {
                tracing::error!(block = block.0, "pointer requested for a block that is not in use");
                return None;
            }
        };

        match self.arena.offset_bytes(offset) {
            Ok(ptr) => Some(ptr),
            Err(e) => {
                tracing::error!(block = block.0, offset, error = %e, "block outside of arena");
                None
            }
        }
    }

    fn size(&self) -> usize {
        self.state().cursor
    }

    fn malloc_size(&self) -> usize {
        self.state().used.iter().map(|b| b.size).sum()
    }

    fn reset(&self) -> EvalResult<()> {
        let mut state = self.state();
        if !state.used.is_empty() {
            tracing::warn!(used_blocks = state.used.len(), "refusing to reset busy block pool");
            return Err(EvalError::PoolBusy {
                used_blocks: state.used.len(),
            });
        }

        state.free.clear();
        state.cursor = 0;
        Ok(())
    }
}
