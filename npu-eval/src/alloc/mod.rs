/// The allocator interface and the block pool implementing it.
pub mod pool;
/// Allocation trace checking.
pub mod trace;
