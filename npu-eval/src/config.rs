/// Settings for operation execution.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EvalConfig {
    /// Bytes reserved up front for the intermediate tensors of one runner.
    pub pool_bytes: usize,
    /// Reuse kernel selection and tiling results for repeated launches with identical parameters.
    pub cache_tilings: bool,
    /// Record every intermediate allocation and check that blocks never overlap in both memory and time.
    pub check_allocations: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            pool_bytes: 16 * 1024 * 1024,
            cache_tilings: true,
            check_allocations: cfg!(debug_assertions),
        }
    }
}
