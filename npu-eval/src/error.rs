use thiserror::Error;

use npu_graph::error::GraphError;
use npu_sys::error::SysError;

use crate::alloc::pool::BlockId;

pub type EvalResult<T> = Result<T, EvalError>;

/// Errors raised while allocating, selecting kernels or executing operations.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Sys(#[from] SysError),

    #[error("block pool exhausted: requested {requested} bytes ({aligned} aligned), {remaining} of {capacity} bytes remaining")]
    OutOfMemory {
        requested: usize,
        aligned: usize,
        remaining: usize,
        capacity: usize,
    },
    #[error("double free of {block:?}")]
    DoubleFree { block: BlockId },
    #[error("free of unknown {block:?}")]
    InvalidFree { block: BlockId },
    #[error("cannot reset block pool, {used_blocks} blocks are still in use")]
    PoolBusy { used_blocks: usize },
    #[error("allocation check failed: {reason}")]
    AllocationOverlap { reason: String },

    #[error("no kernel supports {op} with inputs [{inputs}] ({candidates} candidates rejected)")]
    NoKernel { op: String, inputs: String, candidates: usize },
    #[error("tiling of kernel '{kernel}' failed: {reason}")]
    TilingFailed { kernel: &'static str, reason: String },

    #[error("{op}: variant pack does not match: {tensor}: {reason}")]
    PackMismatch { op: String, tensor: TensorRef, reason: String },
    #[error("{op}: input {input} needs host data but none was supplied")]
    MissingHostData { op: String, input: usize },
    #[error("{op}: execute called before setup with these tensors")]
    NotSetUp { op: String },
    #[error("{op}: workspace of {actual} bytes is smaller than the required {required} bytes")]
    WorkspaceTooSmall { op: String, required: usize, actual: usize },
    #[error("{op}: {tensor} is not bound to device memory")]
    UnboundTensor { op: String, tensor: TensorRef },

    #[error("{operation}: node {node} ({debug_id}) failed")]
    InNode {
        operation: String,
        node: usize,
        debug_id: String,
        #[source]
        source: Box<EvalError>,
    },
}

/// Which tensor of a variant pack an error is about.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TensorRef {
    Input(usize),
    Output(usize),
    /// The number of tensors itself was wrong.
    Count,
}

/// The coarse error taxonomy callers react to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorClass {
    /// Malformed parameters or unsupported hardware combinations, never retried.
    Configuration,
    /// Tensor count, rank or dimension mismatches, reported before anything is allocated.
    Shape,
    /// The allocator could not satisfy a request, the execution can be retried with smaller shapes.
    ResourceExhausted,
    /// Caller defects such as double frees, handled without corrupting state.
    Internal,
}

impl EvalError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EvalError::Graph(e) => {
                if e.is_configuration() {
                    ErrorClass::Configuration
                } else {
                    ErrorClass::Shape
                }
            }
            EvalError::Sys(SysError::OutOfMemory { .. }) => ErrorClass::ResourceExhausted,
            EvalError::Sys(_) => ErrorClass::Internal,

            EvalError::OutOfMemory { .. } => ErrorClass::ResourceExhausted,
            EvalError::DoubleFree { .. }
            | EvalError::InvalidFree { .. }
            | EvalError::PoolBusy { .. }
            | EvalError::AllocationOverlap { .. } => ErrorClass::Internal,

            EvalError::NoKernel { .. } | EvalError::TilingFailed { .. } => ErrorClass::Configuration,

            EvalError::PackMismatch { .. }
            | EvalError::MissingHostData { .. }
            | EvalError::NotSetUp { .. }
            | EvalError::WorkspaceTooSmall { .. }
            | EvalError::UnboundTensor { .. } => ErrorClass::Shape,

            EvalError::InNode { source, .. } => source.class(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::ResourceExhausted
    }

    /// Strip [EvalError::InNode] context layers.
    pub fn root_cause(&self) -> &EvalError {
        match self {
            EvalError::InNode { source, .. } => source.root_cause(),
            e => e,
        }
    }

    pub(crate) fn in_node(self, operation: &str, node: usize, debug_id: &str) -> EvalError {
        EvalError::InNode {
            operation: operation.to_owned(),
            node,
            debug_id: debug_id.to_owned(),
            source: Box::new(self),
        }
    }
}

impl std::fmt::Display for TensorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TensorRef::Input(i) => write!(f, "input {}", i),
            TensorRef::Output(i) => write!(f, "output {}", i),
            TensorRef::Count => write!(f, "tensor count"),
        }
    }
}
