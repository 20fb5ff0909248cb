use thiserror::Error;

use crate::hardware::SocGeneration;
use crate::shape::Shape;

pub type GraphResult<T> = Result<T, GraphError>;

/// Errors raised while building, validating or shape-inferring graphs and operations.
///
/// Every variant is reported before any memory is allocated or kernel is dispatched.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum GraphError {
    #[error("shape rank {rank} exceeds the maximum rank {max}")]
    RankTooLarge { rank: usize, max: usize },
    #[error("{op}: expected {expected} input tensors, got {actual}")]
    WrongInputCount { op: String, expected: usize, actual: usize },
    #[error("{op}: expected {expected} output tensors, got {actual}")]
    WrongOutputCount { op: String, expected: usize, actual: usize },
    #[error("{op}: input {input} is invalid: {reason}")]
    InvalidInput { op: String, input: usize, reason: String },
    #[error("{op}: invalid parameter: {reason}")]
    InvalidParam { op: String, reason: String },
    #[error("reshape '{name}' changed the element count from {old} to {new}")]
    ReshapeElementCount { name: &'static str, old: Shape, new: Shape },
    #[error("reshape '{name}' cannot be applied to {shape}")]
    ReshapeInvalid { name: &'static str, shape: Shape },
    #[error("size of tensor {shape} overflows")]
    SizeOverflow { shape: Shape },

    #[error("node {node} references slot {slot} which does not belong to this graph")]
    DanglingSlot { node: usize, slot: usize },
    #[error("node {node} writes input slot {slot}")]
    WritesInput { node: usize, slot: usize },
    #[error("slot {slot} is written by both node {first} and node {second}")]
    MultipleWriters { slot: usize, first: usize, second: usize },
    #[error("node {node} reads slot {slot} before any earlier node wrote it")]
    ReadBeforeWrite { node: usize, slot: usize },
    #[error("graph output {output} is never written")]
    OutputNeverWritten { output: usize },
    #[error("node {node} has {actual} reshapes for {inputs} inputs")]
    ReshapeCount { node: usize, actual: usize, inputs: usize },

    #[error("{op}: unsupported combination on {generation:?}: {reason}")]
    Unsupported {
        op: String,
        generation: SocGeneration,
        reason: String,
    },
}

impl GraphError {
    pub fn invalid_input(op: &str, input: usize, reason: impl Into<String>) -> Self {
        GraphError::InvalidInput {
            op: op.to_owned(),
            input,
            reason: reason.into(),
        }
    }

    pub fn invalid_param(op: &str, reason: impl Into<String>) -> Self {
        GraphError::InvalidParam {
            op: op.to_owned(),
            reason: reason.into(),
        }
    }

    /// Whether this error comes from an unsupported (parameter, hardware) selection
    /// rather than from tensor shapes.
    pub fn is_configuration(&self) -> bool {
        matches!(self, GraphError::Unsupported { .. } | GraphError::InvalidParam { .. })
    }
}
