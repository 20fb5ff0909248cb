use std::fmt::Debug;

use crate::error::{GraphError, GraphResult};
use crate::graph::KernelGraph;
use crate::hardware::SocGeneration;
use crate::param::OpParam;
use crate::shape::TensorDesc;

/// A user-facing operator: a parameter set that knows its own shape rule
/// and how to lower itself for a given hardware generation.
///
/// Implementations must be pure. `infer_shape` never allocates device memory
/// and `lower` only builds the kernel plan, it does not select kernels or compute tilings.
pub trait Operation: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn input_num(&self) -> usize;

    fn output_num(&self) -> usize;

    /// Compute output descriptors from input descriptors.
    fn infer_shape(&self, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>>;

    /// Pick the execution plan for the generation in `ctx`.
    ///
    /// Unsupported (parameter, generation) combinations return [GraphError::Unsupported](crate::error::GraphError::Unsupported).
    fn lower(&self, ctx: &LowerContext) -> GraphResult<Lowering>;
}

/// The information available while lowering an operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LowerContext {
    pub generation: SocGeneration,
}

/// The plan an operation lowers to.
#[derive(Debug, Clone)]
pub enum Lowering {
    /// Dispatch a single primitive kernel directly on the operation tensors.
    Kernel(OpParam),
    /// Run a graph whose inputs and outputs are the operation inputs and outputs.
    Graph(KernelGraph),
}

impl LowerContext {
    pub fn new(generation: SocGeneration) -> Self {
        LowerContext { generation }
    }
}

/// Shared body of [Operation::infer_shape] for operations that lower to a graph independent of hardware:
/// lower for the newest generation that supports it and infer through the resulting plan.
pub fn infer_through_lowering(op: &dyn Operation, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>> {
    let mut last_err = None;
    for generation in SocGeneration::ALL.into_iter().rev() {
        match op.lower(&LowerContext::new(generation)) {
            Ok(lowering) => return infer_lowering(&lowering, inputs),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| GraphError::invalid_param(op.name(), "no generation to lower for")))
}

pub fn infer_lowering(lowering: &Lowering, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>> {
    match lowering {
        Lowering::Kernel(param) => param.infer_shape(inputs),
        Lowering::Graph(graph) => {
            let shapes = graph.infer_shapes(inputs)?;
            Ok((0..graph.output_count()).map(|i| shapes.get(graph.output(i)).clone()).collect())
        }
    }
}
