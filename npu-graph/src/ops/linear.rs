use crate::error::{GraphError, GraphResult};
use crate::graph::KernelGraph;
use crate::hardware::SocGeneration;
use crate::operation::{LowerContext, Lowering, Operation};
use crate::ops::Precision;
use crate::param::{ElewiseKind, OpParam};
use crate::shape::TensorDesc;

/// `y = x @ w (+ bias)`.
///
/// Inputs are `x: [.., K]`, `w: [K, N]` (or `[N, K]` with `transpose_b`) and, if `has_bias`, `bias: [N]`.
///
/// The newer generation has a matmul kernel with a fused bias epilogue,
/// the older one runs a plain matmul followed by a broadcast add.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LinearOperation {
    pub precision: Precision,
    pub has_bias: bool,
    pub transpose_b: bool,
}

impl LinearOperation {
    pub fn new(precision: Precision, has_bias: bool) -> Self {
        LinearOperation {
            precision,
            has_bias,
            transpose_b: false,
        }
    }

    fn matmul(&self, with_bias: bool) -> OpParam {
        OpParam::MatMul {
            transpose_b: self.transpose_b,
            with_bias,
        }
    }
}

impl Operation for LinearOperation {
    fn name(&self) -> &str {
        "Linear"
    }

    fn input_num(&self) -> usize {
        2 + self.has_bias as usize
    }

    fn output_num(&self) -> usize {
        1
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>> {
        if let Some(x) = inputs.first() {
            if x.dtype != self.precision.dtype() {
                return Err(GraphError::invalid_input(
                    self.name(),
                    0,
                    format!("dtype {:?} does not match precision {:?}", x.dtype, self.precision),
                ));
            }
        }
        self.matmul(self.has_bias).infer_shape(inputs).map_err(|e| rename(e, self.name()))
    }

    fn lower(&self, ctx: &LowerContext) -> GraphResult<Lowering> {
        self.precision.check(self.name(), ctx.generation)?;

        match (ctx.generation, self.has_bias) {
            (_, false) => Ok(Lowering::Kernel(self.matmul(false))),
            (SocGeneration::Gen2, true) => Ok(Lowering::Kernel(self.matmul(true))),
            (SocGeneration::Gen1, true) => {
                let mut graph = KernelGraph::new(3, 1, 1);
                let (x, w, bias) = (graph.input(0), graph.input(1), graph.input(2));
                let t = graph.internal(0);
                let y = graph.output(0);

                graph.push(self.matmul(false), &[x, w], &[t]).debug_id("linear.matmul");
                graph
                    .push(OpParam::Elewise { kind: ElewiseKind::Add }, &[t, bias], &[y])
                    .debug_id("linear.bias");
                Ok(Lowering::Graph(graph))
            }
        }
    }
}

/// Report primitive shape errors under the operation name the caller knows.
pub(crate) fn rename(e: GraphError, op: &str) -> GraphError {
    match e {
        GraphError::WrongInputCount { expected, actual, .. } => GraphError::WrongInputCount {
            op: op.to_owned(),
            expected,
            actual,
        },
        GraphError::InvalidInput { input, reason, .. } => GraphError::InvalidInput {
            op: op.to_owned(),
            input,
            reason,
        },
        GraphError::InvalidParam { reason, .. } => GraphError::InvalidParam {
            op: op.to_owned(),
            reason,
        },
        e => e,
    }
}
