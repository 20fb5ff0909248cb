use crate::error::{GraphError, GraphResult};
use crate::graph::{KernelGraph, Reshape};
use crate::operation::{LowerContext, Lowering, Operation};
use crate::ops::Precision;
use crate::param::OpParam;
use crate::shape::TensorDesc;

/// The fused query/key/value projection of an attention layer.
///
/// Inputs are `x: [B, S, H]` and `w: [H, 3K]`, outputs are `q, k, v: [B, S, K]`.
///
/// Lowers to a single matmul over `x` collapsed to `[B*S, H]`, followed by a split of the last axis
/// into three. The split results are `[B*S, K]` views of the `[B, S, K]` outputs.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FusedQkvOperation {
    pub precision: Precision,
}

impl FusedQkvOperation {
    pub fn new(precision: Precision) -> Self {
        FusedQkvOperation { precision }
    }
}

impl Operation for FusedQkvOperation {
    fn name(&self) -> &str {
        "FusedQkv"
    }

    fn input_num(&self) -> usize {
        2
    }

    fn output_num(&self) -> usize {
        3
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>> {
        let op = self.name();
        if inputs.len() != 2 {
            return Err(GraphError::WrongInputCount {
                op: op.to_owned(),
                expected: 2,
                actual: inputs.len(),
            });
        }
        let (x, w) = (&inputs[0], &inputs[1]);

        if x.dtype != self.precision.dtype() {
            return Err(GraphError::invalid_input(op, 0, format!("dtype {:?} does not match precision {:?}", x.dtype, self.precision)));
        }
        if w.dtype != x.dtype {
            return Err(GraphError::invalid_input(op, 1, "weight dtype does not match input dtype"));
        }
        let &[b, s, h] = x.shape.dims() else {
            return Err(GraphError::invalid_input(op, 0, format!("expected [B, S, H], got {}", x.shape)));
        };
        let &[wh, w3k] = w.shape.dims() else {
            return Err(GraphError::invalid_input(op, 1, format!("expected [H, 3K], got {}", w.shape)));
        };
        if wh != h {
            return Err(GraphError::invalid_input(op, 1, format!("expected hidden size {}, got {}", h, wh)));
        }
        if w3k % 3 != 0 {
            return Err(GraphError::invalid_input(op, 1, format!("last axis {} is not divisible by 3", w3k)));
        }

        let out = TensorDesc::new(x.dtype, crate::shape![b, s, w3k / 3]);
        Ok(vec![out.clone(), out.clone(), out])
    }

    fn lower(&self, ctx: &LowerContext) -> GraphResult<Lowering> {
        self.precision.check(self.name(), ctx.generation)?;

        let mut graph = KernelGraph::new(2, 3, 1);
        let (x, w) = (graph.input(0), graph.input(1));
        let qkv = graph.internal(0);
        let outputs = [graph.output(0), graph.output(1), graph.output(2)];

        let matmul = OpParam::MatMul {
            transpose_b: false,
            with_bias: false,
        };
        graph
            .push(matmul, &[x, w], &[qkv])
            .reshape_input(0, Reshape::merge_leading())
            .debug_id("qkv.matmul");
        graph
            .push(OpParam::Split { axis: -1, parts: 3 }, &[qkv], &outputs)
            .debug_id("qkv.split");

        Ok(Lowering::Graph(graph))
    }
}
