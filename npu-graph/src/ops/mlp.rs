use std::sync::Arc;

use crate::error::{GraphError, GraphResult};
use crate::graph::KernelGraph;
use crate::hardware::SocGeneration;
use crate::operation::{infer_through_lowering, LowerContext, Lowering, Operation};
use crate::ops::Precision;
use crate::param::{ActivationKind, ElewiseKind, OpParam};
use crate::shape::TensorDesc;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MlpActivation {
    /// `w_up` is `[H, 2I]`, its output is split into `[gate, up]`.
    Swiglu,
    /// `w_up` is `[H, I]`.
    Gelu,
}

/// Feed-forward block `down(act(up(x)))`, inputs `x, w_up, w_down`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MlpOperation {
    pub activation: MlpActivation,
    pub precision: Precision,
}

/// `x + mlp(rms_norm(x))`, inputs `x, gamma, w_up, w_down`.
///
/// The mlp is a nested operation node, lowered separately by the runner.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ResidualMlpOperation {
    pub eps: f32,
    pub mlp: MlpOperation,
}

const MATMUL: OpParam = OpParam::MatMul {
    transpose_b: false,
    with_bias: false,
};

impl MlpOperation {
    pub fn new(activation: MlpActivation, precision: Precision) -> Self {
        MlpOperation { activation, precision }
    }
}

impl Operation for MlpOperation {
    fn name(&self) -> &str {
        "Mlp"
    }

    fn input_num(&self) -> usize {
        3
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
        infer_through_lowering(self, inputs)
    }

    fn lower(&self, ctx: &LowerContext) -> GraphResult<Lowering> {
        self.precision.check(self.name(), ctx.generation)?;

        let graph = match (self.activation, ctx.generation) {
            (MlpActivation::Swiglu, SocGeneration::Gen2) => {
                let mut graph = KernelGraph::new(3, 1, 2);
                let (x, w_up, w_down) = (graph.input(0), graph.input(1), graph.input(2));
                let (up, act) = (graph.internal(0), graph.internal(1));

                graph.push(MATMUL, &[x, w_up], &[up]).debug_id("mlp.up");
                let swiglu = OpParam::Activation {
                    kind: ActivationKind::Swiglu,
                };
                graph.push(swiglu, &[up], &[act]).debug_id("mlp.swiglu");
                graph.push(MATMUL, &[act, w_down], &[graph.output(0)]).debug_id("mlp.down");
                graph
            }
            (MlpActivation::Swiglu, SocGeneration::Gen1) => {
                let mut graph = KernelGraph::new(3, 1, 5);
                let (x, w_up, w_down) = (graph.input(0), graph.input(1), graph.input(2));
                let up = graph.internal(0);
                let (gate, lin) = (graph.internal(1), graph.internal(2));
                let (gate_act, prod) = (graph.internal(3), graph.internal(4));

                graph.push(MATMUL, &[x, w_up], &[up]).debug_id("mlp.up");
                graph
                    .push(OpParam::Split { axis: -1, parts: 2 }, &[up], &[gate, lin])
                    .debug_id("mlp.split");
                let silu = OpParam::Activation {
                    kind: ActivationKind::Silu,
                };
                graph.push(silu, &[gate], &[gate_act]).debug_id("mlp.silu");
                graph
                    .push(OpParam::Elewise { kind: ElewiseKind::Mul }, &[gate_act, lin], &[prod])
                    .debug_id("mlp.gate");
                graph.push(MATMUL, &[prod, w_down], &[graph.output(0)]).debug_id("mlp.down");
                graph
            }
            (MlpActivation::Gelu, SocGeneration::Gen1 | SocGeneration::Gen2) => {
                let mut graph = KernelGraph::new(3, 1, 2);
                let (x, w_up, w_down) = (graph.input(0), graph.input(1), graph.input(2));
                let (up, act) = (graph.internal(0), graph.internal(1));

                graph.push(MATMUL, &[x, w_up], &[up]).debug_id("mlp.up");
                let gelu = OpParam::Activation {
                    kind: ActivationKind::Gelu,
                };
                graph.push(gelu, &[up], &[act]).debug_id("mlp.gelu");
                graph.push(MATMUL, &[act, w_down], &[graph.output(0)]).debug_id("mlp.down");
                graph
            }
        };

        Ok(Lowering::Graph(graph))
    }
}

impl ResidualMlpOperation {
    pub fn new(eps: f32, mlp: MlpOperation) -> Self {
        ResidualMlpOperation { eps, mlp }
    }
}

impl Operation for ResidualMlpOperation {
    fn name(&self) -> &str {
        "ResidualMlp"
    }

    fn input_num(&self) -> usize {
        4
    }

    fn output_num(&self) -> usize {
        1
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>> {
        infer_through_lowering(self, inputs)
    }

    fn lower(&self, ctx: &LowerContext) -> GraphResult<Lowering> {
        // surface an unsupported nested mlp here instead of at runner creation
        self.mlp.lower(ctx)?;

        let mut graph = KernelGraph::new(4, 1, 2);
        let (x, gamma) = (graph.input(0), graph.input(1));
        let (w_up, w_down) = (graph.input(2), graph.input(3));
        let (normed, mlp_out) = (graph.internal(0), graph.internal(1));

        graph
            .push(OpParam::rms_norm(self.eps), &[x, gamma], &[normed])
            .debug_id("residual.norm");
        let mlp: Arc<dyn Operation> = Arc::new(self.mlp);
        graph.push(mlp, &[normed, w_up, w_down], &[mlp_out]).debug_id("residual.mlp");
        graph
            .push(OpParam::Elewise { kind: ElewiseKind::Add }, &[x, mlp_out], &[graph.output(0)])
            .debug_id("residual.add");

        Ok(Lowering::Graph(graph))
    }
}
