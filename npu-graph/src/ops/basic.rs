use crate::dtype::DType;
use crate::error::GraphResult;
use crate::hardware::SocGeneration;
use crate::operation::{LowerContext, Lowering, Operation};
use crate::ops::unsupported;
use crate::param::{ActivationKind, ElewiseKind, OpParam};
use crate::shape::TensorDesc;

/// Elementwise binary ops, scalar multiply and dtype casts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ElewiseOperation {
    pub kind: ElewiseKind,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ActivationOperation {
    pub kind: ActivationKind,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RmsNormOperation {
    pub eps: f32,
}

/// Softmax over the last axis. The masked form takes an extra `I32` tensor of per-batch
/// sequence lengths, which must carry host data.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SoftmaxOperation {
    pub masked: bool,
}

impl ElewiseOperation {
    pub fn new(kind: ElewiseKind) -> Self {
        ElewiseOperation { kind }
    }

    pub fn add() -> Self {
        Self::new(ElewiseKind::Add)
    }

    fn param(&self) -> OpParam {
        OpParam::Elewise { kind: self.kind }
    }
}

impl Operation for ElewiseOperation {
    fn name(&self) -> &str {
        "Elewise"
    }

    fn input_num(&self) -> usize {
        self.kind.input_num()
    }

    fn output_num(&self) -> usize {
        1
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>> {
        self.param().infer_shape(inputs)
    }

    fn lower(&self, ctx: &LowerContext) -> GraphResult<Lowering> {
        match (self.kind, ctx.generation) {
            (ElewiseKind::Cast(DType::BF16), SocGeneration::Gen1) => {
                Err(unsupported(self.name(), ctx.generation, "cast to bf16 needs the newer generation"))
            }
            _ => Ok(Lowering::Kernel(self.param())),
        }
    }
}

impl Operation for ActivationOperation {
    fn name(&self) -> &str {
        "Activation"
    }

    fn input_num(&self) -> usize {
        1
    }

    fn output_num(&self) -> usize {
        1
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>> {
        OpParam::Activation { kind: self.kind }.infer_shape(inputs)
    }

    fn lower(&self, _: &LowerContext) -> GraphResult<Lowering> {
        Ok(Lowering::Kernel(OpParam::Activation { kind: self.kind }))
    }
}

impl Operation for RmsNormOperation {
    fn name(&self) -> &str {
        "RmsNorm"
    }

    fn input_num(&self) -> usize {
        2
    }

    fn output_num(&self) -> usize {
        1
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>> {
        OpParam::rms_norm(self.eps).infer_shape(inputs)
    }

    fn lower(&self, _: &LowerContext) -> GraphResult<Lowering> {
        Ok(Lowering::Kernel(OpParam::rms_norm(self.eps)))
    }
}

impl Operation for SoftmaxOperation {
    fn name(&self) -> &str {
        if self.masked {
            "MaskedSoftmax"
        } else {
            "Softmax"
        }
    }

    fn input_num(&self) -> usize {
        1 + self.masked as usize
    }

    fn output_num(&self) -> usize {
        1
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>> {
        OpParam::Softmax { masked: self.masked }.infer_shape(inputs)
    }

    fn lower(&self, _: &LowerContext) -> GraphResult<Lowering> {
        Ok(Lowering::Kernel(OpParam::Softmax { masked: self.masked }))
    }
}
