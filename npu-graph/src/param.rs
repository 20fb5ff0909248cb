use decorum::Total;

use crate::dtype::DType;
use crate::error::{GraphError, GraphResult};
use crate::shape::{Shape, TensorDesc};

/// Tag identifying a primitive kernel family.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OpKind {
    Elewise,
    MatMul,
    Norm,
    Activation,
    Softmax,
    Split,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ElewiseKind {
    Add,
    Sub,
    Mul,
    /// Multiply by a scalar.
    Muls(Total<f32>),
    /// Convert to another dtype.
    Cast(DType),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NormKind {
    RmsNorm,
    LayerNorm,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ActivationKind {
    Relu,
    Gelu,
    Silu,
    /// `silu(gate) * up`, where the last axis of the input is `[gate, up]`.
    Swiglu,
}

/// The parameter payload of a primitive kernel node.
///
/// This is a closed set: kernel selection matches on it exhaustively instead of casting type-erased parameters.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum OpParam {
    Elewise { kind: ElewiseKind },
    /// `[.., M, K] x [K, N] -> [.., M, N]`, or `[N, K]` weights with `transpose_b`.
    /// With `with_bias` a third `[N]` input is added to every row.
    MatMul { transpose_b: bool, with_bias: bool },
    /// Normalization over the last axis: inputs are `x, gamma` (and `beta` for layernorm).
    Norm { kind: NormKind, eps: Total<f32> },
    Activation { kind: ActivationKind },
    /// Softmax over the last axis. If `masked`, a second `I32` input `[B]` holds the number
    /// of valid elements for each batch entry, the remaining outputs are zero.
    Softmax { masked: bool },
    /// Split `axis` into `parts` equal outputs. Negative axes count from the end.
    Split { axis: isize, parts: usize },
}

impl ElewiseKind {
    pub fn input_num(self) -> usize {
        match self {
            ElewiseKind::Add | ElewiseKind::Sub | ElewiseKind::Mul => 2,
            ElewiseKind::Muls(_) | ElewiseKind::Cast(_) => 1,
        }
    }

    pub fn muls(scale: f32) -> Self {
        ElewiseKind::Muls(Total::from_inner(scale))
    }
}

impl OpParam {
    pub fn kind(&self) -> OpKind {
        match self {
            OpParam::Elewise { .. } => OpKind::Elewise,
            OpParam::MatMul { .. } => OpKind::MatMul,
            OpParam::Norm { .. } => OpKind::Norm,
            OpParam::Activation { .. } => OpKind::Activation,
            OpParam::Softmax { .. } => OpKind::Softmax,
            OpParam::Split { .. } => OpKind::Split,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpParam::Elewise { .. } => "Elewise",
            OpParam::MatMul { .. } => "MatMul",
            OpParam::Norm { kind: NormKind::RmsNorm, .. } => "RmsNorm",
            OpParam::Norm { kind: NormKind::LayerNorm, .. } => "LayerNorm",
            OpParam::Activation { .. } => "Activation",
            OpParam::Softmax { .. } => "Softmax",
            OpParam::Split { .. } => "Split",
        }
    }

    pub fn rms_norm(eps: f32) -> Self {
        OpParam::Norm {
            kind: NormKind::RmsNorm,
            eps: Total::from_inner(eps),
        }
    }

    pub fn layer_norm(eps: f32) -> Self {
        OpParam::Norm {
            kind: NormKind::LayerNorm,
            eps: Total::from_inner(eps),
        }
    }

    pub fn input_num(&self) -> usize {
        match *self {
            OpParam::Elewise { kind } => kind.input_num(),
            OpParam::MatMul { with_bias, .. } => 2 + with_bias as usize,
            OpParam::Norm { kind: NormKind::RmsNorm, .. } => 2,
            OpParam::Norm { kind: NormKind::LayerNorm, .. } => 3,
            OpParam::Activation { .. } => 1,
            OpParam::Softmax { masked } => 1 + masked as usize,
            OpParam::Split { .. } => 1,
        }
    }

    pub fn output_num(&self) -> usize {
        match *self {
            OpParam::Split { parts, .. } => parts,
            _ => 1,
        }
    }

    /// Inputs whose host-mirror data must be supplied by the caller.
    pub fn host_data_inputs(&self) -> &'static [usize] {
        match self {
            OpParam::Softmax { masked: true } => &[1],
            _ => &[],
        }
    }

    /// The primitive shape rule of this parameter.
    pub fn infer_shape(&self, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>> {
        let op = self.name();
        if inputs.len() != self.input_num() {
            return Err(GraphError::WrongInputCount {
                op: op.to_owned(),
                expected: self.input_num(),
                actual: inputs.len(),
            });
        }

        match *self {
            OpParam::Elewise { kind } => match kind {
                ElewiseKind::Add | ElewiseKind::Sub | ElewiseKind::Mul => {
                    let (a, b) = (&inputs[0], &inputs[1]);
                    if a.dtype != b.dtype {
                        return Err(GraphError::invalid_input(
                            op,
                            1,
                            format!("dtype {:?} does not match {:?}", b.dtype, a.dtype),
                        ));
                    }
                    let shape = a.shape.broadcast(&b.shape).ok_or_else(|| {
                        GraphError::invalid_input(op, 1, format!("cannot broadcast {} with {}", b.shape, a.shape))
                    })?;
                    Ok(vec![a.with_shape(shape)])
                }
                ElewiseKind::Muls(_) => Ok(vec![inputs[0].clone()]),
                ElewiseKind::Cast(dtype) => Ok(vec![inputs[0].with_dtype(dtype)]),
            },
            OpParam::MatMul { transpose_b, with_bias } => {
                let (a, b) = (&inputs[0], &inputs[1]);
                if a.rank() < 2 {
                    return Err(GraphError::invalid_input(op, 0, format!("expected rank >= 2, got {}", a.shape)));
                }
                expect_rank(op, 1, &b.shape, 2)?;
                if a.dtype != b.dtype {
                    return Err(GraphError::invalid_input(op, 1, "weight dtype does not match input dtype"));
                }

                let k = a.shape.dims()[a.rank() - 1];
                let (bk, n) = if transpose_b {
                    (b.shape.dims()[1], b.shape.dims()[0])
                } else {
                    (b.shape.dims()[0], b.shape.dims()[1])
                };
                if k != bk {
                    return Err(GraphError::invalid_input(
                        op,
                        1,
                        format!("reduction size {} does not match input {}", bk, a.shape),
                    ));
                }
                if with_bias {
                    let bias = &inputs[2];
                    if bias.shape != crate::shape![n] {
                        return Err(GraphError::invalid_input(op, 2, format!("expected bias [{}]", n)));
                    }
                    if bias.dtype != a.dtype {
                        return Err(GraphError::invalid_input(
                            op,
                            2,
                            format!("bias dtype {:?} does not match input dtype {:?}", bias.dtype, a.dtype),
                        ));
                    }
                }

                let shape = a.shape.with_dim(a.rank() - 1, n);
                Ok(vec![TensorDesc::new(a.dtype, shape)])
            }
            OpParam::Norm { .. } => {
                let x = &inputs[0];
                let h = x.shape.last().ok_or_else(|| GraphError::invalid_input(op, 0, "scalar input"))?;
                for (i, param) in inputs.iter().enumerate().skip(1) {
                    if param.shape != crate::shape![h] {
                        return Err(GraphError::invalid_input(op, i, format!("expected [{}], got {}", h, param.shape)));
                    }
                    if param.dtype != x.dtype {
                        return Err(GraphError::invalid_input(
                            op,
                            i,
                            format!("dtype {:?} does not match input dtype {:?}", param.dtype, x.dtype),
                        ));
                    }
                }
                Ok(vec![x.clone()])
            }
            OpParam::Activation { kind } => {
                let x = &inputs[0];
                match kind {
                    ActivationKind::Swiglu => {
                        let last = x.shape.last().unwrap_or(0);
                        if last == 0 || last % 2 != 0 {
                            return Err(GraphError::invalid_input(op, 0, "swiglu needs an even, non-empty last axis"));
                        }
                        Ok(vec![x.with_shape(x.shape.with_dim(x.rank() - 1, last / 2))])
                    }
                    ActivationKind::Relu | ActivationKind::Gelu | ActivationKind::Silu => Ok(vec![x.clone()]),
                }
            }
            OpParam::Softmax { masked } => {
                let x = &inputs[0];
                if x.rank() == 0 {
                    return Err(GraphError::invalid_input(op, 0, "scalar input"));
                }
                if masked {
                    let lens = &inputs[1];
                    if lens.dtype != DType::I32 || lens.shape != crate::shape![x.shape.dims()[0]] {
                        return Err(GraphError::invalid_input(
                            op,
                            1,
                            format!("expected i32[{}] sequence lengths, got {}", x.shape.dims()[0], lens),
                        ));
                    }
                    if x.rank() < 2 {
                        return Err(GraphError::invalid_input(op, 0, "masked softmax needs a batch axis"));
                    }
                }
                Ok(vec![x.clone()])
            }
            OpParam::Split { axis, parts } => {
                let x = &inputs[0];
                let axis = x
                    .shape
                    .axis(axis)
                    .ok_or_else(|| GraphError::invalid_param(op, format!("axis {} out of range for {}", axis, x.shape)))?;
                let size = x.shape.dims()[axis];
                if parts == 0 || size % parts != 0 {
                    return Err(GraphError::invalid_param(
                        op,
                        format!("cannot split size {} into {} parts", size, parts),
                    ));
                }
                let part = x.with_shape(x.shape.with_dim(axis, size / parts));
                Ok(vec![part; parts])
            }
        }
    }
}

pub(crate) fn expect_rank(op: &str, input: usize, shape: &Shape, rank: usize) -> GraphResult<()> {
    if shape.rank() != rank {
        return Err(GraphError::invalid_input(
            op,
            input,
            format!("expected rank {}, got {}", rank, shape),
        ));
    }
    Ok(())
}
