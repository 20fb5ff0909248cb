//! Built-in operations, from single-kernel wrappers up to composed transformer sublayers.

use crate::dtype::DType;
use crate::error::{GraphError, GraphResult};
use crate::hardware::SocGeneration;

pub mod basic;
pub mod linear;
pub mod mlp;
pub mod qkv;

pub use basic::{ActivationOperation, ElewiseOperation, RmsNormOperation, SoftmaxOperation};
pub use linear::LinearOperation;
pub use mlp::{MlpActivation, MlpOperation, ResidualMlpOperation};
pub use qkv::FusedQkvOperation;

/// The numeric mode an operation computes in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Precision {
    Fp16,
    Bf16,
    Fp32,
}

impl Precision {
    pub const ALL: [Precision; 3] = [Precision::Fp16, Precision::Bf16, Precision::Fp32];

    pub fn dtype(self) -> DType {
        match self {
            Precision::Fp16 => DType::F16,
            Precision::Bf16 => DType::BF16,
            Precision::Fp32 => DType::F32,
        }
    }

    /// Reject precisions the hardware cannot compute in.
    pub fn check(self, op: &str, generation: SocGeneration) -> GraphResult<()> {
        match (self, generation) {
            (Precision::Fp16 | Precision::Fp32, _) => Ok(()),
            (Precision::Bf16, SocGeneration::Gen2) => Ok(()),
            (Precision::Bf16, SocGeneration::Gen1) => Err(unsupported(op, generation, "bf16 needs the newer generation")),
        }
    }
}

/// Build an [GraphError::Unsupported] error, logging it at error severity.
pub fn unsupported(op: &str, generation: SocGeneration, reason: impl Into<String>) -> GraphError {
    let reason = reason.into();
    tracing::error!(op, ?generation, %reason, "unsupported operation combination");
    GraphError::Unsupported {
        op: op.to_owned(),
        generation,
        reason,
    }
}
