use std::fmt::{Debug, Formatter};

use indexmap::IndexMap;
use itertools::Itertools;

use npu_graph::hardware::SocGeneration;
use npu_graph::param::{OpKind, OpParam};
use npu_graph::shape::TensorDesc;
use npu_sys::stream::KernelBinary;

use crate::error::{EvalError, EvalResult};
use crate::tensor::HostData;

/// Kernel result caching.
pub mod cache;
/// Work partitioning across cores.
pub mod tiling;

pub mod activation;
pub mod elewise;
pub mod matmul;
pub mod norm;
pub mod softmax;
pub mod split;

/// Everything a kernel needs to decide whether it can run and how: the op parameters
/// and the concrete tensors it is launched on.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct LaunchParam {
    pub param: OpParam,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    /// Host-mirror data of the inputs that carry it.
    pub host_data: Vec<Option<HostData>>,
}

/// The hardware facts tiling depends on.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TilingContext {
    pub generation: SocGeneration,
    pub core_count: u32,
}

/// The launch configuration computed by a kernel's tiling function.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Tiling {
    /// Number of cores to launch on.
    pub block_dim: u32,
    /// Index into [KernelDef::variants] of the precompiled variant to dispatch.
    pub key: usize,
    /// Serialized tiling struct passed to the kernel.
    pub data: Vec<u8>,
    /// Scratch bytes the kernel needs.
    pub workspace_bytes: usize,
}

pub type CanSupportFn = fn(&LaunchParam, SocGeneration) -> bool;
pub type TilingFn = fn(&LaunchParam, &TilingContext) -> EvalResult<Tiling>;

/// A kernel family: a support predicate, a tiling function and the precompiled variants the tiling key selects between.
#[derive(Clone)]
pub struct KernelDef {
    pub name: &'static str,
    pub kind: OpKind,
    pub can_support: CanSupportFn,
    pub tiling: TilingFn,
    pub variants: &'static [KernelBinary],
}

/// The outcome of kernel selection for one launch.
#[derive(Debug, Clone)]
pub struct Selection {
    pub kernel: &'static str,
    pub binary: KernelBinary,
    pub tiling: Tiling,
}

/// The set of kernels available to a runtime, in registration order.
///
/// Built once by the runtime and passed down explicitly, see [KernelRegistry::with_builtin_kernels].
#[derive(Default)]
pub struct KernelRegistry {
    kernels: IndexMap<&'static str, KernelDef>,
}

impl LaunchParam {
    pub fn new(param: OpParam, inputs: Vec<TensorDesc>, outputs: Vec<TensorDesc>) -> Self {
        let host_data = vec![None; inputs.len()];
        LaunchParam {
            param,
            inputs,
            outputs,
            host_data,
        }
    }

    pub fn with_host_data(mut self, input: usize, data: HostData) -> Self {
        self.host_data[input] = Some(data);
        self
    }

    fn describe_inputs(&self) -> String {
        self.inputs.iter().map(|d| d.to_string()).join(", ")
    }
}

impl KernelDef {
    /// Compute the tiling and check that its key names one of the variants.
    pub fn tile(&self, param: &LaunchParam, ctx: &TilingContext) -> EvalResult<(KernelBinary, Tiling)> {
        let tiling = (self.tiling)(param, ctx)?;

        if tiling.block_dim == 0 || tiling.block_dim > ctx.core_count {
            return Err(EvalError::TilingFailed {
                kernel: self.name,
                reason: format!("block_dim {} not in 1..={}", tiling.block_dim, ctx.core_count),
            });
        }
        let binary = *self.variants.get(tiling.key).ok_or_else(|| EvalError::TilingFailed {
            kernel: self.name,
            reason: format!("dispatch key {} out of range for {} variants", tiling.key, self.variants.len()),
        })?;

        Ok((binary, tiling))
    }
}

impl KernelRegistry {
    pub fn new() -> Self {
        KernelRegistry::default()
    }

    /// A registry containing every kernel of this crate, in their preferred order.
    pub fn with_builtin_kernels() -> Self {
        let mut registry = KernelRegistry::new();
        registry.register(elewise::ELEWISE_FLOAT);
        registry.register(elewise::ELEWISE_INT);
        registry.register(matmul::MATMUL_ND);
        registry.register(matmul::MATMUL_NZ);
        registry.register(norm::NORM);
        registry.register(activation::ACTIVATION);
        registry.register(softmax::SOFTMAX);
        registry.register(split::SPLIT);
        registry
    }

    /// Add a kernel. Kernels registered earlier are preferred.
    pub fn register(&mut self, def: KernelDef) {
        let name = def.name;
        let prev = self.kernels.insert(name, def);
        assert!(prev.is_none(), "Kernel {} registered twice", name);
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&KernelDef> {
        self.kernels.get(name)
    }

    pub fn candidates(&self, kind: OpKind) -> impl Iterator<Item = &KernelDef> {
        self.kernels.values().filter(move |k| k.kind == kind)
    }

    /// Pick the first candidate that supports `param`, then tile it.
    ///
    /// Rejected candidates are skipped, a tiling failure of the supporting candidate ends the selection.
    pub fn select(&self, param: &LaunchParam, ctx: &TilingContext) -> EvalResult<Selection> {
        let mut rejected = 0;

        for kernel in self.candidates(param.param.kind()) {
            if !(kernel.can_support)(param, ctx.generation) {
                tracing::trace!(kernel = kernel.name, op = param.param.name(), "kernel rejected launch");
                rejected += 1;
                continue;
            }

            let (binary, tiling) = kernel.tile(param, ctx)?;
            tracing::debug!(
                kernel = kernel.name,
                variant = binary.name,
                block_dim = tiling.block_dim,
                workspace = tiling.workspace_bytes,
                "selected kernel"
            );
            return Ok(Selection {
                kernel: kernel.name,
                binary,
                tiling,
            });
        }

        tracing::error!(op = param.param.name(), inputs = %param.describe_inputs(), "no kernel supports launch");
        Err(EvalError::NoKernel {
            op: param.param.name().to_owned(),
            inputs: param.describe_inputs(),
            candidates: rejected,
        })
    }
}

impl Debug for KernelDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let variants = self.variants.iter().map(|v| v.name).join(", ");
        write!(f, "KernelDef({}, {:?}, [{}])", self.name, self.kind, variants)
    }
}

impl Debug for KernelRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "KernelRegistry {{")?;
        for kernel in self.kernels.values() {
            writeln!(f, "  {:?},", kernel)?;
        }
        write!(f, "}}")
    }
}

/// Shorthand for the tiling failures kernels report.
pub(crate) fn tiling_failed(kernel: &'static str, reason: impl Into<String>) -> EvalError {
    EvalError::TilingFailed {
        kernel,
        reason: reason.into(),
    }
}

/// Checks shared by the support predicates.
pub(crate) fn all_nd(param: &LaunchParam) -> bool {
    param
        .inputs
        .iter()
        .chain(&param.outputs)
        .all(|d| d.format == npu_graph::dtype::Format::Nd)
}

/// Whether every input has the dtype of the first one, the kernels read all operands with that dtype.
pub(crate) fn inputs_share_dtype(param: &LaunchParam) -> bool {
    let dtype = param.inputs[0].dtype;
    param.inputs.iter().all(|d| d.dtype == dtype)
}

/// Element count of a launch tensor, failing the tiling when it overflows.
pub(crate) fn checked_numel(kernel: &'static str, desc: &TensorDesc) -> EvalResult<usize> {
    desc.checked_numel()
        .ok_or_else(|| tiling_failed(kernel, format!("element count of {} overflows", desc)))
}

pub(crate) fn float_supported(dtype: npu_graph::dtype::DType, generation: SocGeneration) -> bool {
    use npu_graph::dtype::DType;
    match dtype {
        DType::F16 | DType::F32 => true,
        DType::BF16 => generation.supports_bf16(),
        DType::I8 | DType::I32 | DType::I64 | DType::U8 | DType::Bool => false,
    }
}

/// Index of a float dtype in the `[f16, bf16, f32]` variant lists.
pub(crate) fn float_key(dtype: npu_graph::dtype::DType) -> usize {
    use npu_graph::dtype::DType;
    match dtype {
        DType::F16 => 0,
        DType::BF16 => 1,
        _ => 2,
    }
}

/// Decode a dtype code inside a kernel entry.
pub(crate) fn entry_dtype(code: u32) -> Result<npu_graph::dtype::DType, String> {
    npu_graph::dtype::DType::from_code(code).ok_or_else(|| format!("invalid dtype code {}", code))
}

/// Check a kernel operand has the size the tiling implies.
pub(crate) fn expect_len(what: &str, buffer: &[u8], len: usize) -> Result<(), String> {
    if buffer.len() < len {
        return Err(format!("{} has {} bytes, expected {}", what, buffer.len(), len));
    }
    Ok(())
}
