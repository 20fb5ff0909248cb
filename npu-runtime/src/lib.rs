#![warn(missing_debug_implementations)]

//! The entry point for running operations: builds the device, the kernel registry and the shared execution state once,
//! then hands out [PreparedOperation]s that evaluate host arrays.
//!
//! # Quick demo
//!
//! ```
//! # use std::sync::Arc;
//! # use ndarray::{ArrayD, IxDyn};
//! # use npu_graph::dtype::DType;
//! # use npu_graph::hardware::SocGeneration;
//! # use npu_graph::ops::{MlpActivation, MlpOperation, Precision};
//! # use npu_graph::shape;
//! # use npu_graph::shape::TensorDesc;
//! # use npu_runtime::{Runtime, RuntimeConfig};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // pick the hardware generation at runtime
//! let runtime = Runtime::new(RuntimeConfig::for_generation(SocGeneration::Gen1))?;
//!
//! // lower the operation and select kernels for these input shapes
//! let op = Arc::new(MlpOperation::new(MlpActivation::Swiglu, Precision::Fp32));
//! let inputs = [
//!     TensorDesc::new(DType::F32, shape![1, 4, 8]),
//!     TensorDesc::new(DType::F32, shape![8, 32]),
//!     TensorDesc::new(DType::F32, shape![16, 8]),
//! ];
//! let mut prepared = runtime.prepare(op, &inputs)?;
//!
//! // evaluate with host arrays
//! let arrays = inputs.iter().map(|d| ArrayD::zeros(IxDyn(d.shape.dims()))).collect::<Vec<_>>();
//! let outputs = prepared.eval(&arrays)?;
//! assert_eq!(outputs[0].shape(), &[1, 4, 8]);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ndarray::ArrayD;

use npu_eval::alloc::pool::BlockPool;
use npu_eval::config::EvalConfig;
use npu_eval::error::EvalResult;
use npu_eval::executor::{OperationExecutor, Profile};
use npu_eval::kernel::cache::CacheStats;
use npu_eval::kernel::KernelRegistry;
use npu_eval::runner::{Context, MemoryUsage};
use npu_eval::tensor::HostData;
use npu_graph::hardware::SocGeneration;
use npu_graph::operation::Operation;
use npu_graph::shape::TensorDesc;
use npu_sys::device::{Device, DeviceConfig};

/// Everything needed to bring up a [Runtime].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub device: DeviceConfig,
    pub eval: EvalConfig,
    /// If set, all prepared operations allocate their intermediates from one pool of this many bytes
    /// instead of each reserving [EvalConfig::pool_bytes] for itself.
    pub shared_pool_bytes: Option<usize>,
}

/// A device together with the kernels available on it.
#[derive(Debug)]
pub struct Runtime {
    ctx: Context,
}

/// An operation that has been lowered, set up and bound to device memory for fixed input shapes.
#[derive(Debug)]
pub struct PreparedOperation {
    executor: OperationExecutor,
}

impl RuntimeConfig {
    pub fn for_generation(generation: SocGeneration) -> Self {
        RuntimeConfig {
            device: DeviceConfig::for_generation(generation),
            eval: EvalConfig::default(),
            shared_pool_bytes: None,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig::for_generation(SocGeneration::Gen2)
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> EvalResult<Runtime> {
        let device = Device::new(config.device);
        let registry = Arc::new(KernelRegistry::with_builtin_kernels());

        let mut ctx = Context::new(device, registry, config.eval);
        if let Some(bytes) = config.shared_pool_bytes {
            let pool = BlockPool::new(&ctx.device, bytes)?;
            ctx = ctx.with_shared_pool(Arc::new(pool));
        }

        tracing::info!(
            generation = ?ctx.generation(),
            cores = ctx.device.core_count(),
            kernels = ctx.registry.len(),
            shared_pool = ?config.shared_pool_bytes,
            "runtime ready"
        );
        Ok(Runtime { ctx })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn generation(&self) -> SocGeneration {
        self.ctx.generation()
    }

    /// Selection cache statistics, `None` if caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.ctx.tiling_cache.as_ref().map(|c| c.stats())
    }

    pub fn prepare(&self, op: Arc<dyn Operation>, inputs: &[TensorDesc]) -> EvalResult<PreparedOperation> {
        let host_data = vec![None; inputs.len()];
        self.prepare_with_host_data(op, inputs, host_data)
    }

    /// Prepare an operation whose kernels read some inputs on the host during tiling, such as sequence lengths.
    pub fn prepare_with_host_data(
        &self,
        op: Arc<dyn Operation>,
        inputs: &[TensorDesc],
        host_data: Vec<Option<HostData>>,
    ) -> EvalResult<PreparedOperation> {
        let name = op.name().to_owned();
        let executor = OperationExecutor::with_host_data(self.ctx.clone(), op, inputs, host_data)?;
        tracing::debug!(op = %name, mem_usage = ?executor.mem_usage(), "prepared operation");
        Ok(PreparedOperation { executor })
    }
}

impl PreparedOperation {
    pub fn eval(&mut self, inputs: &[ArrayD<f32>]) -> EvalResult<Vec<ArrayD<f32>>> {
        self.executor.evaluate(inputs)
    }

    pub fn set_host_data(&mut self, input: usize, host_data: HostData) -> EvalResult<()> {
        self.executor.set_host_data(input, host_data)
    }

    pub fn set_profile(&mut self, profile: bool) {
        self.executor.set_profile(profile)
    }

    pub fn last_profile(&self) -> Option<&Profile> {
        self.executor.last_profile()
    }

    pub fn mem_usage(&self) -> MemoryUsage {
        self.executor.mem_usage()
    }

    /// Names of the selected kernel variants, in dispatch order.
    pub fn kernels(&self) -> Vec<&'static str> {
        self.executor.runner().selected_variants()
    }

    pub fn executor(&self) -> &OperationExecutor {
        &self.executor
    }
}
