#![warn(missing_debug_implementations)]

//! Execution of [npu_graph] operations: intermediate memory allocation, kernel selection and tiling,
//! and graph runners. The core type is [Runner](runner::Runner), [OperationExecutor](executor::OperationExecutor)
//! wraps it for host arrays.
//!
//! # Quick demo
//!
//! ```
//! # use std::sync::Arc;
//! # use ndarray::{ArrayD, IxDyn};
//! # use npu_eval::config::EvalConfig;
//! # use npu_eval::executor::OperationExecutor;
//! # use npu_eval::kernel::KernelRegistry;
//! # use npu_eval::runner::Context;
//! # use npu_graph::dtype::DType;
//! # use npu_graph::ops::ElewiseOperation;
//! # use npu_graph::shape;
//! # use npu_graph::shape::TensorDesc;
//! # use npu_sys::device::{Device, DeviceConfig};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // a host-emulated device and the builtin kernels
//! let device = Device::new(DeviceConfig::default());
//! let registry = Arc::new(KernelRegistry::with_builtin_kernels());
//! let ctx = Context::new(device, registry, EvalConfig::default());
//!
//! // build an executor for a single add
//! let desc = TensorDesc::new(DType::F16, shape![1, 2]);
//! let mut executor = OperationExecutor::new(ctx, Arc::new(ElewiseOperation::add()), &[desc.clone(), desc])?;
//!
//! // evaluate it
//! let x = ArrayD::from_elem(IxDyn(&[1, 2]), 2.0);
//! let outputs = executor.evaluate(&[x.clone(), x])?;
//! assert!(outputs[0].iter().all(|&y| y == 4.0));
//! # Ok(())
//! # }
//! ```

/// Export the [Device](npu_sys::device::Device) type for convenience.
pub use npu_sys::device::Device;

/// Intermediate tensor allocation.
pub mod alloc;
/// Settings for execution.
pub mod config;
/// The error type of this crate.
pub mod error;
/// Convenience executor on host arrays, with profiling.
pub mod executor;
/// Conversion between host arrays and device bytes.
pub mod host;
/// The kernel registry, selection, tiling and the builtin kernels.
pub mod kernel;
/// Lowered operation execution.
pub mod runner;
/// Device tensors and variant packs.
pub mod tensor;
/// Testing and debugging infrastructure.
pub mod tester;
/// Miscellaneous utilities.
pub mod util;
