#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]

//! Tensor descriptors, kernel graphs and composable operations for NPU operator execution.
//!
//! The core types of this crate are [KernelGraph](graph::KernelGraph), a dataflow graph of primitive kernels
//! over a fixed slot arena, and the [Operation](operation::Operation) trait, the user-facing unit
//! that infers output shapes and lowers itself into a kernel or a graph for a given hardware generation.
//!
//! An example building and shape-inferring a fused QKV projection:
//! ```
//! # use npu_graph::dtype::DType;
//! # use npu_graph::operation::Operation;
//! # use npu_graph::ops::{FusedQkvOperation, Precision};
//! # use npu_graph::shape;
//! # use npu_graph::shape::TensorDesc;
//! let op = FusedQkvOperation::new(Precision::Fp16);
//! let x = TensorDesc::new(DType::F16, shape![2, 4, 16]);
//! let w = TensorDesc::new(DType::F16, shape![16, 24]);
//!
//! let outputs = op.infer_shape(&[x, w]).unwrap();
//! assert_eq!(outputs.len(), 3);
//! assert_eq!(outputs[0].shape, shape![2, 4, 8]);
//! ```
//!
//! Executing operations lives in the `npu-eval` crate.

/// The [DType](dtype::DType) and [Format](dtype::Format) enums.
pub mod dtype;
/// The error type shared by shape inference, graph validation and lowering.
pub mod error;
/// Hardware generation queries.
pub mod hardware;
/// The [Shape](shape::Shape) and [TensorDesc](shape::TensorDesc) types.
pub mod shape;

/// Primitive kernel parameters and their shape rules.
pub mod param;
/// The kernel dataflow graph.
pub mod graph;
/// The [Operation](operation::Operation) trait.
pub mod operation;
/// Built-in operations.
pub mod ops;
