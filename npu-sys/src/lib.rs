#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]

//! The device boundary used by the operator execution engine.
//!
//! This crate exposes the two primitives the engine consumes from the hardware:
//! * memory reservation: [Device::reserve](device::Device::reserve) returns a reference-counted [DevicePtr](mem::DevicePtr),
//!   the reservation is released when the last pointer into it is dropped.
//! * kernel launch: [Stream::launch](stream::Stream::launch) enqueues a kernel with its tiling data and operand addresses,
//!   launches complete in submission order.
//!
//! The device is emulated on the host: device memory is host memory and kernels are host functions
//! called once per core. This keeps the engine above it testable without hardware.

/// Devices and their configuration.
pub mod device;
/// Error type.
pub mod error;
/// Device memory.
pub mod mem;
/// Streams and kernel launches.
pub mod stream;
