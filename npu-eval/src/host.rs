use ndarray::{ArrayD, Dimension, IxDyn};

use npu_graph::dtype::DType;
use npu_graph::shape::TensorDesc;

/// Encode a host array as the little-endian bytes of `dtype`, in logical (row-major) order.
///
/// Float values are rounded to the target precision, integer targets round to the nearest integer.
pub fn array_to_bytes(dtype: DType, array: &ArrayD<f32>) -> Vec<u8> {
    let mut bytes = vec![0; array.len() * dtype.size_bytes()];
    for (i, &x) in array.iter().enumerate() {
        dtype.write_f32(&mut bytes, i, x);
    }
    bytes
}

/// Decode the bytes of a tensor with descriptor `desc` into a host array.
///
/// Panics if `bytes` is shorter than the tensor.
pub fn bytes_to_array(desc: &TensorDesc, bytes: &[u8]) -> ArrayD<f32> {
    let strides = desc.shape.strides();
    ArrayD::from_shape_fn(IxDyn(desc.shape.dims()), |index| {
        let linear: usize = index.slice().iter().zip(&strides).map(|(i, s)| i * s).sum();
        desc.dtype.read_f32(bytes, linear)
    })
}
