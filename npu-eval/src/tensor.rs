use std::fmt::{Debug, Formatter};

use npu_graph::shape::TensorDesc;
use npu_sys::device::Device;
use npu_sys::mem::DevicePtr;

use crate::error::EvalResult;

/// Read-only values of a tensor that are known on the host before execution, such as sequence lengths.
///
/// Kernels that need these read them during tiling, they are never copied or allocated by a graph.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct HostData {
    values: Vec<i64>,
}

/// A tensor as seen by a runner: a descriptor, optionally bound to device memory, optionally with host data.
#[derive(Clone)]
pub struct DeviceTensor {
    desc: TensorDesc,
    ptr: Option<DevicePtr>,
    host_data: Option<HostData>,
}

/// The tensors of a single execution, bound to the inputs and outputs of an operation in order.
///
/// Built fresh for every call. The workspace is passed to [Runner::execute](crate::runner::Runner::execute) separately.
#[derive(Debug, Clone, Default)]
pub struct VariantPack {
    pub inputs: Vec<DeviceTensor>,
    pub outputs: Vec<DeviceTensor>,
}

impl HostData {
    pub fn new(values: Vec<i64>) -> Self {
        HostData { values }
    }

    pub fn from_i32(values: &[i32]) -> Self {
        HostData::new(values.iter().map(|&v| v as i64).collect())
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl DeviceTensor {
    /// A tensor with its own fresh device reservation.
    pub fn alloc(device: &Device, desc: TensorDesc) -> EvalResult<Self> {
        let ptr = device.reserve(desc.size_bytes()?)?;
        Ok(DeviceTensor {
            desc,
            ptr: Some(ptr),
            host_data: None,
        })
    }

    /// A tensor that only has a descriptor, enough for [Runner::setup](crate::runner::Runner::setup).
    pub fn unbound(desc: TensorDesc) -> Self {
        DeviceTensor {
            desc,
            ptr: None,
            host_data: None,
        }
    }

    /// Bind `desc` to existing memory, checking the memory is large enough.
    pub fn bind(desc: TensorDesc, ptr: DevicePtr) -> EvalResult<Self> {
        ptr.check_in_bounds(desc.size_bytes()?)?;
        Ok(DeviceTensor {
            desc,
            ptr: Some(ptr),
            host_data: None,
        })
    }

    pub fn with_host_data(mut self, host_data: HostData) -> Self {
        self.host_data = Some(host_data);
        self
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn ptr(&self) -> Option<&DevicePtr> {
        self.ptr.as_ref()
    }

    pub fn host_data(&self) -> Option<&HostData> {
        self.host_data.as_ref()
    }

    pub fn size_bytes(&self) -> EvalResult<usize> {
        Ok(self.desc.size_bytes()?)
    }

    /// The same memory and host data seen through a different descriptor, with the same byte size.
    pub fn view(&self, desc: TensorDesc) -> Self {
        DeviceTensor {
            desc,
            ptr: self.ptr.clone(),
            host_data: self.host_data.clone(),
        }
    }

    /// Copy `data` into the device memory of this tensor. Panics if the tensor is unbound.
    pub fn copy_from_host(&self, data: &[u8]) -> EvalResult<()> {
        let ptr = self.ptr.as_ref().expect("Tensor is not bound to device memory");
        ptr.copy_from_host(data)?;
        Ok(())
    }

    /// Read the full contents of this tensor. Panics if the tensor is unbound.
    pub fn read_to_host(&self) -> EvalResult<Vec<u8>> {
        let ptr = self.ptr.as_ref().expect("Tensor is not bound to device memory");
        Ok(ptr.read_bytes(self.size_bytes()?)?)
    }
}

impl VariantPack {
    pub fn new(inputs: Vec<DeviceTensor>, outputs: Vec<DeviceTensor>) -> Self {
        VariantPack { inputs, outputs }
    }

    pub fn input_descs(&self) -> Vec<TensorDesc> {
        self.inputs.iter().map(|t| t.desc.clone()).collect()
    }

    pub fn output_descs(&self) -> Vec<TensorDesc> {
        self.outputs.iter().map(|t| t.desc.clone()).collect()
    }
}

impl Debug for DeviceTensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeviceTensor({}", self.desc)?;
        match &self.ptr {
            Some(ptr) => write!(f, ", {:?}", ptr)?,
            None => write!(f, ", unbound")?,
        }
        if let Some(host_data) = &self.host_data {
            write!(f, ", host {:?}", host_data.values)?;
        }
        write!(f, ")")
    }
}
