use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytemuck::AnyBitPattern;

use crate::device::Device;
use crate::error::{SysError, SysResult};
use crate::mem::DevicePtr;

/// Host entry point of a kernel, called once for every core the kernel is launched on.
pub type KernelEntry = fn(&mut KernelCall) -> Result<(), String>;

/// A reference to a precompiled kernel variant.
#[derive(Copy, Clone)]
pub struct KernelBinary {
    pub name: &'static str,
    pub entry: KernelEntry,
}

#[derive(Debug, Clone)]
pub struct KernelOperand {
    pub ptr: DevicePtr,
    pub len_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct LaunchArgs {
    /// Number of cores to run on, the kernel sees `block_idx in 0..block_dim`.
    pub block_dim: u32,
    pub tiling: Vec<u8>,
    pub inputs: Vec<KernelOperand>,
    pub outputs: Vec<KernelOperand>,
    pub workspace: Option<KernelOperand>,
}

/// The view of a launch a kernel entry gets for a single core.
pub struct KernelCall<'a> {
    pub block_idx: u32,
    pub block_dim: u32,
    pub tiling: &'a [u8],
    pub inputs: &'a [Vec<u8>],
    pub outputs: &'a mut [Vec<u8>],
    pub workspace: &'a mut [u8],
}

/// Identifies a launch on a stream, in submission order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LaunchHandle(u64);

/// An in-order queue of kernel launches on a device.
///
/// Launching only enqueues, the kernels run when the stream is synchronized.
pub struct Stream {
    device: Device,
    state: Mutex<StreamState>,
}

struct StreamState {
    queue: VecDeque<(LaunchHandle, KernelBinary, LaunchArgs)>,
    next_handle: u64,
    completed: u64,
}

impl<'a> KernelCall<'a> {
    /// Decode the tiling data as a plain struct.
    pub fn tiling<T: AnyBitPattern>(&self) -> Result<T, String> {
        bytemuck::try_pod_read_unaligned(self.tiling).map_err(|e| format!("invalid tiling data: {}", e))
    }
}

impl Stream {
    pub fn new(device: Device) -> Self {
        Stream {
            device,
            state: Mutex::new(StreamState {
                queue: VecDeque::new(),
                next_handle: 0,
                completed: 0,
            }),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Enqueue a kernel launch. Operands are checked here, kernel faults only surface in [Stream::synchronize].
    pub fn launch(&self, kernel: &KernelBinary, args: LaunchArgs) -> SysResult<LaunchHandle> {
        if args.block_dim == 0 || args.block_dim > self.device.core_count() {
            return Err(SysError::InvalidLaunch {
                kernel: kernel.name.to_owned(),
                reason: format!("block_dim {} not in 1..={}", args.block_dim, self.device.core_count()),
            });
        }

        for operand in args.inputs.iter().chain(&args.outputs).chain(&args.workspace) {
            if operand.ptr.device() != &self.device {
                return Err(SysError::ForeignPointer {
                    kernel: kernel.name.to_owned(),
                });
            }
            operand.ptr.check_in_bounds(operand.len_bytes)?;
        }

        let mut state = self.state();
        let handle = LaunchHandle(state.next_handle);
        state.next_handle += 1;

        tracing::trace!(kernel = kernel.name, block_dim = args.block_dim, ?handle, "enqueue launch");
        state.queue.push_back((handle, *kernel, args));
        Ok(handle)
    }

    /// Run every queued launch in submission order.
    ///
    /// If a kernel faults the remaining launches are discarded and the error is returned.
    pub fn synchronize(&self) -> SysResult<()> {
        loop {
            let next = self.state().queue.pop_front();
            let Some((handle, kernel, args)) = next else {
                return Ok(());
            };

            if let Err(reason) = run_launch(&kernel, &args) {
                let mut state = self.state();
                let dropped = state.queue.len();
                state.queue.clear();
                state.completed = state.next_handle;

                tracing::error!(kernel = kernel.name, %reason, dropped, "kernel fault");
                return Err(SysError::KernelFault {
                    kernel: kernel.name.to_owned(),
                    reason,
                });
            }

            self.state().completed = handle.0 + 1;
        }
    }

    pub fn is_complete(&self, handle: LaunchHandle) -> bool {
        handle.0 < self.state().completed
    }

    /// Number of launches that have been enqueued but not run yet.
    pub fn pending(&self) -> usize {
        self.state().queue.len()
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_launch(kernel: &KernelBinary, args: &LaunchArgs) -> Result<(), String> {
    let read = |operand: &KernelOperand| operand.ptr.read_bytes(operand.len_bytes).map_err(|e| e.to_string());

    let inputs = args.inputs.iter().map(read).collect::<Result<Vec<_>, _>>()?;
    let mut outputs = args.outputs.iter().map(read).collect::<Result<Vec<_>, _>>()?;
    let mut workspace = match &args.workspace {
        Some(operand) => read(operand)?,
        None => vec![],
    };

    for block_idx in 0..args.block_dim {
        let mut call = KernelCall {
            block_idx,
            block_dim: args.block_dim,
            tiling: &args.tiling,
            inputs: &inputs,
            outputs: &mut outputs,
            workspace: &mut workspace,
        };
        (kernel.entry)(&mut call)?;
    }

    for (operand, data) in args.outputs.iter().zip(&outputs) {
        operand.ptr.copy_from_host(data).map_err(|e| e.to_string())?;
    }
    if let Some(operand) = &args.workspace {
        operand.ptr.copy_from_host(&workspace).map_err(|e| e.to_string())?;
    }
    Ok(())
}

impl Debug for Stream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Stream({:?}, pending {})", self.device, self.pending())
    }
}

impl Debug for KernelBinary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "KernelBinary({})", self.name)
    }
}

impl Debug for KernelCall<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelCall")
            .field("block_idx", &self.block_idx)
            .field("block_dim", &self.block_dim)
            .field("tiling_len", &self.tiling.len())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}
