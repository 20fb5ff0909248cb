use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use npu_graph::hardware::SocGeneration;

use crate::error::{SysError, SysResult};
use crate::mem::DevicePtr;

/// Alignment of every reservation base address.
pub const RESERVE_ALIGNMENT: u64 = 512;

/// Start of the emulated device address space, addresses below it are never handed out.
const ADDRESS_BASE: u64 = 0x1000_0000;

static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DeviceConfig {
    pub generation: SocGeneration,
    /// Total device memory that can be reserved.
    pub memory_bytes: usize,
    /// Number of compute cores a kernel can be launched on.
    pub core_count: u32,
}

/// A handle to an emulated accelerator. Cloning the handle does not create a new device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    id: u32,
    config: DeviceConfig,
    state: Mutex<DeviceState>,
}

#[derive(Debug)]
struct DeviceState {
    reserved_bytes: usize,
    next_addr: u64,
}

impl DeviceConfig {
    pub fn for_generation(generation: SocGeneration) -> Self {
        DeviceConfig {
            generation,
            memory_bytes: 256 * 1024 * 1024,
            core_count: generation.default_core_count(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::for_generation(SocGeneration::Gen2)
    }
}

impl Device {
    pub fn new(config: DeviceConfig) -> Self {
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(device = id, ?config, "creating device");

        let inner = DeviceInner {
            id,
            config,
            state: Mutex::new(DeviceState {
                reserved_bytes: 0,
                next_addr: ADDRESS_BASE,
            }),
        };
        Device { inner: Arc::new(inner) }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    pub fn generation(&self) -> SocGeneration {
        self.inner.config.generation
    }

    pub fn core_count(&self) -> u32 {
        self.inner.config.core_count
    }

    pub fn reserved_bytes(&self) -> usize {
        self.state().reserved_bytes
    }

    pub fn available_bytes(&self) -> usize {
        self.inner.config.memory_bytes - self.reserved_bytes()
    }

    /// Reserve `len_bytes` of device memory, zero-initialized.
    ///
    /// The reservation is released once every [DevicePtr] into it has been dropped.
    pub fn reserve(&self, len_bytes: usize) -> SysResult<DevicePtr> {
        let base_addr = {
            let mut state = self.state();
            let available = self.inner.config.memory_bytes - state.reserved_bytes;
            if len_bytes > available {
                tracing::warn!(device = self.id(), requested = len_bytes, available, "device reservation failed");
                return Err(SysError::OutOfMemory {
                    requested: len_bytes,
                    available,
                });
            }

            let base_addr = state.next_addr;
            state.reserved_bytes += len_bytes;
            state.next_addr = round_up(base_addr + len_bytes.max(1) as u64, RESERVE_ALIGNMENT);
            base_addr
        };

        tracing::debug!(device = self.id(), addr = base_addr, len = len_bytes, "reserved device memory");
        Ok(DevicePtr::new_buffer(self.clone(), base_addr, len_bytes))
    }

    pub(crate) fn release(&self, base_addr: u64, len_bytes: usize) {
        self.state().reserved_bytes -= len_bytes;
        tracing::trace!(device = self.id(), addr = base_addr, len = len_bytes, "released device memory");
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Eq for Device {}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Device({}, {:?})", self.inner.id, self.inner.config.generation)
    }
}

fn round_up(x: u64, align: u64) -> u64 {
    (x + align - 1) / align * align
}
