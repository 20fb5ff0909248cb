use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::Device;
use crate::error::{SysError, SysResult};

/// A reference-counted pointer into a [DeviceBuffer]. Buffers are only created through [Device::reserve].
///
/// The inner [DeviceBuffer] is released back to the device when there are no [DevicePtr] left that refer to it.
///
/// Cloning this type does not copy the underlying memory, but only increases the reference count.
#[derive(Clone)]
pub struct DevicePtr {
    buffer: Arc<DeviceBuffer>,
    offset: usize,
}

/// A single device reservation.
pub struct DeviceBuffer {
    device: Device,
    base_addr: u64,
    len_bytes: usize,
    data: Mutex<Vec<u8>>,
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.device.release(self.base_addr, self.len_bytes);
    }
}

impl DeviceBuffer {
    fn data(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DevicePtr {
    pub(crate) fn new_buffer(device: Device, base_addr: u64, len_bytes: usize) -> Self {
        let buffer = DeviceBuffer {
            device,
            base_addr,
            len_bytes,
            data: Mutex::new(vec![0; len_bytes]),
        };
        DevicePtr {
            buffer: Arc::new(buffer),
            offset: 0,
        }
    }

    pub fn device(&self) -> &Device {
        &self.buffer.device
    }

    /// The device address this pointer points to.
    pub fn addr(&self) -> u64 {
        self.buffer.base_addr + self.offset as u64
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes between this pointer and the end of its buffer.
    pub fn remaining_bytes(&self) -> usize {
        self.buffer.len_bytes - self.offset
    }

    pub fn offset_bytes(&self, offset: usize) -> SysResult<DevicePtr> {
        let new_offset = self.offset + offset;
        if new_offset > self.buffer.len_bytes {
            return Err(SysError::OutOfBounds {
                offset: new_offset,
                len: 0,
                buffer_len: self.buffer.len_bytes,
            });
        }

        Ok(DevicePtr {
            buffer: self.buffer.clone(),
            offset: new_offset,
        })
    }

    /// The number of `DevicePtr` sharing the underlying buffer that are still alive.
    pub fn shared_count(&self) -> usize {
        Arc::strong_count(&self.buffer)
    }

    pub fn same_buffer(&self, other: &DevicePtr) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    pub fn copy_from_host(&self, data: &[u8]) -> SysResult<()> {
        self.check_in_bounds(data.len())?;
        self.buffer.data()[self.offset..self.offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn copy_to_host(&self, data: &mut [u8]) -> SysResult<()> {
        self.check_in_bounds(data.len())?;
        data.copy_from_slice(&self.buffer.data()[self.offset..self.offset + data.len()]);
        Ok(())
    }

    pub fn read_bytes(&self, len: usize) -> SysResult<Vec<u8>> {
        let mut data = vec![0; len];
        self.copy_to_host(&mut data)?;
        Ok(data)
    }

    pub fn check_in_bounds(&self, len: usize) -> SysResult<()> {
        match self.offset.checked_add(len) {
            Some(end) if end <= self.buffer.len_bytes => Ok(()),
            _ => Err(SysError::OutOfBounds {
                offset: self.offset,
                len,
                buffer_len: self.buffer.len_bytes,
            }),
        }
    }
}

impl Eq for DevicePtr {}

impl PartialEq for DevicePtr {
    fn eq(&self, other: &Self) -> bool {
        self.same_buffer(other) && self.offset == other.offset
    }
}

impl Debug for DevicePtr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DevicePtr({:#x}, offset {} of {})", self.addr(), self.offset, self.buffer.len_bytes)
    }
}

impl Debug for DeviceBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device)
            .field("base_addr", &self.base_addr)
            .field("len_bytes", &self.len_bytes)
            .finish()
    }
}
