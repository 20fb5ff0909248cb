use thiserror::Error;

pub type SysResult<T> = Result<T, SysError>;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SysError {
    #[error("device out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
    #[error("access of {len} bytes at offset {offset} is out of bounds for buffer of {buffer_len} bytes")]
    OutOfBounds { offset: usize, len: usize, buffer_len: usize },
    #[error("kernel '{kernel}' was launched with a pointer from a different device")]
    ForeignPointer { kernel: String },
    #[error("invalid launch of kernel '{kernel}': {reason}")]
    InvalidLaunch { kernel: String, reason: String },
    #[error("kernel '{kernel}' faulted: {reason}")]
    KernelFault { kernel: String, reason: String },
}
