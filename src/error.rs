use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmemError {
    #[error("Out of GPU virtual address space")]
    OutOfMemory,

    #[error("Invalid arena parameters: {0}")]
    InvalidArena(String),
}

// A convenient alias
pub type VmemResult<T> = Result<T, VmemError>;

/// A broken precondition or corrupted arena state.
///
/// These are programming errors, not runtime conditions: they are never
/// returned from an allocation call. Debug builds panic with the message,
/// release builds log it and leave the arena untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("handle from arena {found} freed into arena {expected}")]
    ForeignHandle { expected: u32, found: u32 },

    #[error("slot index {index} beyond end of slot table ({len} slots)")]
    OutOfBounds { index: u32, len: usize },

    #[error("slot {index} is not an allocated block head of order {order} (double free?)")]
    NotAllocated { index: u32, order: u8 },

    #[error("descriptor does not own an address range")]
    MissingHandle,

    #[error("corrupted arena state: {0}")]
    Corrupted(String),
}
