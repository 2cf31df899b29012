//! GPU virtual address space management.
//!
//! A fixed virtual range is handed out in power-of-two blocks by a buddy
//! allocator ([`vmem::Arena`]). The driver owns two such arenas, one for
//! normal memory and one for dma-buf imports, bundled in
//! [`vmem::VirtualMemory`]. Only address ranges are reserved here; backing
//! pages and page tables are managed elsewhere.

pub mod config;
pub mod error;
pub mod utils;
pub mod vmem;

pub use config::{ArenaConfig, VmemConfig};
pub use error::{InvariantViolation, VmemError, VmemResult};
pub use vmem::{
    AddressRangeAllocator, Allocation, Arena, ArenaStats, MemoryDescriptor, MemorySubtype,
    RangeHandle, Region, VirtualMemory,
};
