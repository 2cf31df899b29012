pub mod arena;
pub mod free_list;
pub mod manager;
pub mod slot;

use slot::SlotIndex;

/// Opaque reference to an allocated block, returned by [`Arena::allocate`]
/// and consumed by [`Arena::free`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeHandle {
    arena_id: u32,
    index: SlotIndex,
    order: u8,
    generation: u32,
}

impl RangeHandle {
    pub(crate) const fn new(arena_id: u32, index: SlotIndex, order: u8, generation: u32) -> Self {
        Self {
            arena_id,
            index,
            order,
            generation,
        }
    }

    #[must_use]
    pub const fn arena_id(&self) -> u32 {
        self.arena_id
    }

    #[must_use]
    pub const fn index(&self) -> SlotIndex {
        self.index
    }

    #[must_use]
    pub const fn order(&self) -> u32 {
        self.order as u32
    }

    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

/// Represents a successful reservation of GPU virtual address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub gpu_va: u64,         // GPU Virtual Address of the block start
    pub size: u64,           // Block size in bytes (a power of two)
    pub handle: RangeHandle, // Needed to give the range back
}

/// Trait for address-range allocation strategies.
pub trait AddressRangeAllocator {
    /// Reserve a virtual address range of at least `size` bytes, aligned to `align`.
    fn allocate_va(&self, size: u64, align: u64) -> Option<u64>;

    /// Free a previously reserved virtual address range.
    fn free_va(&self, addr: u64, size: u64);

    /// Get the range's base and (inclusive) limit.
    fn bounds(&self) -> (u64, u64);
}

// Re-export the main types for easy access
pub use arena::{Arena, ArenaStats, Region};
pub use manager::{MemoryDescriptor, MemorySubtype, VirtualMemory};
