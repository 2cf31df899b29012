use super::{Allocation, Arena, ArenaStats, RangeHandle};
use crate::config::{ArenaConfig, VmemConfig};
use crate::error::{InvariantViolation, VmemResult};
use tracing::{debug, error};

/// Where a piece of GPU memory comes from. Selects the arena serving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemorySubtype {
    #[default]
    Normal,
    /// Memory imported from another process or device through dma-buf.
    DmaBufExternal,
}

/// The caller-side view of a GPU memory object's address range.
#[derive(Debug, Clone, Default)]
pub struct MemoryDescriptor {
    pub subtype: MemorySubtype,
    pub gpu_va: u64,
    pub size: u64,
    pub is_head_of_block: bool,
    pub is_tail_of_block: bool,
    handle: Option<RangeHandle>,
}

impl MemoryDescriptor {
    #[must_use]
    pub fn new(subtype: MemorySubtype) -> Self {
        Self {
            subtype,
            ..Self::default()
        }
    }

    /// The range this descriptor currently owns, if any.
    #[must_use]
    pub const fn handle(&self) -> Option<RangeHandle> {
        self.handle
    }

    fn fill(&mut self, allocation: &Allocation) {
        self.gpu_va = allocation.gpu_va;
        self.size = allocation.size;
        self.is_head_of_block = true;
        self.is_tail_of_block = true;
        self.handle = Some(allocation.handle);
    }
}

/// The two process-wide GPU virtual address arenas.
///
/// Built once at driver initialization and owned by the driver's top-level
/// context; dropping it destroys both arenas.
#[derive(Debug)]
pub struct VirtualMemory {
    normal: Arena,
    external: Arena,
}

impl VirtualMemory {
    /// Creates both arenas from `config`.
    ///
    /// # Errors
    /// Returns [`VmemError::InvalidArena`](crate::error::VmemError::InvalidArena)
    /// if the layout is rejected, or
    /// [`VmemError::OutOfMemory`](crate::error::VmemError::OutOfMemory) if arena
    /// metadata cannot be allocated. No arena outlives a failed call.
    pub fn new(config: &VmemConfig) -> VmemResult<Self> {
        config.validate()?;

        // 1. Normal memory
        let normal = Self::create_arena(&config.normal)?;

        // 2. External memory; `normal` is dropped if this fails
        let external = Self::create_arena(&config.external)?;

        debug!(
            normal = normal.id(),
            external = external.id(),
            "GPU virtual memory initialized"
        );

        Ok(Self { normal, external })
    }

    fn create_arena(config: &ArenaConfig) -> VmemResult<Arena> {
        Arena::create(config.start, config.size, config.unit_size)
    }

    #[must_use]
    pub const fn arena(&self, subtype: MemorySubtype) -> &Arena {
        match subtype {
            MemorySubtype::DmaBufExternal => &self.external,
            MemorySubtype::Normal => &self.normal,
        }
    }

    /// Reserves at least `min_size` bytes in the arena matching the
    /// descriptor's subtype and records the range in the descriptor.
    ///
    /// # Errors
    /// Returns [`VmemError::OutOfMemory`](crate::error::VmemError::OutOfMemory)
    /// if the arena has no block large enough. The descriptor is left untouched.
    pub fn allocate_range(&self, descriptor: &mut MemoryDescriptor, min_size: u64) -> VmemResult<()> {
        debug_assert!(
            descriptor.handle.is_none(),
            "descriptor already owns range 0x{:x}",
            descriptor.gpu_va
        );

        let allocation = self.arena(descriptor.subtype).allocate(min_size)?;
        descriptor.fill(&allocation);
        Ok(())
    }

    /// Gives the descriptor's range back to its arena.
    ///
    /// # Panics
    /// In debug builds, panics if the descriptor owns no range or the range
    /// is not live in the arena.
    pub fn free_range(&self, descriptor: &mut MemoryDescriptor) {
        let Some(handle) = descriptor.handle.take() else {
            let violation = InvariantViolation::MissingHandle;
            if cfg!(debug_assertions) {
                panic!("free_range: {violation}");
            }
            error!(%violation, "ignoring free of unowned range");
            return;
        };

        self.arena(descriptor.subtype).free(handle);
    }

    #[must_use]
    pub fn stats(&self, subtype: MemorySubtype) -> ArenaStats {
        self.arena(subtype).stats()
    }
}
