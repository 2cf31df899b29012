//! Fixed address-space layout of the driver.
//!
//! GPU virtual memory:
//!
//! ```text
//! 0x0000_0000  256 MiB  reserved
//! 0x1000_0000  2 GiB    normal memory        (256 KiB minimum block)
//! 0x9000_0000  256 MiB  unused
//! 0xA000_0000  1 GiB    dma-buf external     (4 MiB minimum block)
//! 0xE000_0000           reserved
//! ```

use crate::error::{VmemError, VmemResult};

const NORMAL_BASE: u64 = 0x1000_0000;
const NORMAL_SIZE: u64 = 0x8000_0000;
const NORMAL_UNIT: u64 = 0x4_0000;

const EXTERNAL_BASE: u64 = 0xA000_0000;
const EXTERNAL_SIZE: u64 = 0x4000_0000;
const EXTERNAL_UNIT: u64 = 0x40_0000;

/// The `(start, size, unit_size)` triple an arena is created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    pub start: u64,
    pub size: u64,
    pub unit_size: u64,
}

impl ArenaConfig {
    pub const NORMAL: Self = Self::new(NORMAL_BASE, NORMAL_SIZE, NORMAL_UNIT);
    pub const EXTERNAL: Self = Self::new(EXTERNAL_BASE, EXTERNAL_SIZE, EXTERNAL_UNIT);

    #[must_use]
    pub const fn new(start: u64, size: u64, unit_size: u64) -> Self {
        Self {
            start,
            size,
            unit_size,
        }
    }

    #[must_use]
    pub const fn start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub const fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub const fn unit_size(mut self, unit_size: u64) -> Self {
        self.unit_size = unit_size;
        self
    }

    /// Exclusive end of the range, or `None` if it wraps the address space.
    #[must_use]
    pub const fn end(&self) -> Option<u64> {
        self.start.checked_add(self.size)
    }

    const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.start.saturating_add(other.size)
            && other.start < self.start.saturating_add(self.size)
    }
}

/// Layout of both process-wide arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmemConfig {
    pub normal: ArenaConfig,
    pub external: ArenaConfig,
}

impl Default for VmemConfig {
    fn default() -> Self {
        Self {
            normal: ArenaConfig::NORMAL,
            external: ArenaConfig::EXTERNAL,
        }
    }
}

impl VmemConfig {
    #[must_use]
    pub const fn new(normal: ArenaConfig, external: ArenaConfig) -> Self {
        Self { normal, external }
    }

    /// Checks that the two arenas describe disjoint ranges.
    ///
    /// Per-arena geometry is validated by [`Arena::create`](crate::vmem::Arena::create).
    ///
    /// # Errors
    /// Returns [`VmemError::InvalidArena`] if the ranges overlap.
    pub fn validate(&self) -> VmemResult<()> {
        if self.normal.overlaps(&self.external) {
            return Err(VmemError::InvalidArena(format!(
                "normal range 0x{:x}+0x{:x} overlaps external range 0x{:x}+0x{:x}",
                self.normal.start, self.normal.size, self.external.start, self.external.size
            )));
        }
        Ok(())
    }
}
