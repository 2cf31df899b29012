#![allow(clippy::cast_possible_truncation)]

use super::free_list::FreeList;
use super::slot::{Slot, SlotIndex, SlotState, buddy_index, parent_index};
use super::{AddressRangeAllocator, Allocation, RangeHandle};
use crate::error::{InvariantViolation, VmemError, VmemResult};
use crate::utils::{
    PAGE_ORDER, PAGE_SIZE, align_up, largest_order_fitting, order_for_at_least, order_size,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, error, trace, warn};

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

/// One maximal power-of-two region produced by the creation-time partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Byte offset from the arena start.
    pub offset: u64,
    pub order: u32,
}

impl Region {
    #[must_use]
    pub const fn size(&self) -> u64 {
        order_size(self.order)
    }
}

/// Snapshot of an arena's usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaStats {
    pub total_size: u64,
    pub free_bytes: u64,
    pub allocated_bytes: u64,
    pub live_allocations: usize,
    /// Number of free blocks per order, indexed by `order - min_order`.
    pub free_blocks_per_order: Vec<usize>,
}

/// Everything the arena lock protects.
#[derive(Debug)]
struct ArenaState {
    slots: Vec<Slot>,
    free_lists: Vec<FreeList>,
    live: usize,
}

/// A buddy allocator over a fixed range of GPU virtual address space.
///
/// The range is carved at creation into maximal power-of-two regions, each
/// buddy-managed on its own. Blocks never split or merge across a region
/// boundary.
///
/// All slot and freelist mutation happens under one internal lock, so an
/// `Arena` can be shared between threads by reference.
#[derive(Debug)]
pub struct Arena {
    id: u32,
    start_address: u64,
    total_size: u64,
    unit_size: u64,
    min_order: u32,
    max_order: u32,
    state: Mutex<ArenaState>,
}

impl Arena {
    /// Creates an arena managing `[start, start + total_size)` in blocks of at
    /// least `unit_size` bytes.
    ///
    /// # Errors
    /// Returns [`VmemError::InvalidArena`] if `unit_size` is not a power of two
    /// of at least one page, if `total_size` is not a non-zero multiple of
    /// `unit_size`, or if the range wraps the address space.
    /// Returns [`VmemError::OutOfMemory`] if the metadata tables cannot be allocated.
    pub fn create(start: u64, total_size: u64, unit_size: u64) -> VmemResult<Self> {
        if !unit_size.is_power_of_two() || unit_size < PAGE_SIZE {
            return Err(VmemError::InvalidArena(format!(
                "unit size 0x{unit_size:x} is not a power of two of at least 0x{PAGE_SIZE:x}"
            )));
        }
        if total_size == 0 || total_size % unit_size != 0 {
            return Err(VmemError::InvalidArena(format!(
                "size 0x{total_size:x} is not a non-zero multiple of unit size 0x{unit_size:x}"
            )));
        }
        if start.checked_add(total_size).is_none() {
            return Err(VmemError::InvalidArena(format!(
                "range 0x{start:x}+0x{total_size:x} wraps the address space"
            )));
        }

        let slot_count = total_size / unit_size;
        if slot_count > u64::from(SlotIndex::MAX) {
            return Err(VmemError::InvalidArena(format!(
                "{slot_count} slots exceed the slot index range"
            )));
        }
        let slot_count = usize::try_from(slot_count)
            .map_err(|_| VmemError::InvalidArena(format!("{slot_count} slots do not fit in memory")))?;

        let min_order = order_for_at_least(unit_size, PAGE_ORDER);
        let max_order = largest_order_fitting(total_size);
        let list_count = (max_order - min_order + 1) as usize;

        // Both tables are dropped on the error path, leaving nothing behind.
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(slot_count)
            .map_err(|_| VmemError::OutOfMemory)?;
        slots.resize(slot_count, Slot::default());

        let mut free_lists = Vec::new();
        free_lists
            .try_reserve_exact(list_count)
            .map_err(|_| VmemError::OutOfMemory)?;
        free_lists.resize(list_count, FreeList::new());

        let arena = Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            start_address: start,
            total_size,
            unit_size,
            min_order,
            max_order,
            state: Mutex::new(ArenaState {
                slots,
                free_lists,
                live: 0,
            }),
        };

        arena.partition();

        debug!(
            arena = arena.id,
            min_order,
            max_order,
            regions = arena.regions().count(),
            "created GPU VA arena 0x{start:x}+0x{total_size:x}"
        );

        Ok(arena)
    }

    /// Greedy carve into maximal aligned power-of-two regions, each one a
    /// single free block on its freelist.
    fn partition(&self) {
        let mut state = self.state.lock();
        let ArenaState {
            slots, free_lists, ..
        } = &mut *state;

        for region in self.regions() {
            let first = (region.offset / self.unit_size) as usize;
            let units = (region.size() / self.unit_size) as usize;

            for slot in &mut slots[first..first + units] {
                slot.set_region_order(region.order as u8);
            }
            slots[first].mark_free(region.order as u8);
            free_lists[self.list_index(region.order)].push_front(slots, first as SlotIndex);
        }
    }

    /// The regions the arena was partitioned into, in address order.
    pub fn regions(&self) -> impl Iterator<Item = Region> + '_ {
        let mut offset = 0;
        std::iter::from_fn(move || {
            let remaining = self.total_size - offset;
            if remaining == 0 {
                return None;
            }
            let order = largest_order_fitting(remaining);
            let region = Region { offset, order };
            offset += order_size(order);
            Some(region)
        })
    }

    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub const fn start_address(&self) -> u64 {
        self.start_address
    }

    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    #[must_use]
    pub const fn unit_size(&self) -> u64 {
        self.unit_size
    }

    #[must_use]
    pub const fn min_order(&self) -> u32 {
        self.min_order
    }

    #[must_use]
    pub const fn max_order(&self) -> u32 {
        self.max_order
    }

    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.start_address && addr - self.start_address < self.total_size
    }

    /// The allocation class a request of `min_size` bytes falls into.
    #[must_use]
    pub const fn order_for_request(&self, min_size: u64) -> Option<u32> {
        match align_up(min_size, self.unit_size) {
            Some(size) => Some(order_for_at_least(size, self.min_order)),
            None => None,
        }
    }

    const fn list_index(&self, order: u32) -> usize {
        (order - self.min_order) as usize
    }

    const fn slot_address(&self, index: SlotIndex) -> u64 {
        self.start_address + self.unit_size * index as u64
    }

    fn allocation_for(&self, index: SlotIndex, order: u32, generation: u32) -> Allocation {
        Allocation {
            gpu_va: self.slot_address(index),
            size: order_size(order),
            handle: RangeHandle::new(self.id, index, order as u8, generation),
        }
    }

    /// Reserves a block of at least `min_size` bytes.
    ///
    /// The block size is `min_size` rounded up to the unit size and then to the
    /// next power of two. Its offset from the arena start is a multiple of its size.
    ///
    /// # Errors
    /// Returns [`VmemError::OutOfMemory`] if no free block of the required
    /// order or larger exists, or if the request exceeds the largest order.
    pub fn allocate(&self, min_size: u64) -> VmemResult<Allocation> {
        let Some(requested) = self.order_for_request(min_size) else {
            return Err(VmemError::OutOfMemory);
        };

        trace!(arena = self.id, min_size, requested, "allocate");

        if requested > self.max_order {
            trace!(arena = self.id, requested, max_order = self.max_order, "request too large");
            return Err(VmemError::OutOfMemory);
        }

        let mut state = self.state.lock();
        let taken = self
            .take_block(&mut state, requested)
            .map(|index| (index, state.slots[index as usize].generation()));
        drop(state);

        taken
            .map(|(index, generation)| self.allocation_for(index, requested, generation))
            .ok_or(VmemError::OutOfMemory)
    }

    /// Finds a free block of order `requested` or larger and splits it down,
    /// putting every upper half back on its freelist.
    fn take_block(&self, state: &mut ArenaState, requested: u32) -> Option<SlotIndex> {
        let ArenaState {
            slots,
            free_lists,
            live,
        } = state;

        let mut found = None;
        for order in requested..=self.max_order {
            if let Some(index) = free_lists[self.list_index(order)].pop_front(slots) {
                found = Some((order, index));
                break;
            }
        }
        let (mut order, index) = found?;

        while order > requested {
            order -= 1;
            let buddy = buddy_index(index, order - self.min_order);
            trace!(arena = self.id, index, buddy, order, "split");
            slots[buddy as usize].mark_free(order as u8);
            free_lists[self.list_index(order)].push_front(slots, buddy);
        }

        slots[index as usize].mark_allocated(requested as u8);
        *live += 1;
        Some(index)
    }

    /// Returns a block to the arena, merging it with free buddies up to the
    /// order of the region it was carved from.
    ///
    /// # Panics
    /// In debug builds, panics if `handle` was not issued by this arena or its
    /// block is not currently allocated (double free). Release builds log the
    /// violation and leave the arena unchanged.
    pub fn free(&self, handle: RangeHandle) {
        let mut state = self.state.lock();

        if let Err(violation) = self.check_handle(&state, handle) {
            drop(state);
            self.precondition_violated(&violation);
            return;
        }

        self.release_block(&mut state, handle.index());
    }

    fn check_handle(&self, state: &ArenaState, handle: RangeHandle) -> Result<(), InvariantViolation> {
        if handle.arena_id() != self.id {
            return Err(InvariantViolation::ForeignHandle {
                expected: self.id,
                found: handle.arena_id(),
            });
        }

        let index = handle.index();
        let Some(slot) = state.slots.get(index as usize) else {
            return Err(InvariantViolation::OutOfBounds {
                index,
                len: state.slots.len(),
            });
        };

        if slot.state() != SlotState::Allocated
            || u32::from(slot.order()) != handle.order()
            || slot.generation() != handle.generation()
        {
            return Err(InvariantViolation::NotAllocated {
                index,
                order: handle.order() as u8,
            });
        }

        Ok(())
    }

    fn release_block(&self, state: &mut ArenaState, mut index: SlotIndex) {
        let ArenaState {
            slots,
            free_lists,
            live,
        } = state;

        let mut order = u32::from(slots[index as usize].order());
        let region_order = u32::from(slots[index as usize].region_order());

        while order < region_order {
            let rel = order - self.min_order;
            let buddy = buddy_index(index, rel);
            debug_assert!(
                (buddy as usize) < slots.len(),
                "buddy {buddy} of slot {index} at order {order} beyond end of slot table"
            );

            if !slots[buddy as usize].is_valid_buddy(order as u8) {
                break;
            }

            free_lists[self.list_index(order)].remove(slots, buddy);
            slots[index as usize].clear();
            slots[buddy as usize].clear();

            index = parent_index(index, rel);
            order += 1;
            trace!(arena = self.id, index, buddy, order, "merge");
        }

        slots[index as usize].mark_free(order as u8);
        free_lists[self.list_index(order)].push_front(slots, index);
        *live -= 1;
    }

    fn precondition_violated(&self, violation: &InvariantViolation) {
        if cfg!(debug_assertions) {
            panic!("arena {}: {violation}", self.id);
        }
        error!(arena = self.id, %violation, "ignoring invalid free");
    }

    /// Looks up the live allocation starting at `addr`.
    #[must_use]
    pub fn handle_at(&self, addr: u64) -> Option<RangeHandle> {
        if !self.contains(addr) {
            return None;
        }
        let offset = addr - self.start_address;
        if offset % self.unit_size != 0 {
            return None;
        }

        let index = (offset / self.unit_size) as SlotIndex;
        let state = self.state.lock();
        let slot = state.slots[index as usize];
        drop(state);

        (slot.state() == SlotState::Allocated)
            .then(|| RangeHandle::new(self.id, index, slot.order(), slot.generation()))
    }

    /// Largest order with at least one free block.
    #[must_use]
    pub fn largest_free_order(&self) -> Option<u32> {
        let state = self.state.lock();
        (self.min_order..=self.max_order)
            .rev()
            .find(|&order| !state.free_lists[self.list_index(order)].is_empty())
    }

    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let state = self.state.lock();

        let free_blocks_per_order: Vec<usize> = state.free_lists.iter().map(FreeList::len).collect();
        let free_bytes: u64 = free_blocks_per_order
            .iter()
            .zip(self.min_order..)
            .map(|(&count, order)| count as u64 * order_size(order))
            .sum();

        ArenaStats {
            total_size: self.total_size,
            free_bytes,
            allocated_bytes: self.total_size - free_bytes,
            live_allocations: state.live,
            free_blocks_per_order,
        }
    }

    /// Walks the whole slot table and verifies the block structure:
    /// blocks tile the table, every free head sits on exactly the freelist of
    /// its order, and no two free buddies of the same region are left unmerged.
    ///
    /// # Errors
    /// Returns the first [`InvariantViolation::Corrupted`] found.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let state = self.state.lock();
        let slots = &state.slots;
        let corrupted = |msg: String| Err(InvariantViolation::Corrupted(msg));

        let mut free_heads = 0;
        let mut allocated_heads = 0;
        let mut index = 0usize;

        while index < slots.len() {
            let slot = slots[index];
            let order = u32::from(slot.order());
            if !slot.is_head() {
                return corrupted(format!("slot {index} is not covered by any block"));
            }
            if order < self.min_order || order > u32::from(slot.region_order()) {
                return corrupted(format!(
                    "slot {index} has order {order} outside {}..={}",
                    self.min_order,
                    slot.region_order()
                ));
            }

            let units = (order_size(order) / self.unit_size) as usize;
            if index % units != 0 || index + units > slots.len() {
                return corrupted(format!("block at slot {index} of order {order} is misplaced"));
            }
            if let Some(inner) = (index + 1..index + units).find(|&i| slots[i].is_head()) {
                return corrupted(format!("slot {inner} is a block head inside block {index}"));
            }

            if slot.is_free() {
                free_heads += 1;
                let list = &state.free_lists[self.list_index(order)];
                if !list.contains(slots, index as SlotIndex) {
                    return corrupted(format!("free slot {index} is missing from its freelist"));
                }

                if order < u32::from(slot.region_order()) {
                    let buddy = buddy_index(index as SlotIndex, order - self.min_order) as usize;
                    if slots[buddy].is_valid_buddy(order as u8) {
                        return corrupted(format!("free buddies {index} and {buddy} were not merged"));
                    }
                }
            } else {
                allocated_heads += 1;
            }

            index += units;
        }

        let listed: usize = state.free_lists.iter().map(FreeList::len).sum();
        if listed != free_heads {
            return corrupted(format!("{listed} freelist entries for {free_heads} free blocks"));
        }
        if allocated_heads != state.live {
            return corrupted(format!(
                "{allocated_heads} allocated blocks but {} live allocations recorded",
                state.live
            ));
        }

        Ok(())
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let live = self.state.get_mut().live;
        if live > 0 {
            warn!(arena = self.id, live, "destroying GPU VA arena with live allocations");
        } else {
            debug!(arena = self.id, "destroyed GPU VA arena");
        }
    }
}

impl AddressRangeAllocator for Arena {
    fn bounds(&self) -> (u64, u64) {
        (self.start_address, self.start_address + self.total_size - 1)
    }

    /// Blocks are aligned to their own size relative to the arena start, so
    /// the request is grown to at least `align`. Alignments the arena start
    /// itself does not satisfy cannot be honoured.
    fn allocate_va(&self, size: u64, align: u64) -> Option<u64> {
        let align = align.max(1);
        if !align.is_power_of_two() || self.start_address % align != 0 {
            debug!(arena = self.id, align, "unsupported alignment");
            return None;
        }

        self.allocate(size.max(align)).ok().map(|alloc| alloc.gpu_va)
    }

    fn free_va(&self, addr: u64, size: u64) {
        let Some(handle) = self.handle_at(addr) else {
            error!(arena = self.id, "tried to free VA 0x{addr:x} which was not allocated");
            return;
        };

        debug_assert!(
            size <= order_size(handle.order()),
            "freeing 0x{size:x} bytes at 0x{addr:x} from a smaller block"
        );
        self.free(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: u64 = 0x4_0000;

    fn arena(units: u64) -> Arena {
        Arena::create(0x1000_0000, units * UNIT, UNIT).unwrap()
    }

    #[test]
    fn geometry_of_driver_normal_arena() {
        let arena = Arena::create(0x1000_0000, 0x8000_0000, 0x4_0000).unwrap();
        assert_eq!(arena.min_order(), 18);
        assert_eq!(arena.max_order(), 31);
        assert_eq!(arena.regions().collect::<Vec<_>>(), vec![Region { offset: 0, order: 31 }]);
        assert_eq!(arena.stats().free_blocks_per_order.len(), 14);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(matches!(Arena::create(0, 0x1000_0000, 0x3000), Err(VmemError::InvalidArena(_))));
        assert!(matches!(Arena::create(0, 0x1000_0000, 0x800), Err(VmemError::InvalidArena(_))));
        assert!(matches!(Arena::create(0, 0, 0x1000), Err(VmemError::InvalidArena(_))));
        assert!(matches!(Arena::create(0, 0x1800, 0x1000), Err(VmemError::InvalidArena(_))));
        assert!(matches!(
            Arena::create(u64::MAX - 0xFFF, 0x2000, 0x1000),
            Err(VmemError::InvalidArena(_))
        ));
    }

    #[test]
    fn non_power_of_two_arena_has_several_regions() {
        let arena = arena(7);
        let regions: Vec<_> = arena.regions().collect();
        assert_eq!(
            regions,
            vec![
                Region { offset: 0, order: 20 },
                Region { offset: 4 * UNIT, order: 19 },
                Region { offset: 6 * UNIT, order: 18 },
            ]
        );

        let stats = arena.stats();
        assert_eq!(stats.free_bytes, 7 * UNIT);
        assert_eq!(stats.free_blocks_per_order, vec![1, 1, 1]);
        arena.check_invariants().unwrap();
    }

    #[test]
    fn allocate_splits_and_free_merges() {
        let arena = arena(8);
        let alloc = arena.allocate(1).unwrap();
        assert_eq!(alloc.gpu_va, 0x1000_0000);
        assert_eq!(alloc.size, UNIT);
        // 8 units split into 4 + 2 + 1 + 1
        assert_eq!(arena.stats().free_blocks_per_order, vec![1, 1, 1, 0]);
        arena.check_invariants().unwrap();

        arena.free(alloc.handle);
        assert_eq!(arena.stats().free_blocks_per_order, vec![0, 0, 0, 1]);
        arena.check_invariants().unwrap();
    }

    #[test]
    fn merge_stops_at_region_boundary() {
        // Regions of 4 and 2 units: the 2-unit region must never grow.
        let arena = arena(6);
        let big = arena.allocate(4 * UNIT).unwrap();
        let a = arena.allocate(UNIT).unwrap();
        let b = arena.allocate(UNIT).unwrap();
        assert_eq!(a.gpu_va, 0x1000_0000 + 4 * UNIT);
        assert_eq!(b.gpu_va, 0x1000_0000 + 5 * UNIT);

        arena.free(big.handle);
        arena.free(a.handle);
        arena.free(b.handle);

        assert_eq!(arena.stats().free_blocks_per_order, vec![0, 1, 1]);
        arena.check_invariants().unwrap();
    }

    #[test]
    fn oversized_request_does_not_touch_state() {
        let arena = arena(8);
        let before = arena.stats();
        assert_eq!(arena.allocate(16 * UNIT), Err(VmemError::OutOfMemory));
        assert_eq!(arena.allocate(u64::MAX), Err(VmemError::OutOfMemory));
        assert_eq!(arena.stats(), before);
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let arena = arena(4);
        let allocs: Vec<_> = (0..4).map(|_| arena.allocate(UNIT).unwrap()).collect();
        assert_eq!(arena.allocate(UNIT), Err(VmemError::OutOfMemory));
        assert_eq!(arena.largest_free_order(), None);

        arena.free(allocs[2].handle);
        assert_eq!(arena.largest_free_order(), Some(18));
        assert!(arena.allocate(UNIT).is_ok());
    }

    #[test]
    fn handle_lookup_by_address() {
        let arena = arena(8);
        let alloc = arena.allocate(2 * UNIT).unwrap();
        assert_eq!(arena.handle_at(alloc.gpu_va), Some(alloc.handle));
        assert_eq!(arena.handle_at(alloc.gpu_va + UNIT), None);
        assert_eq!(arena.handle_at(alloc.gpu_va + 1), None);
        assert_eq!(arena.handle_at(0), None);
    }

    #[test]
    fn aperture_trait_roundtrip() {
        let arena = arena(8);
        assert_eq!(arena.bounds(), (0x1000_0000, 0x1000_0000 + 8 * UNIT - 1));

        let va = arena.allocate_va(0x1000, 2 * UNIT).unwrap();
        assert_eq!((va - 0x1000_0000) % (2 * UNIT), 0);
        assert_eq!(arena.stats().live_allocations, 1);

        arena.free_va(va, 0x1000);
        assert_eq!(arena.stats().live_allocations, 0);
        assert_eq!(arena.stats().free_bytes, 8 * UNIT);
    }

    #[test]
    fn aperture_rejects_alignment_beyond_start() {
        let arena = Arena::create(0x4_0000, 8 * UNIT, UNIT).unwrap();
        assert_eq!(arena.allocate_va(UNIT, 4 * UNIT), None);
        assert!(arena.allocate_va(UNIT, UNIT).is_some());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "double free")]
    fn double_free_panics_in_debug() {
        let arena = arena(8);
        let alloc = arena.allocate(UNIT).unwrap();
        arena.free(alloc.handle);
        arena.free(alloc.handle);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "double free")]
    fn stale_handle_to_reused_slot_panics_in_debug() {
        let arena = arena(8);
        let stale = arena.allocate(UNIT).unwrap();
        arena.free(stale.handle);

        let reused = arena.allocate(UNIT).unwrap();
        assert_eq!(reused.gpu_va, stale.gpu_va);
        assert_ne!(reused.handle, stale.handle);
        arena.free(stale.handle);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "freed into arena")]
    fn foreign_handle_panics_in_debug() {
        let first = arena(8);
        let second = arena(8);
        let alloc = first.allocate(UNIT).unwrap();
        second.free(alloc.handle);
    }
}
