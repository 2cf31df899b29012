/// Index of a slot in an arena's slot table. Slot `i` covers the unit at
/// `start_address + i * unit_size`.
pub type SlotIndex = u32;

/// What a slot currently represents.
///
/// Only the first slot of a block is a block head; every other slot inside
/// the block is `Interior` until a split turns it into a head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Interior,
    /// Head of a free block, linked on exactly one freelist.
    Free,
    /// Head of a block handed out to a caller.
    Allocated,
}

/// Freelist linkage embedded in each slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Link {
    pub prev: Option<SlotIndex>,
    pub next: Option<SlotIndex>,
}

/// Per-unit metadata record.
#[derive(Debug, Clone, Copy, Default)]
pub struct Slot {
    state: SlotState,
    order: u8,
    /// Order of the region this slot was carved from at arena creation.
    /// Identical for every slot of a region and never modified afterwards.
    region_order: u8,
    /// Bumped every time the slot heads a new allocation, so stale handles
    /// to an earlier block at the same position are told apart.
    generation: u32,
    pub(crate) link: Link,
}

impl Slot {
    #[must_use]
    pub const fn state(&self) -> SlotState {
        self.state
    }

    /// Order of the block headed by this slot. Meaningless for interior slots.
    #[must_use]
    pub const fn order(&self) -> u8 {
        self.order
    }

    #[must_use]
    pub const fn region_order(&self) -> u8 {
        self.region_order
    }

    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self.state, SlotState::Free)
    }

    #[must_use]
    pub const fn is_head(&self) -> bool {
        !matches!(self.state, SlotState::Interior)
    }

    /// True if this slot heads a free block of exactly `order`, i.e. it can be
    /// merged with a buddy of that order.
    #[must_use]
    pub const fn is_valid_buddy(&self, order: u8) -> bool {
        self.is_free() && self.order == order
    }

    pub(crate) const fn set_region_order(&mut self, region_order: u8) {
        self.region_order = region_order;
    }

    pub(crate) const fn mark_free(&mut self, order: u8) {
        self.state = SlotState::Free;
        self.order = order;
    }

    pub(crate) const fn mark_allocated(&mut self, order: u8) {
        self.state = SlotState::Allocated;
        self.order = order;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Drops block-head bookkeeping; the region tag is kept.
    pub(crate) const fn clear(&mut self) {
        self.state = SlotState::Interior;
        self.order = 0;
    }
}

/*
 Buddy and parent lookup, with `rel = order - min_order`:
 - the buddy of the block starting at index i is at i ^ (1 << rel)
 - the parent (block of order + 1 containing i) starts at i & !(1 << rel)
 Both hold only while i and its buddy lie in the same region.
*/

#[must_use]
pub const fn buddy_index(index: SlotIndex, rel: u32) -> SlotIndex {
    index ^ (1 << rel)
}

#[must_use]
pub const fn parent_index(index: SlotIndex, rel: u32) -> SlotIndex {
    index & !(1 << rel)
}
