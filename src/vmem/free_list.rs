use super::slot::{Link, Slot, SlotIndex};

/// Doubly-linked list of free block heads of one order.
///
/// Links live in the slots themselves (`Slot::link`), so every operation
/// takes the slot table. Insertion and removal are O(1).
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeList {
    head: Option<SlotIndex>,
    len: usize,
}

impl FreeList {
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn head(&self) -> Option<SlotIndex> {
        self.head
    }

    pub fn push_front(&mut self, slots: &mut [Slot], index: SlotIndex) {
        debug_assert!(
            self.head != Some(index) && slots[index as usize].link == Link::default(),
            "slot {index} is already on a freelist"
        );

        let old_head = self.head;
        slots[index as usize].link.prev = None;
        slots[index as usize].link.next = old_head;
        if let Some(next) = old_head {
            slots[next as usize].link.prev = Some(index);
        }

        self.head = Some(index);
        self.len += 1;
    }

    pub fn pop_front(&mut self, slots: &mut [Slot]) -> Option<SlotIndex> {
        let index = self.head?;
        self.remove(slots, index);
        Some(index)
    }

    /// Unlinks `index`, which must currently be on this list.
    pub fn remove(&mut self, slots: &mut [Slot], index: SlotIndex) {
        debug_assert!(
            self.head == Some(index) || slots[index as usize].link.prev.is_some(),
            "slot {index} is not on this freelist"
        );

        let link = slots[index as usize].link;
        match link.prev {
            Some(prev) => slots[prev as usize].link.next = link.next,
            None => self.head = link.next,
        }
        if let Some(next) = link.next {
            slots[next as usize].link.prev = link.prev;
        }

        slots[index as usize].link = Link::default();
        self.len -= 1;
    }

    pub fn iter<'a>(&self, slots: &'a [Slot]) -> impl Iterator<Item = SlotIndex> + use<'a> {
        std::iter::successors(self.head, move |&index| slots[index as usize].link.next)
    }

    #[must_use]
    pub fn contains(&self, slots: &[Slot], index: SlotIndex) -> bool {
        self.iter(slots).any(|i| i == index)
    }
}
