/// Order of the smallest block the GPU MMU can map (a 4 KiB page).
pub const PAGE_ORDER: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_ORDER;

/// Smallest order `o >= floor` such that `1 << o >= size`.
///
/// A zero-sized request still occupies one unit, so `size == 0` yields `floor`.
/// Rounds up; see [`largest_order_fitting`] for the rounding-down counterpart.
#[must_use]
pub const fn order_for_at_least(size: u64, floor: u32) -> u32 {
    let order = if size <= 1 {
        0
    } else {
        u64::BITS - (size - 1).leading_zeros()
    };

    if order < floor { floor } else { order }
}

/// Largest order `o` such that `1 << o <= size`.
///
/// Used to carve an arena into maximal power-of-two regions. `size` must be
/// non-zero; zero is mapped to order 0.
#[must_use]
pub const fn largest_order_fitting(size: u64) -> u32 {
    if size == 0 {
        return 0;
    }
    u64::BITS - 1 - size.leading_zeros()
}

/// Rounds `value` up to a multiple of `align` (a power of two).
/// Returns `None` on overflow.
#[must_use]
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Size in bytes of a block of `order`.
#[must_use]
pub const fn order_size(order: u32) -> u64 {
    1 << order
}
