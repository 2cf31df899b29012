//! Property-based tests for arena invariants.
//!
//! - Orders always cover the request and never drop below the unit order
//! - Creation partitions any geometry into contiguous self-aligned regions
//! - Any interleaving of allocations and frees keeps the block structure
//!   intact, never hands out overlapping ranges, and returns the arena to
//!   its initial state once everything is freed

use gpu_vmem::utils::{largest_order_fitting, order_for_at_least};
use gpu_vmem::{Allocation, Arena, VmemError};
use proptest::prelude::*;

const UNIT: u64 = 0x1000;

#[derive(Debug, Clone)]
enum Op {
    Alloc(u64),
    Free(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u64..=16 * UNIT).prop_map(Op::Alloc),
        2 => any::<usize>().prop_map(Op::Free),
    ]
}

fn overlaps(a: &Allocation, b: &Allocation) -> bool {
    a.gpu_va < b.gpu_va + b.size && b.gpu_va < a.gpu_va + a.size
}

proptest! {
    #[test]
    fn order_covers_request(size in 0u64..(1 << 40), floor in 0u32..32) {
        let order = order_for_at_least(size, floor);
        prop_assert!(order >= floor);
        prop_assert!((1u64 << order) >= size);
        if order > floor {
            prop_assert!((1u64 << (order - 1)) < size, "order {} is not minimal", order);
        }
    }

    #[test]
    fn order_is_exact_for_powers_of_two(shift in 12u32..48) {
        prop_assert_eq!(order_for_at_least(1 << shift, 12), shift);
        prop_assert_eq!(largest_order_fitting(1 << shift), shift);
    }

    #[test]
    fn largest_order_fits(size in 1u64..u64::MAX) {
        let order = largest_order_fitting(size);
        prop_assert!((1u64 << order) <= size);
        prop_assert!(order == 63 || (1u64 << (order + 1)) > size);
    }

    #[test]
    fn partition_is_complete(units in 1u64..4096, unit_shift in 12u32..24) {
        let unit = 1u64 << unit_shift;
        let arena = Arena::create(0x1_0000_0000, units * unit, unit).unwrap();

        let mut covered = 0;
        for region in arena.regions() {
            prop_assert_eq!(region.offset, covered);
            prop_assert_eq!(region.offset % region.size(), 0);
            prop_assert!(region.order >= arena.min_order());
            covered += region.size();
        }
        prop_assert_eq!(covered, units * unit);
        prop_assert_eq!(arena.stats().free_bytes, units * unit);
        prop_assert!(arena.check_invariants().is_ok());
    }

    #[test]
    fn random_workload_keeps_invariants(
        units in 1u64..200,
        ops in prop::collection::vec(arb_op(), 1..120),
    ) {
        let arena = Arena::create(0x2000_0000, units * UNIT, UNIT).unwrap();
        let initial = arena.stats();
        let mut live: Vec<Allocation> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(size) => match arena.allocate(size) {
                    Ok(alloc) => {
                        prop_assert!(alloc.size >= size.max(UNIT));
                        prop_assert_eq!((alloc.gpu_va - 0x2000_0000) % alloc.size, 0);
                        prop_assert!(alloc.handle.order() <= arena.max_order());
                        prop_assert!(live.iter().all(|other| !overlaps(&alloc, other)));
                        live.push(alloc);
                    }
                    Err(VmemError::OutOfMemory) => {
                        let order = arena.order_for_request(size).unwrap();
                        prop_assert!(arena.largest_free_order().is_none_or(|free| free < order));
                    }
                    Err(e) => prop_assert!(false, "unexpected error {e}"),
                },
                Op::Free(pick) => {
                    if !live.is_empty() {
                        let alloc = live.swap_remove(pick % live.len());
                        arena.free(alloc.handle);
                    }
                }
            }
            prop_assert!(arena.check_invariants().is_ok(), "{:?}", arena.check_invariants());
            prop_assert_eq!(arena.stats().live_allocations, live.len());
        }

        for alloc in live.drain(..) {
            arena.free(alloc.handle);
        }
        prop_assert_eq!(arena.stats(), initial);
    }

    #[test]
    fn merges_never_exceed_region_order(
        units in 1u64..64,
        frees in prop::collection::vec(any::<prop::sample::Index>(), 0..64),
    ) {
        let arena = Arena::create(0, units * UNIT, UNIT).unwrap();
        let region_max = arena.regions().map(|r| r.order).max().unwrap();
        let mut live: Vec<_> = (0..units).map(|_| arena.allocate(UNIT).unwrap()).collect();

        for pick in frees {
            if live.is_empty() {
                break;
            }
            let alloc = live.swap_remove(pick.index(live.len()));
            arena.free(alloc.handle);
            prop_assert!(arena.largest_free_order().unwrap() <= region_max);
        }

        let stats = arena.stats();
        let per_region: Vec<_> = arena.regions().collect();
        if live.is_empty() {
            let expected: u64 = per_region.iter().map(|r| r.size()).sum();
            prop_assert_eq!(stats.free_bytes, expected);
            prop_assert_eq!(stats.free_blocks_per_order.iter().sum::<usize>(), per_region.len());
        }
        prop_assert!(arena.check_invariants().is_ok());
    }
}
