use gpu_vmem::{MemorySubtype, VirtualMemory, VmemConfig};
use tracing_subscriber::EnvFilter;

fn print_arena(vm: &VirtualMemory, subtype: MemorySubtype) {
    let arena = vm.arena(subtype);
    let stats = arena.stats();

    println!("\n[{subtype:?} arena #{}]", arena.id());
    println!(
        "  Range:       0x{:x} - 0x{:x}",
        arena.start_address(),
        arena.start_address() + arena.total_size()
    );
    println!("  Unit Size:   {} KB", arena.unit_size() / 1024);
    println!("  Orders:      {}..={}", arena.min_order(), arena.max_order());
    println!("  Free:        {} MB", stats.free_bytes / 1024 / 1024);

    for region in arena.regions() {
        println!(
            "  - Region at +0x{:x}, order {} ({} MB)",
            region.offset,
            region.order,
            region.size() / 1024 / 1024
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("--- GPU Virtual Memory Layout ---");

    let vm = VirtualMemory::new(&VmemConfig::default())?;
    print_arena(&vm, MemorySubtype::Normal);
    print_arena(&vm, MemorySubtype::DmaBufExternal);

    Ok(())
}
