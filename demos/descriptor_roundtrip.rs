use gpu_vmem::{MemoryDescriptor, MemorySubtype, VirtualMemory, VmemConfig};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Descriptor Round Trip ===");

    let vm = VirtualMemory::new(&VmemConfig::default())?;
    println!("[+] Arenas created");

    // 1. A texture-sized buffer in normal memory
    let mut texture = MemoryDescriptor::new(MemorySubtype::Normal);
    vm.allocate_range(&mut texture, 0x5_0000)?;
    println!("[+] Normal:   0x{:x} ({} KB)", texture.gpu_va, texture.size / 1024);

    // 2. An imported dma-buf
    let mut import = MemoryDescriptor::new(MemorySubtype::DmaBufExternal);
    vm.allocate_range(&mut import, 0x10_0000)?;
    println!("[+] External: 0x{:x} ({} KB)", import.gpu_va, import.size / 1024);

    // 3. Give both back
    vm.free_range(&mut texture);
    vm.free_range(&mut import);

    for subtype in [MemorySubtype::Normal, MemorySubtype::DmaBufExternal] {
        let stats = vm.stats(subtype);
        println!(
            "[+] {subtype:?}: {} live, {} MB free",
            stats.live_allocations,
            stats.free_bytes / 1024 / 1024
        );
    }

    println!("=== Done ===");
    Ok(())
}
