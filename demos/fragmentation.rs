use gpu_vmem::{Arena, ArenaConfig, VmemError};
use tracing_subscriber::EnvFilter;

const BLOCKS: u64 = 32;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let unit = ArenaConfig::NORMAL.unit_size;
    let arena = Arena::create(ArenaConfig::NORMAL.start, BLOCKS * unit, unit)?;

    let blocks = (0..BLOCKS)
        .map(|_| arena.allocate(unit))
        .collect::<Result<Vec<_>, _>>()?;
    println!("[+] Filled arena with {} blocks", blocks.len());

    for block in blocks.iter().step_by(2) {
        arena.free(block.handle);
    }
    let stats = arena.stats();
    println!("[+] Freed every other block: {} KB free", stats.free_bytes / 1024);

    match arena.allocate(2 * unit) {
        Err(VmemError::OutOfMemory) => println!("[+] Double-size request refused: no free buddy pair"),
        Ok(alloc) => println!("[!] Unexpected block at 0x{:x}", alloc.gpu_va),
        Err(e) => return Err(e.into()),
    }

    arena.free(blocks[1].handle);
    let pair = arena.allocate(2 * unit)?;
    println!("[+] After freeing block 1: double-size block at 0x{:x}", pair.gpu_va);

    arena.check_invariants()?;
    println!("[+] Arena structure verified");
    Ok(())
}
