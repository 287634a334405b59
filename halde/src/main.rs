use clap::Parser;
use halde::{Collector, CollectorSettings};

/// Exercises the conservative collector from the main thread, where the
/// stack window between here and the process's stack origin is valid.
#[derive(Debug, Parser)]
#[command(name = "halde", about = "conservative mark-and-sweep heap demo")]
struct Args {
    /// Allocations per round.
    #[arg(long, default_value_t = 64)]
    allocations: usize,
    /// Size of each allocation in bytes.
    #[arg(long, default_value_t = 256)]
    size: usize,
    /// Number of allocate-then-collect rounds.
    #[arg(long, default_value_t = 4)]
    rounds: usize,
    /// Optional cap on total mapped bytes.
    #[arg(long)]
    heap_limit: Option<usize>,
}

const KEEP: usize = 16;

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut gc = Collector::new(CollectorSettings {
        heap_limit: args.heap_limit,
        ..Default::default()
    });

    // Keepalive roots live in a stack array so the conservative stack scan
    // sees them; a heap-backed Vec would be invisible to the collector.
    let mut keep = [0usize; KEEP];

    for round in 0..args.rounds {
        for index in 0..args.allocations {
            match gc.allocate(args.size) {
                Some(ptr) => {
                    // SAFETY: the block spans at least args.size bytes
                    unsafe {
                        ptr.as_ptr().write_bytes((index & 0xFF) as u8, args.size);
                    }
                    if index % (args.allocations / KEEP + 1) == 0 {
                        keep[index % KEEP] = ptr.as_ptr() as usize;
                    }
                }
                None => {
                    eprintln!("allocation failed at round {round}, index {index}");
                    return;
                }
            }
        }

        let live_before = gc.live_blocks();
        gc.collect();
        println!(
            "round {round}: {} blocks before collection, {} after, {} free units, {} bytes mapped",
            live_before,
            gc.live_blocks(),
            gc.free_units(),
            gc.mapped_bytes(),
        );
    }

    std::hint::black_box(&keep);
}
