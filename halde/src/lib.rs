mod block;
mod collector;
mod free_list;
mod registry;
mod system;

pub use block::{BlockFlags, BlockHeader, UNIT_SIZE};
pub use collector::{
    Collector, CollectorSettings, CycleStats, DEFAULT_GROWTH_UNITS,
};
pub use free_list::FreeList;
pub use registry::UsedRegistry;
pub use system::{
    OS_PAGE_SIZE, approximate_stack_pointer, map_memory, stack_origin,
    static_data_segment, unmap_memory,
};
