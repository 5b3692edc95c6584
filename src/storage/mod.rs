pub mod log;
pub mod memory;

pub use log::{FileEntryStore, FileEntryStoreOptions};
pub use memory::MemoryEntryStore;
