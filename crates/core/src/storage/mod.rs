pub mod event_log;
pub mod products;

pub use event_log::{JsonlEventLog, MemoryEventLog};
pub use products::{ProductRecord, ProductStore};
