// Core types and functionality for the fanflow fan-out/fan-in pipeline

pub mod types;
pub mod events;
pub mod storage;
pub mod table;
pub mod ops;
pub mod workflow;

pub use types::*;
