// vm-gc - Parallel work-stealing tracing garbage collector
// Core library module

pub mod concurrent;
pub mod config;
pub mod containers;
pub mod controller;
pub mod cycle;
pub mod error;
pub mod heap;
pub mod mark;
pub mod pool;
pub mod sweep;
pub mod task;
pub mod worker;

#[cfg(feature = "worker-stats")]
pub mod stats;

pub use config::GcConfig;
pub use containers::{MarkableArray, MarkableTable};
pub use controller::HeapController;
pub use cycle::{CycleReport, GcCycle};
pub use error::{GcError, Result};
pub use heap::{GcHeader, GcObject, ObjectList, Traceable};
pub use pool::GcPool;
