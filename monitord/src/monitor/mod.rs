//! Scheduling core: per-service timers, concurrent probing and result
//! aggregation.

pub mod aggregate;
pub mod check;
pub mod gateway;
pub mod probe;
pub mod registry;

pub use probe::{GlobalpingProvider, ProbeExecutor};
pub use registry::ScheduleRegistry;
