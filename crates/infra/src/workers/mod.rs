//! Background tasks: the stage worker pool and periodic maintenance.

pub mod maintenance;
pub mod pool;

pub use maintenance::{Maintenance, MaintenanceHandle, MaintenanceReport};
pub use pool::{
    JobOutcome, ProcessedJob, WorkerPool, WorkerPoolConfig, WorkerPoolHandle, WorkerStats,
};
