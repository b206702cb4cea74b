//! Infrastructure layer: job queue, rate-limit coordination, pipeline stages,
//! storage adapters (in-memory, Postgres, Redis), config and external clients.

pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod external;
pub mod jobs;
pub mod pipeline;
pub mod rate_limit;
pub mod runtime;
pub mod workers;

pub use config::{ConfigError, GeneratorConfig, RuntimeConfig};
pub use error::{FailureCategory, RateLimitCondition, StageError};
pub use runtime::{GenerationRuntime, RuntimeDeps, RuntimeError, http_generator};
