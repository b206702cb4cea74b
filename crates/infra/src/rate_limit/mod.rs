//! Per-route rate-limit coordination shared by every worker.
//!
//! - [`EphemeralStore`]: expiring keys, the only source of truth for allow/deny.
//! - [`RateLimitAuditStore`]: durable hit history for operators.
//! - [`RateLimitStore`]: the check/set/clear surface the pipeline talks to.

pub mod audit;
pub mod ephemeral;
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis_ephemeral;
pub mod store;

pub use audit::{
    AuditStoreError, InMemoryRateLimitAuditStore, RateLimitAuditStore, RateLimitRecord,
};
pub use ephemeral::{EphemeralStore, EphemeralStoreError, InMemoryEphemeralStore};
pub use postgres::PostgresRateLimitAuditStore;
#[cfg(feature = "redis")]
pub use redis_ephemeral::RedisEphemeralStore;
pub use store::{DEFAULT_KEY_PREFIX, DEFAULT_MAX_WINDOW, RateLimitInfo, RateLimitStore};
