//! Key-value store backends.
//!
//! [`MemoryKvStore`] backs unit tests and embedded deployments;
//! [`RedisKvStore`] (feature `persistence-redis`) maps the same contract
//! onto a shared Redis instance for multi-process deployments.

pub mod memory;

#[cfg(feature = "persistence-redis")]
pub mod redis;

pub use memory::MemoryKvStore;

#[cfg(feature = "persistence-redis")]
pub use redis::RedisKvStore;
