//! Infrastructure log transports.
//!
//! The transport contract lives in `khata-events`; the in-memory log there
//! serves tests and local runs. This module provides the Redis-backed one.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsTransport;
