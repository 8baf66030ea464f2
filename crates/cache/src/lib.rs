//! Sub-millisecond per-conversation hot buffer and per-user key/value store,
//! backed by Redis. See `SPEC_FULL.md` §4.B.

pub mod error;
pub mod redis;

pub use error::{Error, Result};
pub use redis::{RedisSessionCache, SessionCache};
