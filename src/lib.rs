//! Resilient Redis cache client with a transparent local fallback tier.
//!
//! Presents a plain `get`/`set`/`delete` surface backed by three tiers:
//! - an in-process concurrent memory map,
//! - the remote Redis-compatible store,
//! - a local on-disk JSON tree layered by MD5 prefix.
//!
//! While the remote answers, it is the write-through authority. Once it
//! stops answering, the client switches to fallback mode: memory plus a
//! write-behind queue that batches records to disk. A health-check loop
//! watches for the remote to come back, then a one-shot recovery drains
//! the disk tree into the remote and switches back.
//!
//! Durability is best-effort by design: writes survive a remote outage,
//! not a crash of this process with a non-empty queue.

pub mod config;
pub mod error;
pub mod path;
pub mod record;
pub mod remote;

mod disk;
mod fallback;
mod health;
mod janitor;
mod memory;
mod recovery;
mod writer;

pub use config::{Config, Options, RedisConfig};
pub use error::CacheError;
pub use fallback::{CacheStats, RedisFallback};
pub use memory::MemoryStats;
pub use record::{value_shape, CacheRecord};
pub use remote::{BatchSet, RedisRemote, RemoteBackend};
