//! Grouped invalidation of cache keys.
//!
//! Registries remember which cache keys belong together and evict them as a
//! batch through any [`Cache`](crate::cache::Cache). Evicting through a
//! [`CacheSession`](crate::cache::CacheSession) makes the invalidation part of
//! the session's transaction, so a rollback brings the entries back.
//!
//! - [`Evictor`] / [`EvictorMap`] - unordered key sets, optionally per id
//! - [`SortedEvictor`] / [`SortedEvictorMap`] - keys under an ordinal,
//!   evicted by range

mod evictor;
mod sorted_evictor;

pub use evictor::{Evictor, EvictorMap};
pub use sorted_evictor::{SortedEvictor, SortedEvictorMap};
