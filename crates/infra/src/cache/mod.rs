//! Multi-tier cache
//!
//! - **Local tier**: bounded LRU with per-entry TTL and access counters
//! - **Distributed tier**: any [`DistributedCache`]; payloads above a size
//!   threshold are gzip-compressed when that makes them smaller
//! - **Coalescing**: concurrent misses for one key share a single load
//! - **Dependencies**: invalidating a key cascades to its dependents
//! - **Warmup**: background loads on request, plus periodic refresh of hot
//!   entries that are about to expire

mod coalesce;
mod dependency;
pub mod distributed;
pub mod errors;
mod local;
mod manager;
pub mod metrics;
mod pattern;
mod warmup;

pub use distributed::{CachedPayload, DistributedCache, InMemoryDistributedCache};
pub use errors::CacheError;
pub use local::EntryInfo;
pub use manager::CacheManager;
pub use metrics::CacheMetrics;
pub use warmup::WarmupPriority;
