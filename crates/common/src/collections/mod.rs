//! Specialized data structures
//!
//! - **[`lru`]**: bounded least-recently-used map that reports evictions
//! - **[`ring_buffer`]**: fixed-size overwrite-on-full buffer for audit trails
//!
//! ## Usage
//!
//! ```rust
//! use toolmesh_common::collections::{LruCache, RingBuffer};
//!
//! let mut recent = RingBuffer::new(2);
//! recent.push("a");
//! recent.push("b");
//! recent.push("c");
//! assert_eq!(recent.to_vec(), vec!["b", "c"]);
//!
//! let mut cache = LruCache::with_capacity(1);
//! cache.put("k1", 1);
//! let evicted = cache.put("k2", 2);
//! assert_eq!(evicted, Some(("k1", 1)));
//! ```

pub mod lru;
pub mod ring_buffer;

// Re-export commonly used types
pub use lru::LruCache;
pub use ring_buffer::RingBuffer;
